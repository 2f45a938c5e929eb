use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use serde::Serialize;

use super::{BenchmarkReport, BenchmarkRun};
use crate::engine::aggregator::LatencyBucket;
use crate::error::BenchError;

// ---------------------------------------------------------------------------
// JSON export
// ---------------------------------------------------------------------------

/// Export a report as pretty-printed JSON.
pub fn export_json(report: &BenchmarkReport) -> Result<String, BenchError> {
    Ok(serde_json::to_string_pretty(report)?)
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Export the latency buckets of one run as CSV with the header
/// `range_start_ms,range_end_ms,count,cumulative_percent`.
pub fn export_buckets_csv(run: &BenchmarkRun) -> Result<String, BenchError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(["range_start_ms", "range_end_ms", "count", "cumulative_percent"])?;
    for bucket in &run.buckets {
        wtr.write_record([
            format!("{:.3}", bucket.range_start_ms),
            format!("{:.3}", bucket.range_end_ms),
            bucket.count.to_string(),
            format!("{:.2}", bucket.cumulative_percent),
        ])?;
    }
    into_string(wtr)
}

/// One row of the summary CSV. Variants that never ran leave the numeric
/// columns empty.
#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    variant: &'a str,
    status: &'a str,
    started_at: Option<String>,
    total_probes: Option<u64>,
    successful: Option<u64>,
    http_errors: Option<u64>,
    timeouts: Option<u64>,
    connection_errors: Option<u64>,
    achieved_qps: Option<f64>,
    mean_ms: Option<f64>,
    p50_ms: Option<f64>,
    p90_ms: Option<f64>,
    p95_ms: Option<f64>,
    p99_ms: Option<f64>,
    min_ms: Option<f64>,
    max_ms: Option<f64>,
}

/// Export one summary row per requested variant.
pub fn export_summary_csv(report: &BenchmarkReport) -> Result<String, BenchError> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    for v in &report.variants {
        let run = v.outcome.run();
        let s = run.map(|r| &r.summary);
        wtr.serialize(SummaryRow {
            variant: &v.variant_name,
            status: v.outcome.label(),
            started_at: run.map(|r| r.started_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            total_probes: s.map(|s| s.total_probes),
            successful: s.map(|s| s.successful),
            http_errors: s.map(|s| s.http_errors),
            timeouts: s.map(|s| s.timeouts),
            connection_errors: s.map(|s| s.connection_errors),
            achieved_qps: run.map(|r| r.achieved_qps),
            mean_ms: s.map(|s| s.mean_ms),
            p50_ms: s.map(|s| s.p50_ms),
            p90_ms: s.map(|s| s.p90_ms),
            p95_ms: s.map(|s| s.p95_ms),
            p99_ms: s.map(|s| s.p99_ms),
            min_ms: s.map(|s| s.min_ms),
            max_ms: s.map(|s| s.max_ms),
        })?;
    }
    into_string(wtr)
}

fn into_string(wtr: csv::Writer<Vec<u8>>) -> Result<String, BenchError> {
    let bytes = wtr
        .into_inner()
        .map_err(|e| BenchError::Internal(format!("flushing CSV: {e}")))?;
    String::from_utf8(bytes).map_err(|e| BenchError::Internal(format!("CSV is not UTF-8: {e}")))
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

/// Render buckets as a fixed-width table for terminal output.
pub fn format_buckets_table(buckets: &[LatencyBucket]) -> String {
    let mut out = String::from("     range (ms)            count   cumulative\n");
    for b in buckets {
        out.push_str(&format!(
            "{:>9.2} - {:<9.2}  {:>9}   {:>8.2}%\n",
            b.range_start_ms, b.range_end_ms, b.count, b.cumulative_percent
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// File-system safe name for a variant's artifacts.
pub fn artifact_file_name(variant: &str) -> String {
    let cleaned: String = variant
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "variant".to_string()
    } else {
        cleaned
    }
}

/// Write the JSON report to `path`, creating parent directories.
pub async fn write_report(report: &BenchmarkReport, path: &Path) -> Result<(), BenchError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, export_json(report)?).await?;
    tracing::info!(path = %path.display(), "wrote report");
    Ok(())
}

/// Write `summary.csv` and one `<variant>_buckets.csv` per run that has
/// buckets into `dir`. Returns the paths written.
pub async fn write_csv_artifacts(
    report: &BenchmarkReport,
    dir: &Path,
) -> Result<Vec<PathBuf>, BenchError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut written = Vec::new();

    let summary_path = dir.join("summary.csv");
    tokio::fs::write(&summary_path, export_summary_csv(report)?).await?;
    written.push(summary_path);

    for run in report.runs().filter(|r| !r.buckets.is_empty()) {
        let path = dir.join(format!("{}_buckets.csv", artifact_file_name(&run.variant_name)));
        tokio::fs::write(&path, export_buckets_csv(run)?).await?;
        written.push(path);
    }

    tracing::info!(dir = %dir.display(), files = written.len(), "wrote CSV artifacts");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::engine::aggregator::ResultAggregator;
    use crate::results::tests::make_run;
    use crate::results::{VariantOutcome, VariantReport};

    fn report() -> BenchmarkReport {
        let mut run = make_run("no_filter", &[10.0, 12.0, 14.0, 30.0]);
        run.finalize(&ResultAggregator::default()).unwrap();
        BenchmarkReport::new(
            "bookinfo",
            Utc::now(),
            vec![
                VariantReport {
                    variant_name: "no_filter".to_string(),
                    outcome: VariantOutcome::Completed { run: Box::new(run) },
                },
                VariantReport {
                    variant_name: "snicket filter".to_string(),
                    outcome: VariantOutcome::DeployFailed {
                        error: "exit 1".to_string(),
                    },
                },
            ],
        )
    }

    // -----------------------------------------------------------------------
    // CSV
    // -----------------------------------------------------------------------

    #[test]
    fn buckets_csv_has_header_and_one_row_per_bucket() {
        let r = report();
        let run = r.runs().next().unwrap();
        let csv = export_buckets_csv(run).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "range_start_ms,range_end_ms,count,cumulative_percent");
        assert_eq!(lines.len(), 1 + run.buckets.len());
        assert!(lines.last().unwrap().ends_with(",100.00"));
    }

    #[test]
    fn summary_csv_lists_every_variant() {
        let csv = export_summary_csv(&report()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert!(lines[0].starts_with("variant,status,started_at,total_probes"));
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("no_filter,completed,"));
        assert!(lines[1].contains(",4,4,0,0,0,"));
        assert!(lines[2].starts_with("snicket filter,deploy_failed,,,"));
    }

    #[test]
    fn json_export_contains_status_and_variants() {
        let json = export_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"]["code"], "deploy_failure");
        assert_eq!(value["variants"][0]["status"], "completed");
        assert_eq!(value["variants"][1]["error"], "exit 1");
    }

    #[test]
    fn buckets_table_has_one_line_per_bucket() {
        let r = report();
        let run = r.runs().next().unwrap();
        let table = format_buckets_table(&run.buckets);
        assert_eq!(table.lines().count(), 1 + run.buckets.len());
        assert!(table.contains("100.00%"));
    }

    // -----------------------------------------------------------------------
    // artifact_file_name
    // -----------------------------------------------------------------------

    #[test]
    fn artifact_file_name_replaces_unsafe_chars() {
        assert_eq!(artifact_file_name("snicket_filter"), "snicket_filter");
        assert_eq!(artifact_file_name("span filter/v2"), "span_filter_v2");
        assert_eq!(artifact_file_name("  "), "variant");
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn write_report_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.json");
        write_report(&report(), &path).await.unwrap();
        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: BenchmarkReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.name, "bookinfo");
        assert_eq!(parsed.variants.len(), 2);
    }

    #[tokio::test]
    async fn csv_artifacts_skip_variants_without_buckets() {
        let dir = TempDir::new().unwrap();
        let written = write_csv_artifacts(&report(), dir.path()).await.unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["summary.csv", "no_filter_buckets.csv"]);
        assert!(dir.path().join("no_filter_buckets.csv").exists());
    }
}
