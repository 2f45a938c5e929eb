use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshbench_core::engine::{run_config, RateScheduler, ResultAggregator};
use meshbench_core::http::{HttpClient, RequestProbe};
use meshbench_core::plan::templates::{self, BoutiqueRequest};
use meshbench_core::plan::{
    read_config, validate_config, write_config, BenchConfig, HttpMethod, InclusionPolicy,
    LoadSpec, PayloadParam,
};
use meshbench_core::results::export::{format_buckets_table, write_csv_artifacts, write_report};
use meshbench_core::results::{compare_to_baseline, BenchmarkReport, BenchmarkRun, RunStatus};
use meshbench_core::BenchError;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fixed-rate latency benchmarks for service-mesh filter variants"
)]
struct Cli {
    /// Log filter, e.g. "info" or "meshbench_core=debug". Overrides RUST_LOG.
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy, measure and undeploy every variant of a config file.
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Write the JSON report here.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write summary.csv and per-variant bucket CSVs into this directory.
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },

    /// Run a single schedule against a URL without deploy hooks.
    Load {
        #[arg(long)]
        url: String,

        #[arg(long, value_enum, default_value_t = MethodArg::Get)]
        method: MethodArg,

        /// Requests issued per one-second tick.
        #[arg(long, default_value_t = 10)]
        rate: u32,

        /// Number of ticks.
        #[arg(long, default_value_t = 30)]
        duration: u32,

        /// Maximum requests in flight.
        #[arg(long, default_value_t = 10)]
        concurrency: u32,

        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,

        #[arg(long, default_value_t = 10)]
        buckets: usize,

        /// Payload parameter as NAME=VALUE, or NAME=A|B|C to pick one value
        /// at random per request.
        #[arg(long = "param", value_name = "NAME=VALUE", action = clap::ArgAction::Append)]
        params: Vec<String>,

        /// Bucket every response instead of only successful ones.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        include_errors: bool,
    },

    /// Check a config file and list every problem found.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },

    /// Write a sample config file.
    Init {
        #[arg(long)]
        config: PathBuf,

        #[arg(long, value_enum, default_value_t = TemplateArg::Bookinfo)]
        template: TemplateArg,

        /// Shopper request measured by the online-boutique template.
        #[arg(long, value_enum, default_value_t = RequestArg::SetCurrency)]
        request: RequestArg,

        /// Ingress gateway base URL of the cluster under test.
        #[arg(long, default_value = "http://localhost:8080")]
        gateway: String,

        /// Overwrite an existing file.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum MethodArg {
    Get,
    Post,
}

impl From<MethodArg> for HttpMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Get => HttpMethod::Get,
            MethodArg::Post => HttpMethod::Post,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum TemplateArg {
    Bookinfo,
    OnlineBoutique,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RequestArg {
    Index,
    SetCurrency,
    BrowseProduct,
    ViewCart,
    AddToCart,
    Checkout,
}

impl From<RequestArg> for BoutiqueRequest {
    fn from(arg: RequestArg) -> Self {
        match arg {
            RequestArg::Index => BoutiqueRequest::Index,
            RequestArg::SetCurrency => BoutiqueRequest::SetCurrency,
            RequestArg::BrowseProduct => BoutiqueRequest::BrowseProduct,
            RequestArg::ViewCart => BoutiqueRequest::ViewCart,
            RequestArg::AddToCart => BoutiqueRequest::AddToCart,
            RequestArg::Checkout => BoutiqueRequest::Checkout,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    match cli.command {
        Command::Run {
            config,
            output,
            csv_dir,
        } => run(&config, output.as_deref(), csv_dir.as_deref()).await,
        Command::Load {
            url,
            method,
            rate,
            duration,
            concurrency,
            timeout_ms,
            buckets,
            params,
            include_errors,
        } => {
            let mut spec = LoadSpec::new(url);
            spec.method = method.into();
            spec.rate_qps = rate;
            spec.duration_seconds = duration;
            spec.concurrency = concurrency;
            spec.per_request_timeout_ms = timeout_ms;
            spec.payload = params
                .iter()
                .map(|p| parse_param(p))
                .collect::<Result<Vec<_>>>()?;
            let inclusion = if include_errors {
                InclusionPolicy::CompletedResponses
            } else {
                InclusionPolicy::SuccessOnly
            };
            load(spec, ResultAggregator::new(buckets, inclusion)).await
        }
        Command::Validate { config } => validate(&config).await,
        Command::Init {
            config,
            template,
            request,
            gateway,
            force,
        } => init(&config, template_config(template, request, &gateway), force).await,
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log filter '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping at the next tick boundary");
            token.cancel();
        }
    });
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn run(config_path: &Path, output: Option<&Path>, csv_dir: Option<&Path>) -> Result<ExitCode> {
    let config = read_config(config_path)
        .await
        .with_context(|| format!("reading config {}", config_path.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let report = run_config(&config, cancel)
        .await
        .context("benchmark could not start")?;

    print_report(&report);

    if let Some(path) = output {
        write_report(&report, path)
            .await
            .with_context(|| format!("writing report {}", path.display()))?;
    }
    if let Some(dir) = csv_dir {
        write_csv_artifacts(&report, dir)
            .await
            .with_context(|| format!("writing CSV files to {}", dir.display()))?;
    }

    if report.status == RunStatus::Success {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn load(spec: LoadSpec, aggregator: ResultAggregator) -> Result<ExitCode> {
    let client = HttpClient::for_spec(&spec)?;
    let probe = Arc::new(RequestProbe::new(client));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let outcome = RateScheduler::new(probe)
        .with_cancel_token(cancel)
        .run(&spec, None)
        .await
        .context("load run could not start")?;

    let mut run = BenchmarkRun::from_schedule("ad-hoc", spec, outcome);
    let bucketed = run.finalize(&aggregator);
    println!("{}", summary_line(&run));

    match bucketed {
        Ok(()) => {
            print!("{}", format_buckets_table(&run.buckets));
            Ok(ExitCode::SUCCESS)
        }
        Err(BenchError::InsufficientData(reason)) => {
            warn!("no latency histogram: {reason}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn validate(config_path: &Path) -> Result<ExitCode> {
    let config = read_config(config_path)
        .await
        .with_context(|| format!("reading config {}", config_path.display()))?;

    let errors = validate_config(&config);
    if errors.is_empty() {
        println!(
            "{}: ok ({} variants)",
            config_path.display(),
            config.variants.len()
        );
        return Ok(ExitCode::SUCCESS);
    }
    for e in &errors {
        println!("{}: {e}", config_path.display());
    }
    Ok(ExitCode::FAILURE)
}

fn template_config(template: TemplateArg, request: RequestArg, gateway: &str) -> BenchConfig {
    match template {
        TemplateArg::Bookinfo => templates::bookinfo(gateway),
        TemplateArg::OnlineBoutique => templates::online_boutique(gateway, request.into()),
    }
}

async fn init(path: &Path, config: BenchConfig, force: bool) -> Result<ExitCode> {
    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    write_config(&config, path)
        .await
        .with_context(|| format!("writing config {}", path.display()))?;
    info!(path = %path.display(), name = %config.name, "wrote sample config");
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_report(report: &BenchmarkReport) {
    for v in &report.variants {
        match v.outcome.run() {
            Some(run) => println!("{} [{}] {}", v.variant_name, v.outcome.label(), summary_line(run)),
            None => println!("{} [{}]", v.variant_name, v.outcome.label()),
        }
    }
    for cmp in compare_to_baseline(report) {
        println!(
            "{} vs {}: mean {:+.2}ms  p50 {:+.2}ms  p95 {:+.2}ms  p99 {:+.2}ms",
            cmp.variant,
            cmp.baseline,
            cmp.delta_mean_ms,
            cmp.delta_p50_ms,
            cmp.delta_p95_ms,
            cmp.delta_p99_ms
        );
    }
    println!("status: {}", report.status);
}

fn summary_line(run: &BenchmarkRun) -> String {
    let s = &run.summary;
    format!(
        "probes={} ok={} http_err={} timeout={} conn_err={} qps={:.2} mean={:.2}ms p50={:.2}ms p99={:.2}ms{}",
        s.total_probes,
        s.successful,
        s.http_errors,
        s.timeouts,
        s.connection_errors,
        run.achieved_qps,
        s.mean_ms,
        s.p50_ms,
        s.p99_ms,
        if run.deadline_reached { " (stopped early)" } else { "" }
    )
}

/// Parse `NAME=VALUE` or `NAME=A|B|C`.
fn parse_param(raw: &str) -> Result<PayloadParam> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("payload parameter '{raw}' must look like NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("payload parameter '{raw}' has an empty name");
    }
    if value.contains('|') {
        Ok(PayloadParam::one_of(name, value.split('|')))
    } else {
        Ok(PayloadParam::fixed(name, value))
    }
}
