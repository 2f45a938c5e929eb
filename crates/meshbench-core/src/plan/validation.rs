use std::collections::HashSet;

use crate::error::BenchError;
use crate::http::payload::placeholders;
use crate::plan::model::{
    BenchConfig, LoadSpec, ParamValue, PayloadParam, RunnerSettings, VariantConfig,
};

/// Validate a [`BenchConfig`] and return a list of validation errors.
///
/// An empty `Vec` means the configuration is valid.
pub fn validate_config(config: &BenchConfig) -> Vec<BenchError> {
    let mut errors = validate_spec(&config.spec);
    errors.extend(validate_runner(&config.runner));

    if config.variants.is_empty() {
        errors.push(BenchError::Validation(
            "At least one variant must be configured".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for variant in &config.variants {
        errors.extend(validate_variant(variant));
        if !seen.insert(variant.name.trim()) {
            errors.push(BenchError::Validation(format!(
                "Variant '{}' is defined more than once",
                variant.name
            )));
        }
    }

    errors
}

/// Validate a [`LoadSpec`] on its own.
pub fn validate_spec(spec: &LoadSpec) -> Vec<BenchError> {
    let mut errors = Vec::new();

    let url = spec.target_url.trim();
    if url.is_empty() {
        errors.push(BenchError::Validation(
            "target_url must not be empty".to_string(),
        ));
    } else if !url.starts_with("http://") && !url.starts_with("https://") {
        errors.push(BenchError::Validation(format!(
            "target_url must start with http:// or https:// (got: {})",
            spec.target_url
        )));
    }

    if spec.concurrency == 0 {
        errors.push(BenchError::Validation(
            "concurrency must be at least 1".to_string(),
        ));
    }
    if spec.rate_qps == 0 {
        errors.push(BenchError::Validation(
            "rate_qps must be at least 1".to_string(),
        ));
    }
    if spec.duration_seconds == 0 {
        errors.push(BenchError::Validation(
            "duration_seconds must be at least 1".to_string(),
        ));
    }
    if spec.per_request_timeout_ms == 0 {
        errors.push(BenchError::Validation(
            "per_request_timeout_ms must be at least 1".to_string(),
        ));
    }

    errors.extend(validate_params("Payload", &spec.payload));
    errors.extend(validate_params("Variable", &spec.vars));

    let declared: HashSet<&str> = spec.vars.iter().map(|v| v.name.as_str()).collect();
    let mut check_placeholders = |text: &str, place: String| {
        for name in placeholders(text) {
            if !declared.contains(name) {
                errors.push(BenchError::Validation(format!(
                    "{place} uses '{{{name}}}' but no variable '{name}' is defined"
                )));
            }
        }
    };
    check_placeholders(&spec.target_url, "target_url".to_string());
    for param in &spec.payload {
        if let ParamValue::Fixed(value) = &param.value {
            check_placeholders(value, format!("Payload parameter '{}'", param.name));
        }
    }
    for (i, step) in spec.steps.iter().enumerate() {
        check_placeholders(&step.path, format!("Step {}", i + 1));
        for param in &step.payload {
            if let ParamValue::Fixed(value) = &param.value {
                check_placeholders(value, format!("Step {} parameter '{}'", i + 1, param.name));
            }
        }
    }

    for (i, step) in spec.steps.iter().enumerate() {
        if step.path.trim().is_empty() {
            errors.push(BenchError::Validation(format!(
                "Step {} path must not be empty",
                i + 1
            )));
        }
        errors.extend(validate_params(&format!("Step {}", i + 1), &step.payload));
    }

    errors
}

fn validate_params(kind: &str, params: &[PayloadParam]) -> Vec<BenchError> {
    let mut errors = Vec::new();
    for param in params {
        if param.name.trim().is_empty() {
            errors.push(BenchError::Validation(format!(
                "{kind} parameter name must not be empty"
            )));
        }
        if let ParamValue::OneOf(values) = &param.value {
            if values.is_empty() {
                errors.push(BenchError::Validation(format!(
                    "{kind} parameter '{}' has an empty choice list",
                    param.name
                )));
            }
        }
    }
    errors
}

fn validate_runner(runner: &RunnerSettings) -> Vec<BenchError> {
    let mut errors = Vec::new();

    if runner.num_buckets == 0 {
        errors.push(BenchError::Validation(
            "num_buckets must be at least 1".to_string(),
        ));
    }
    if !(100..=599).contains(&runner.success_status) {
        errors.push(BenchError::Validation(format!(
            "success_status must be a valid HTTP status code (got: {})",
            runner.success_status
        )));
    }
    if runner.deadline_seconds == Some(0) {
        errors.push(BenchError::Validation(
            "deadline_seconds must be at least 1 when set".to_string(),
        ));
    }

    errors
}

fn validate_variant(variant: &VariantConfig) -> Vec<BenchError> {
    let mut errors = Vec::new();

    if variant.name.trim().is_empty() {
        errors.push(BenchError::Validation(
            "Variant name must not be empty".to_string(),
        ));
    }

    for (label, argv) in [("deploy", &variant.deploy), ("undeploy", &variant.undeploy)] {
        if let Some(argv) = argv {
            if argv.first().map_or(true, |program| program.trim().is_empty()) {
                errors.push(BenchError::Validation(format!(
                    "Variant '{}': {label} command must name a program",
                    variant.name
                )));
            }
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
