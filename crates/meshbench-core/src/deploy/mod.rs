use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::BenchError;
use crate::plan::model::VariantConfig;

/// Placeholder replaced by the variant name in command arguments.
pub const VARIANT_PLACEHOLDER: &str = "{variant}";

/// Longest stderr excerpt carried into a deploy error.
const MAX_STDERR_EXCERPT: usize = 2048;

// ---------------------------------------------------------------------------
// DeployHook
// ---------------------------------------------------------------------------

/// Puts a variant in place before it is measured and removes it afterwards.
///
/// Implementations talk to the outside world (cluster tooling, filter build
/// scripts) and are expected to block until the change has been applied.
#[async_trait]
pub trait DeployHook: Send + Sync {
    async fn deploy(&self, variant: &str) -> Result<(), BenchError>;
    async fn undeploy(&self, variant: &str) -> Result<(), BenchError>;
}

/// Hook for a variant that needs no setup, such as the unfiltered baseline.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

#[async_trait]
impl DeployHook for NoopHook {
    async fn deploy(&self, variant: &str) -> Result<(), BenchError> {
        tracing::debug!(variant, "no deploy step configured");
        Ok(())
    }

    async fn undeploy(&self, variant: &str) -> Result<(), BenchError> {
        tracing::debug!(variant, "no undeploy step configured");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CommandHook
// ---------------------------------------------------------------------------

/// Runs external programs to deploy and undeploy. A missing command is a
/// no-op for that step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandHook {
    deploy: Option<Vec<String>>,
    undeploy: Option<Vec<String>>,
}

impl CommandHook {
    pub fn new(deploy: Option<Vec<String>>, undeploy: Option<Vec<String>>) -> Self {
        Self { deploy, undeploy }
    }

    async fn run_step(
        &self,
        step: &str,
        argv: Option<&Vec<String>>,
        variant: &str,
    ) -> Result<(), BenchError> {
        let Some(argv) = argv else {
            return Ok(());
        };
        let argv: Vec<String> = argv
            .iter()
            .map(|arg| arg.replace(VARIANT_PLACEHOLDER, variant))
            .collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(BenchError::Deploy {
                variant: variant.to_string(),
                message: format!("{step} command is empty"),
            });
        };

        tracing::info!(variant, step, command = %argv.join(" "), "running hook command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| BenchError::Deploy {
            variant: variant.to_string(),
            message: format!("failed to spawn {step} command '{program}': {e}"),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let excerpt = if stderr.len() > MAX_STDERR_EXCERPT {
            let mut cut = stderr.len() - MAX_STDERR_EXCERPT;
            while !stderr.is_char_boundary(cut) {
                cut += 1;
            }
            &stderr[cut..]
        } else {
            stderr
        };
        Err(BenchError::Deploy {
            variant: variant.to_string(),
            message: format!("{step} command '{program}' exited with {}: {excerpt}", output.status),
        })
    }
}

#[async_trait]
impl DeployHook for CommandHook {
    async fn deploy(&self, variant: &str) -> Result<(), BenchError> {
        self.run_step("deploy", self.deploy.as_ref(), variant).await
    }

    async fn undeploy(&self, variant: &str) -> Result<(), BenchError> {
        self.run_step("undeploy", self.undeploy.as_ref(), variant).await
    }
}

/// Build the hook described by a variant's configuration.
pub fn hook_for(config: &VariantConfig) -> Arc<dyn DeployHook> {
    if config.deploy.is_none() && config.undeploy.is_none() {
        Arc::new(NoopHook)
    } else {
        Arc::new(CommandHook::new(
            config.deploy.clone(),
            config.undeploy.clone(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
