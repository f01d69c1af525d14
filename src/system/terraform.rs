//! Infrastructure engine backed by the `terraform` binary.
//!
//! Output from the child process is streamed line by line into the `log`
//! facade under the `terraform` target so a failed apply leaves a readable
//! trail in the run log.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context};
use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{ExternalResult, InfraEngine};
use crate::models::InfraOptions;

/// `InfraEngine` that shells out to terraform: `init` + `apply` for deploy,
/// `destroy` for teardown, variables passed as `-var name=value`.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
}

impl Default for TerraformCli {
    fn default() -> Self {
        TerraformCli {
            binary: PathBuf::from("terraform"),
        }
    }
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        TerraformCli {
            binary: binary.into(),
        }
    }

    async fn run(&self, options: &InfraOptions, args: Vec<String>) -> ExternalResult<()> {
        let subcommand = args.first().cloned().unwrap_or_default();
        log::info!(
            "[Infra] [{}] {} {} (in {})",
            subcommand,
            self.binary.display(),
            args.join(" "),
            options.working_dir.display()
        );

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&options.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("failed to capture terraform stdout")?;
        let stderr = child
            .stderr
            .take()
            .context("failed to capture terraform stderr")?;

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_closed = false;
        let mut stderr_closed = false;

        while !(stdout_closed && stderr_closed) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_closed => match line {
                    Ok(Some(line)) => log::info!(target: "terraform", "{}", line),
                    Ok(None) => stdout_closed = true,
                    Err(e) => {
                        log::warn!(target: "terraform", "stdout read error: {}", e);
                        stdout_closed = true;
                    }
                },
                line = stderr_lines.next_line(), if !stderr_closed => match line {
                    Ok(Some(line)) => log::warn!(target: "terraform", "[STDERR] {}", line),
                    Ok(None) => stderr_closed = true,
                    Err(e) => {
                        log::warn!(target: "terraform", "stderr read error: {}", e);
                        stderr_closed = true;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .context("failed to wait for terraform")?;
        if !status.success() {
            match status.code() {
                Some(code) => bail!("terraform {} failed with exit code {}", subcommand, code),
                None => bail!("terraform {} terminated by signal", subcommand),
            }
        }
        Ok(())
    }
}

fn init_args() -> Vec<String> {
    vec!["init".to_string(), "-input=false".to_string()]
}

fn mutate_args(subcommand: &str, options: &InfraOptions) -> Vec<String> {
    let mut args = vec![
        subcommand.to_string(),
        "-input=false".to_string(),
        "-auto-approve".to_string(),
    ];
    for pair in options.var_args() {
        args.push("-var".to_string());
        args.push(pair);
    }
    args
}

impl InfraEngine for TerraformCli {
    fn apply_all<'a>(&'a self, options: &'a InfraOptions) -> BoxFuture<'a, ExternalResult<()>> {
        async move {
            self.run(options, init_args()).await?;
            self.run(options, mutate_args("apply", options)).await
        }
        .boxed()
    }

    fn destroy_all<'a>(
        &'a self,
        options: &'a InfraOptions,
    ) -> BoxFuture<'a, ExternalResult<()>> {
        async move {
            // destroy needs initialized providers too when run from a fresh process
            self.run(options, init_args()).await?;
            self.run(options, mutate_args("destroy", options)).await
        }
        .boxed()
    }
}
