//! Running command plans against the backend
//!
//! The [`Executor`] trait is the single seam between the kill switch and the
//! host: it receives an ordered list of [`Command`]s and runs them one after
//! another. [`SystemExecutor`] spawns the real backend binaries through the
//! elevation layer, [`DryRunExecutor`] prints what would run, and tests
//! substitute a recording fake.
//!
//! # Failure policy
//!
//! The backend's exit status is not acted upon by default
//! ([`FailurePolicy::Ignore`]): a failing command never stops the sequence
//! and the caller sees success. This keeps `off()` and `close_by_ip()`
//! tolerant of missing rules, but also hides real failures. The stricter
//! policies are opt-in:
//!
//! - [`FailurePolicy::Report`] runs everything and returns the failures in
//!   the [`ExecutionReport`]
//! - [`FailurePolicy::Abort`] stops at the first failure
//!
//! Failing to build the elevated command (unknown `DRKS_ELEVATION_METHOD`,
//! missing helper) returns [`Error::Elevation`] under every policy.

use crate::core::backend::{Backend, Invocation, Program};
use crate::core::command::Command;
use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// What to do when a backend invocation fails
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FailurePolicy {
    /// Never inspect exit status; always run the full sequence
    #[default]
    Ignore,
    /// Run the full sequence and report every failure afterwards
    Report,
    /// Stop at the first failing invocation
    Abort,
}

/// Locations of the backend binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPaths {
    #[serde(default = "default_firewall_cmd")]
    pub firewall_cmd: PathBuf,
    #[serde(default = "default_iptables")]
    pub iptables: PathBuf,
    #[serde(default = "default_ip6tables")]
    pub ip6tables: PathBuf,
}

impl Default for BackendPaths {
    fn default() -> Self {
        Self {
            firewall_cmd: default_firewall_cmd(),
            iptables: default_iptables(),
            ip6tables: default_ip6tables(),
        }
    }
}

fn default_firewall_cmd() -> PathBuf {
    PathBuf::from(option_env!("DRKS_SYSTEM_FIREWALL_CMD").unwrap_or("firewall-cmd"))
}

fn default_iptables() -> PathBuf {
    PathBuf::from("iptables")
}

fn default_ip6tables() -> PathBuf {
    PathBuf::from("ip6tables")
}

impl BackendPaths {
    pub fn resolve(&self, program: Program) -> &Path {
        match program {
            Program::FirewallCmd => &self.firewall_cmd,
            Program::Iptables => &self.iptables,
            Program::Ip6tables => &self.ip6tables,
        }
    }
}

/// Settings threaded into an executor at construction
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Suppress progress logging and discard backend output
    pub quiet: bool,
    pub failure_policy: FailurePolicy,
    pub paths: BackendPaths,
}

/// A backend invocation that did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedInvocation {
    pub invocation: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Outcome of executing one command plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Invocations actually started
    pub executed: usize,
    /// Commands with no equivalent on the active backend
    pub skipped: usize,
    /// Failures observed under [`FailurePolicy::Report`]
    pub failures: Vec<FailedInvocation>,
}

impl ExecutionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs an ordered command plan.
///
/// Implementations must run commands strictly in the given order, each one
/// completing before the next starts.
#[allow(async_fn_in_trait)]
pub trait Executor {
    async fn execute(&mut self, commands: &[Command]) -> Result<ExecutionReport>;
}

/// Executes commands by spawning the backend binaries
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    backend: Backend,
    config: ExecutorConfig,
}

impl SystemExecutor {
    pub fn new(backend: Backend, config: ExecutorConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Spawns one invocation and waits for it.
    ///
    /// Returns the failure, if any; whether it matters is up to the policy.
    /// Failing to elevate is always an error: every later invocation would
    /// fail the same way.
    async fn run(&self, invocation: &Invocation) -> Result<Option<FailedInvocation>> {
        let program = self.config.paths.resolve(invocation.program);
        let capture = self.config.failure_policy != FailurePolicy::Ignore;

        let mut cmd = crate::elevation::create_elevated_backend_command(program, &invocation.args)?;

        cmd.stdin(Stdio::null());
        cmd.stdout(if self.config.quiet {
            Stdio::null()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(match (capture, self.config.quiet) {
            (true, _) => Stdio::piped(),
            (false, true) => Stdio::null(),
            (false, false) => Stdio::inherit(),
        });

        let failure = match cmd.output().await {
            Ok(output) if output.status.success() => None,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if capture && !self.config.quiet && !stderr.is_empty() {
                    warn!("{stderr}");
                }
                Some(FailedInvocation {
                    invocation: invocation.to_string(),
                    exit_code: output.status.code(),
                    stderr,
                })
            }
            Err(e) => Some(FailedInvocation {
                invocation: invocation.to_string(),
                exit_code: None,
                stderr: format!("failed to spawn {}: {e}", program.display()),
            }),
        };
        Ok(failure)
    }
}

impl Executor for SystemExecutor {
    async fn execute(&mut self, commands: &[Command]) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        for command in commands {
            let Some(invocation) = self.backend.render(command) else {
                debug!(kind = %command.kind(), backend = %self.backend, "No backend equivalent, skipping");
                report.skipped += 1;
                continue;
            };

            if !self.config.quiet {
                info!("Applying: {invocation}");
            }

            let failure = self.run(&invocation).await?;
            report.executed += 1;

            let Some(failure) = failure else {
                continue;
            };

            match self.config.failure_policy {
                FailurePolicy::Ignore => {
                    debug!(
                        exit_code = ?failure.exit_code,
                        "Ignoring failed invocation: {}", failure.invocation
                    );
                }
                FailurePolicy::Report => report.failures.push(failure),
                FailurePolicy::Abort => {
                    return Err(Error::Backend {
                        message: format!("'{}' failed", failure.invocation),
                        stderr: Some(failure.stderr),
                        exit_code: failure.exit_code,
                    });
                }
            }
        }

        Ok(report)
    }
}

/// Prints rendered invocations to stdout instead of running them
#[derive(Debug, Clone)]
pub struct DryRunExecutor {
    backend: Backend,
    /// Every line printed so far
    pub lines: Vec<String>,
}

impl DryRunExecutor {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            lines: Vec::new(),
        }
    }
}

impl Executor for DryRunExecutor {
    async fn execute(&mut self, commands: &[Command]) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();
        for command in commands {
            match self.backend.render(command) {
                Some(invocation) => {
                    let line = invocation.to_string();
                    println!("{line}");
                    self.lines.push(line);
                    report.executed += 1;
                }
                None => report.skipped += 1,
            }
        }
        Ok(report)
    }
}
