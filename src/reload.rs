//! Running the application's setup entrypoint, both for the first-time setup
//! and for replacing the registered servers from the watched artifact.

use crate::error::{Result, SupervisorError};
use crate::supervisor::results::ReloadResult;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info, warn};

pub const DEFAULT_RUNTIME: &str = "python3";
pub const DEFAULT_SETUP_ENTRYPOINT: &str = "/usr/local/lib/python3.11/site-packages/pgadmin4/setup.py";

/// `<runtime> <setup-entrypoint>`, optionally followed by the load-servers
/// arguments.
#[derive(Debug, Clone)]
pub struct ReloadCommand {
    runtime: String,
    entrypoint: PathBuf,
}

impl ReloadCommand {
    pub fn new(runtime: impl Into<String>, entrypoint: impl Into<PathBuf>) -> Self {
        Self {
            runtime: runtime.into(),
            entrypoint: entrypoint.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn entrypoint(&self) -> &Path {
        &self.entrypoint
    }

    /// Arguments that replace every server registered to `admin_identity`
    /// with the contents of `artifact`.
    pub fn reload_args(&self, artifact: &Path, admin_identity: &str) -> Vec<OsString> {
        vec![
            self.entrypoint.clone().into_os_string(),
            "--load-servers".into(),
            artifact.as_os_str().to_owned(),
            "--user".into(),
            admin_identity.into(),
            "--replace".into(),
        ]
    }

    pub fn render(&self, args: &[OsString]) -> String {
        std::iter::once(self.runtime.clone())
            .chain(args.iter().map(|arg| arg.to_string_lossy().into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runs the entrypoint without arguments. Any failure is fatal since the
    /// application cannot be served without its initial setup.
    pub async fn run_setup(&self) -> Result<()> {
        let args = vec![self.entrypoint.clone().into_os_string()];
        let rendered = self.render(&args);
        info!(command = %rendered, "running first-time setup");

        let status = Command::new(&self.runtime)
            .args(&args)
            .status()
            .await
            .map_err(|source| SupervisorError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SupervisorError::Setup {
                command: rendered,
                code: status.code(),
            });
        }
        Ok(())
    }
}

/// Applies the artifact to the running application.
#[async_trait]
pub trait ReloadInvoker: Send + Sync {
    async fn invoke(&self, artifact: &Path, admin_identity: &str) -> ReloadResult;
}

#[derive(Debug, Clone)]
pub struct CommandReloadInvoker {
    command: ReloadCommand,
}

impl CommandReloadInvoker {
    pub fn new(command: ReloadCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &ReloadCommand {
        &self.command
    }
}

#[async_trait]
impl ReloadInvoker for CommandReloadInvoker {
    async fn invoke(&self, artifact: &Path, admin_identity: &str) -> ReloadResult {
        let args = self.command.reload_args(artifact, admin_identity);
        let rendered = self.command.render(&args);
        let mut result = ReloadResult::new();

        match Command::new(self.command.runtime()).args(&args).status().await {
            Ok(status) if status.success() => {
                result.set_success(status.code());
            }
            Ok(status) => {
                warn!(command = %rendered, code = ?status.code(), "reload command failed");
                result.set_failure(status.code(), format!("exited with {}", status));
            }
            Err(e) => {
                error!(command = %rendered, error = %e, "unable to run reload command");
                result.set_failure(None, e.to_string());
            }
        }
        result
    }
}
