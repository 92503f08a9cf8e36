use crate::k8s::k8s_common;
use crate::reload::{ReloadCommand, DEFAULT_RUNTIME, DEFAULT_SETUP_ENTRYPOINT};
use crate::supervisor::pid_record::DEFAULT_PID_FILE;
use crate::supervisor::supervisor_loop::ReloadFailurePolicy;
use crate::supervisor::RestartPolicy;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Starts pgAdmin, keeps it alive and reloads its shared servers whenever
/// the mounted cluster file changes.
#[derive(Debug, Clone, Parser)]
#[command(name = "pgadmin-supervisor", version)]
pub struct EnvParams {
    /// File whose modification triggers a server reload.
    pub artifact: PathBuf,

    /// User the servers are registered to. Derived from the instance name and
    /// namespace when not set.
    #[arg(long, env = "PGADMIN_SETUP_EMAIL")]
    pub admin_identity: Option<String>,

    #[arg(long, env = "PGADMIN_INSTANCE_NAME")]
    pub instance_name: Option<String>,

    /// Defaults to the namespace of the pod's service account.
    #[arg(long, env = "POD_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "SUPERVISOR_POLL_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_secs: u64,

    #[arg(long, env = "PGADMIN4_PIDFILE", default_value = DEFAULT_PID_FILE)]
    pub pid_file: PathBuf,

    #[arg(long, env = "PGADMIN_RUNTIME", default_value = DEFAULT_RUNTIME)]
    pub runtime: String,

    #[arg(long, env = "PGADMIN_SETUP_ENTRYPOINT", default_value = DEFAULT_SETUP_ENTRYPOINT)]
    pub setup_entrypoint: PathBuf,

    /// Do not run the first-time setup before starting the service.
    #[arg(long, env = "PGADMIN_SKIP_SETUP")]
    pub skip_setup: bool,

    #[arg(long, value_enum, env = "SUPERVISOR_RELOAD_FAILURE_POLICY", default_value_t)]
    pub reload_failure_policy: ReloadFailurePolicy,

    /// Minimum seconds between two starts of the service.
    #[arg(long, env = "SUPERVISOR_RESTART_MIN_INTERVAL_SECS", default_value_t = 0)]
    pub restart_min_interval_secs: u64,

    /// Give up after this many restarts. Unlimited when unset.
    #[arg(long, env = "SUPERVISOR_MAX_RESTARTS")]
    pub max_restarts: Option<u32>,

    #[arg(long, env = "SUPERVISOR_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,

    /// Address for the liveness probe server. Disabled when unset.
    #[arg(long, env = "SUPERVISOR_PROBE_ADDR")]
    pub probe_addr: Option<SocketAddr>,

    #[arg(long, value_enum, env = "SUPERVISOR_LOG_FORMAT", default_value_t)]
    pub log_format: LogFormat,

    /// Service command line.
    #[arg(last = true, default_values_t = vec!["pgadmin4".to_string()])]
    pub service: Vec<String>,
}

impl EnvParams {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            min_interval: Duration::from_secs(self.restart_min_interval_secs),
            max_restarts: self.max_restarts,
        }
    }

    pub fn reload_command(&self) -> ReloadCommand {
        ReloadCommand::new(self.runtime.clone(), self.setup_entrypoint.clone())
    }

    /// The explicit identity, else `admin@<instance>.<namespace>.svc`.
    pub async fn resolve_admin_identity(&self) -> Result<String, std::io::Error> {
        if let Some(identity) = &self.admin_identity {
            return Ok(identity.clone());
        }
        let name = self.instance_name.as_deref().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "either --admin-identity or --instance-name must be set",
            )
        })?;
        let namespace = match &self.namespace {
            Some(namespace) => namespace.clone(),
            None => k8s_common::get_namespace().await?,
        };
        Ok(k8s_common::admin_identity(name, &namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_behaviour() {
        let params = EnvParams::try_parse_from(["pgadmin-supervisor", "/conf/clusters.json"]).unwrap();

        assert_eq!(params.artifact, PathBuf::from("/conf/clusters.json"));
        assert_eq!(params.poll_interval(), Duration::from_secs(5));
        assert_eq!(params.pid_file, PathBuf::from("/tmp/pgadmin4.pid"));
        assert_eq!(params.reload_failure_policy, ReloadFailurePolicy::Advance);
        assert_eq!(params.restart_policy().max_restarts, None);
        assert_eq!(params.restart_policy().min_interval, Duration::ZERO);
        assert_eq!(params.service, vec!["pgadmin4".to_string()]);
        assert_eq!(params.log_format, LogFormat::Text);
        assert!(params.probe_addr.is_none());
    }

    #[test]
    fn trailing_arguments_form_the_service_command() {
        let params = EnvParams::try_parse_from([
            "pgadmin-supervisor",
            "--reload-failure-policy",
            "retry",
            "--max-restarts",
            "3",
            "/conf/clusters.json",
            "--",
            "gunicorn",
            "--bind",
            "0.0.0.0:5050",
        ])
        .unwrap();

        assert_eq!(params.reload_failure_policy, ReloadFailurePolicy::Retry);
        assert_eq!(params.restart_policy().max_restarts, Some(3));
        assert_eq!(params.service, vec!["gunicorn", "--bind", "0.0.0.0:5050"]);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let parsed = EnvParams::try_parse_from([
            "pgadmin-supervisor",
            "--poll-interval-secs",
            "0",
            "/conf/clusters.json",
        ]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn identity_is_derived_from_instance_and_namespace() {
        let mut params = EnvParams::try_parse_from([
            "pgadmin-supervisor",
            "--instance-name",
            "hippo",
            "--namespace",
            "demo",
            "/conf/clusters.json",
        ])
        .unwrap();
        // PGADMIN_SETUP_EMAIL may be present in the test environment
        params.admin_identity = None;

        assert_eq!(
            params.resolve_admin_identity().await.unwrap(),
            "admin@hippo.demo.svc"
        );
    }

    #[tokio::test]
    async fn explicit_identity_wins() {
        let mut params = EnvParams::try_parse_from(["pgadmin-supervisor", "/conf/clusters.json"]).unwrap();
        params.admin_identity = Some("ops@example.com".to_string());
        params.instance_name = Some("hippo".to_string());

        assert_eq!(params.resolve_admin_identity().await.unwrap(), "ops@example.com");
    }
}
