use anyhow::Context;
use clap::Parser;
use pgadmin_supervisor::env::{EnvParams, LogFormat};
use pgadmin_supervisor::reload::CommandReloadInvoker;
use pgadmin_supervisor::server::http::http_server::start_http_server;
use pgadmin_supervisor::supervisor::pid_record::PidRecord;
use pgadmin_supervisor::supervisor::supervisor_loop::SupervisorLoop;
use pgadmin_supervisor::supervisor::{ProcessSupervisor, ServiceCommand};
use pgadmin_supervisor::watcher::ConfigWatcher;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let params = EnvParams::parse();
    init_logging(params.log_format);

    match run(params).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "supervisor failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(params: EnvParams) -> anyhow::Result<()> {
    let admin_identity = params
        .resolve_admin_identity()
        .await
        .context("unable to determine the admin identity")?;

    let reload_command = params.reload_command();
    if !params.skip_setup {
        reload_command
            .run_setup()
            .await
            .context("first-time setup failed")?;
    }

    let pid_record = PidRecord::new(&params.pid_file);
    let process = ProcessSupervisor::new(
        ServiceCommand::from_argv(params.service.clone())?,
        pid_record.clone(),
    )
    .with_restart_policy(params.restart_policy());

    let mut supervisor = SupervisorLoop::new(
        ConfigWatcher::new(&params.artifact),
        CommandReloadInvoker::new(reload_command),
        admin_identity,
        process,
    )
    .with_poll_interval(params.poll_interval())
    .with_failure_policy(params.reload_failure_policy)
    .with_shutdown_grace(params.shutdown_grace());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    if let Some(addr) = params.probe_addr {
        let probe_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(addr, pid_record, probe_cancel).await {
                error!(%addr, error = %e, "probe server failed");
            }
        });
    }

    let pid = supervisor
        .bootstrap()
        .await
        .context("unable to start the service")?;
    info!(pid, "service started");

    let result = supervisor.run(cancel.clone()).await;
    cancel.cancel();
    result.context("supervisor stopped on a fatal error")
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pgadmin_supervisor=debug"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
    cancel.cancel();
}
