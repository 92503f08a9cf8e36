use super::results::{ReloadResult, TickReport};
use super::ProcessSupervisor;
use crate::error::Result;
use crate::reload::ReloadInvoker;
use crate::watcher::{format_mtime, ConfigWatcher, WatermarkStore};
use clap::ValueEnum;
use std::time::SystemTime;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// What happens to the watermark when a reload fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReloadFailurePolicy {
    /// Advance anyway; the artifact is only retried once it changes again.
    #[default]
    Advance,
    /// Keep the old watermark so the next tick tries the same artifact again.
    Retry,
}

/// Drives config reloads and process liveness on a fixed cadence.
pub struct SupervisorLoop<R: ReloadInvoker> {
    watcher: ConfigWatcher,
    watermark: WatermarkStore,
    invoker: R,
    admin_identity: String,
    process: ProcessSupervisor,
    poll_interval: Duration,
    failure_policy: ReloadFailurePolicy,
    shutdown_grace: Duration,
}

impl<R: ReloadInvoker> SupervisorLoop<R> {
    pub fn new(
        watcher: ConfigWatcher,
        invoker: R,
        admin_identity: impl Into<String>,
        process: ProcessSupervisor,
    ) -> Self {
        Self {
            watcher,
            watermark: WatermarkStore::new(),
            invoker,
            admin_identity: admin_identity.into(),
            process,
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_policy: ReloadFailurePolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: ReloadFailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    pub fn watermark(&self) -> &WatermarkStore {
        &self.watermark
    }

    pub fn process(&self) -> &ProcessSupervisor {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut ProcessSupervisor {
        &mut self.process
    }

    /// Starts the service and loads the artifact once if it already exists.
    /// The watermark ends at the artifact's current mtime, so an untouched
    /// artifact is not reloaded by the first tick.
    pub async fn bootstrap(&mut self) -> Result<u32> {
        let pid = self.process.start()?;

        let poll = self.watcher.poll(&self.watermark).await;
        match poll.observed {
            Some(observed) if poll.changed => {
                self.reload(observed).await;
            }
            _ => info!(
                artifact = %self.watcher.artifact().display(),
                "artifact not present yet, waiting for it"
            ),
        }
        Ok(pid)
    }

    /// One pass: reload on change, then make sure the process is alive.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let poll = self.watcher.poll(&self.watermark).await;
        let reload = match poll.observed {
            Some(observed) if poll.changed => Some(self.reload(observed).await),
            _ => None,
        };

        let restarted_pid = self.process.ensure_running()?;
        Ok(TickReport::new(reload, restarted_pid))
    }

    /// Ticks every poll interval until `cancel` fires, then stops the
    /// managed process. Returns early on a fatal error.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            artifact = %self.watcher.artifact().display(),
            interval = ?self.poll_interval,
            "supervising"
        );
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancellation requested");
                    break Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        break Err(e);
                    }
                }
            }
        };

        self.process.shutdown(self.shutdown_grace).await;
        outcome
    }

    async fn reload(&mut self, observed: SystemTime) -> ReloadResult {
        let artifact = self.watcher.artifact();
        let result = self.invoker.invoke(artifact, &self.admin_identity).await;

        if result.is_success() {
            info!(
                artifact = %artifact.display(),
                "Loaded shared servers dated {}",
                format_mtime(observed)
            );
        } else {
            warn!(
                artifact = %artifact.display(),
                exit_code = ?result.exit_code(),
                error = ?result.error_message(),
                policy = ?self.failure_policy,
                "failed to load shared servers"
            );
        }

        if result.is_success() || self.failure_policy == ReloadFailurePolicy::Advance {
            self.watermark.advance(observed);
        }
        result
    }
}
