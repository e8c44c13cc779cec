//! The control loop: the background task that drives the Channel Manager
//! tick and the Job Manager liveness sweeper.
//!
//! Mirrors the claim-then-sleep shape of a dedicated reactor task: each
//! iteration does its work, then either sleeps out the tick interval or
//! wakes early when a handler signals new work via `AppState::wake`.

use crate::channels::ChannelManager;
use crate::jobs::JobManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub struct ControlLoop {
    channels: Arc<ChannelManager>,
    jobs: Arc<JobManager>,
    wake: Arc<Notify>,
    tick_interval: Duration,
    shutdown: CancellationToken,
}

impl ControlLoop {
    pub fn new(
        channels: Arc<ChannelManager>,
        jobs: Arc<JobManager>,
        wake: Arc<Notify>,
        tick_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            channels,
            jobs,
            wake,
            tick_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires.
    pub async fn run(self) {
        info!("control loop online");

        loop {
            self.tick().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("control loop shutting down");
                    return;
                }
                _ = self.wake.notified() => {
                    tracing::debug!("control loop woken by job creation");
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) {
        self.channels.tick().await;

        if let Err(e) = self.jobs.manage_jobs().await {
            tracing::error!(error = %e, "job sweeper failed");
        }

        self.jobs.ephemeral_sweep().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::ephemeral::EphemeralStore;

    #[tokio::test]
    async fn tick_advances_a_freshly_created_channel() {
        let pool = crate::db::connect(":memory:").await.unwrap();
        let config = Arc::new(Config::default());
        let jobs = Arc::new(JobManager::new(pool.clone(), Arc::new(EphemeralStore::new()), config.clone()));
        let channels = Arc::new(ChannelManager::new(pool, jobs.clone(), config));

        let channel = channels.create_channel(4, 2, 3, Some(1)).await.unwrap();

        let loop_ = ControlLoop::new(
            channels.clone(),
            jobs,
            Arc::new(Notify::new()),
            Duration::from_secs(60),
            CancellationToken::new(),
        );
        loop_.tick().await;

        let refreshed = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(refreshed.status(), crate::models::ChannelStatus::Generating);
    }

    #[tokio::test]
    async fn run_exits_promptly_on_shutdown() {
        let pool = crate::db::connect(":memory:").await.unwrap();
        let config = Arc::new(Config::default());
        let jobs = Arc::new(JobManager::new(pool.clone(), Arc::new(EphemeralStore::new()), config.clone()));
        let channels = Arc::new(ChannelManager::new(pool, jobs.clone(), config));
        let shutdown = CancellationToken::new();

        let loop_ = ControlLoop::new(
            channels,
            jobs,
            Arc::new(Notify::new()),
            Duration::from_secs(60),
            shutdown.clone(),
        );

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), loop_.run())
            .await
            .expect("control loop should exit as soon as shutdown fires");
    }
}
