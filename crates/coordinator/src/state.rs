//! Global application state shared across handlers and the control loop

use crate::channels::ChannelManager;
use crate::config::Config;
use crate::ephemeral::{AssemblyLocks, EphemeralStore};
use crate::jobs::JobManager;
use crate::uploads::UploadAssembler;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub ephemeral: Arc<EphemeralStore>,
    pub assembly_locks: Arc<AssemblyLocks>,
    pub config: Arc<Config>,
    pub jobs: Arc<JobManager>,
    pub channels: Arc<ChannelManager>,
    pub uploads: Arc<UploadAssembler>,
    /// Wakes the control loop immediately after a job is created, instead
    /// of waiting out the tick interval.
    pub wake: Arc<Notify>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, sqlx::Error> {
        let pool = crate::db::connect(&config.db_path).await?;
        crate::auth::ensure_default_admin(&pool).await?;

        let config = Arc::new(config);
        let ephemeral = Arc::new(EphemeralStore::new());
        let assembly_locks = Arc::new(AssemblyLocks::new());
        let wake = Arc::new(Notify::new());

        let jobs = Arc::new(JobManager::new(pool.clone(), ephemeral.clone(), config.clone()));
        let channels = Arc::new(ChannelManager::new(pool.clone(), jobs.clone(), config.clone()));
        let uploads = Arc::new(UploadAssembler::new(
            pool.clone(),
            ephemeral.clone(),
            assembly_locks.clone(),
            jobs.clone(),
            config.clone(),
        ));

        Ok(AppState {
            pool,
            ephemeral,
            assembly_locks,
            config,
            jobs,
            channels,
            uploads,
            wake,
        })
    }
}
