//! Channel Manager: expands channel objectives into job graphs and tracks
//! the running best output-entropy value.
//!
//! Each tick runs three phases in order: schedule new work, drain the
//! completion inbox, recompute the best-seen objective. Every per-item
//! step is isolated so a single bad row logs and moves on instead of
//! aborting the rest of the tick.

use crate::config::Config;
use crate::error::WebResult;
use crate::jobs::JobManager;
use crate::models::{Channel, ChannelStatus, JobType};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct ChannelManager {
    pool: SqlitePool,
    jobs: Arc<JobManager>,
    config: Arc<Config>,
}

impl ChannelManager {
    pub fn new(pool: SqlitePool, jobs: Arc<JobManager>, config: Arc<Config>) -> Self {
        Self { pool, jobs, config }
    }

    pub async fn create_channel(
        &self,
        input_dimension: i64,
        output_dimension: i64,
        num_kraus: i64,
        minimization_attempts: Option<i64>,
    ) -> WebResult<Channel> {
        let attempts = minimization_attempts.unwrap_or(self.config.channel_default_attempts as i64);

        let id: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO channels (best_moe, minimization_attempts, runs_spawned, runs_completed,
                                   input_dimension, output_dimension, num_kraus, status)
            VALUES (-1.0, ?, 0, 0, ?, ?, ?, 'created')
            RETURNING id
            "#,
        )
        .bind(attempts)
        .bind(input_dimension)
        .bind(output_dimension)
        .bind(num_kraus)
        .fetch_one(&self.pool)
        .await?;

        self.get_channel(id.0).await
    }

    pub async fn get_channel(&self, id: i64) -> WebResult<Channel> {
        sqlx::query_as("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn list_channels(&self) -> WebResult<Vec<Channel>> {
        sqlx::query_as("SELECT * FROM channels ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn update_minimization_attempts(&self, id: i64, attempts: i64) -> WebResult<()> {
        sqlx::query("UPDATE channels SET minimization_attempts = ? WHERE id = ?")
            .bind(attempts)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Run one full tick: schedule, drain inbox, recompute best.
    pub async fn tick(&self) {
        if let Err(e) = self.schedule().await {
            tracing::error!(error = %e, "channel schedule phase failed");
        }
        if let Err(e) = self.drain_inbox().await {
            tracing::error!(error = %e, "channel inbox-drain phase failed");
        }
        if let Err(e) = self.recompute_best().await {
            tracing::error!(error = %e, "channel best-MOE phase failed");
        }
    }

    /// Phase A: expand each channel's status into the jobs it needs next.
    async fn schedule(&self) -> WebResult<()> {
        let channels = self.list_channels().await?;

        for channel in channels {
            if let Err(e) = self.schedule_one(&channel).await {
                tracing::error!(channel_id = channel.id, error = %e, "failed to schedule channel");
            }
        }
        Ok(())
    }

    async fn schedule_one(&self, channel: &Channel) -> WebResult<()> {
        match channel.status() {
            ChannelStatus::Created => {
                let job = self
                    .jobs
                    .create_job(
                        JobType::GenerateKraus,
                        json!({
                            "input_dimension": channel.input_dimension,
                            "output_dimension": channel.output_dimension,
                            "num_kraus": channel.num_kraus,
                        }),
                        None,
                        None,
                        Some(channel.id),
                        0,
                    )
                    .await?;

                let result =
                    sqlx::query("UPDATE channels SET status = 'generating' WHERE id = ? AND status = 'created'")
                        .bind(channel.id)
                        .execute(&self.pool)
                        .await?;

                if result.rows_affected() == 0 {
                    // Someone else already moved this channel on; the job
                    // we just created would otherwise be orphaned.
                    self.jobs.cancel(&job.id).await?;
                }
            }
            ChannelStatus::Minimizing => {
                let in_flight = channel.runs_spawned - channel.runs_completed;
                let max_jobs = self.config.channel_max_jobs as i64;
                if channel.runs_spawned < channel.minimization_attempts && in_flight < max_jobs {
                    let to_spawn = std::cmp::min(
                        channel.minimization_attempts - channel.runs_spawned,
                        max_jobs - in_flight,
                    );

                    for _ in 0..to_spawn {
                        self.jobs
                            .create_job(
                                JobType::GenerateVector,
                                json!({ "output_dimension": channel.output_dimension }),
                                None,
                                None,
                                Some(channel.id),
                                0,
                            )
                            .await?;

                        sqlx::query("UPDATE channels SET runs_spawned = runs_spawned + 1 WHERE id = ?")
                            .bind(channel.id)
                            .execute(&self.pool)
                            .await?;
                    }
                }
            }
            ChannelStatus::Generating | ChannelStatus::Paused | ChannelStatus::Completed => {}
        }
        Ok(())
    }

    /// Phase B: drain completed jobs from the inbox and react per job type.
    async fn drain_inbox(&self) -> WebResult<()> {
        while let Some(job_id) = self.jobs.pop_completed().await {
            if let Err(e) = self.handle_completed(&job_id).await {
                tracing::error!(job_id = %job_id, error = %e, "failed to process completed job");
            }
        }
        Ok(())
    }

    async fn handle_completed(&self, job_id: &str) -> WebResult<()> {
        let job = self.jobs.get_job(job_id).await?;
        let Some(channel_id) = job.channel_id else {
            return Ok(());
        };

        match job.job_type() {
            JobType::GenerateKraus => {
                let Some(kraus) = job.kraus_operator.clone() else {
                    tracing::warn!(job_id = %job_id, "generate_kraus completed with no kraus operator");
                    return Ok(());
                };

                let result = sqlx::query(
                    "UPDATE channels SET kraus_id = ?, status = 'minimizing' WHERE id = ? AND status = 'generating'",
                )
                .bind(&kraus)
                .bind(channel_id)
                .execute(&self.pool)
                .await?;

                if result.rows_affected() == 0 {
                    // Roll back to created so it reschedules on the next tick.
                    sqlx::query("UPDATE channels SET status = 'created' WHERE id = ?")
                        .bind(channel_id)
                        .execute(&self.pool)
                        .await?;
                }
            }
            JobType::GenerateVector => {
                let Some(vector) = job.vector.clone() else {
                    tracing::warn!(job_id = %job_id, "generate_vector completed with no vector");
                    return Ok(());
                };

                let channel = self.get_channel(channel_id).await?;
                let Some(kraus) = channel.kraus_id.clone() else {
                    tracing::warn!(channel_id, "minimizing channel has no kraus_id yet");
                    return Ok(());
                };

                // runs_spawned was already incremented when this vector job
                // was created; the paired minimize job does not bump it again.
                self.jobs
                    .create_job(
                        JobType::Minimize,
                        json!({ "input_dimension": channel.input_dimension }),
                        Some(kraus),
                        Some(vector),
                        Some(channel_id),
                        0,
                    )
                    .await?;
            }
            JobType::Minimize => {
                sqlx::query("UPDATE channels SET runs_completed = runs_completed + 1 WHERE id = ?")
                    .bind(channel_id)
                    .execute(&self.pool)
                    .await?;

                let channel = self.get_channel(channel_id).await?;
                if channel.runs_completed >= channel.minimization_attempts {
                    sqlx::query("UPDATE channels SET status = 'completed' WHERE id = ?")
                        .bind(channel_id)
                        .execute(&self.pool)
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Phase C: for every active channel, scan its completed minimize jobs
    /// and advance `best_moe`/`best_vector_id` on any strictly better sample.
    async fn recompute_best(&self) -> WebResult<()> {
        let channels = self.list_channels().await?;

        for channel in channels {
            if !matches!(channel.status(), ChannelStatus::Minimizing | ChannelStatus::Completed) {
                continue;
            }

            if let Err(e) = self.recompute_best_for(&channel).await {
                tracing::error!(channel_id = channel.id, error = %e, "failed to recompute best MOE");
            }
        }
        Ok(())
    }

    async fn recompute_best_for(&self, channel: &Channel) -> WebResult<()> {
        let jobs = self.jobs.completed_minimize_jobs_for_channel(channel.id).await?;

        let mut best_moe = channel.best_moe;
        let mut best_vector = channel.best_vector_id.clone();

        for job in jobs {
            if job.entropy < 0.0 {
                continue;
            }
            if job.entropy < best_moe || best_moe < 0.0 {
                best_moe = job.entropy;
                best_vector = job.vector.clone();
            }
        }

        if best_moe != channel.best_moe || best_vector != channel.best_vector_id {
            sqlx::query("UPDATE channels SET best_moe = ?, best_vector_id = ? WHERE id = ?")
                .bind(best_moe)
                .bind(&best_vector)
                .bind(channel.id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeral::EphemeralStore;

    async fn managers(config: Config) -> (Arc<JobManager>, ChannelManager) {
        let pool = crate::db::connect(":memory:").await.unwrap();
        let config = Arc::new(config);
        let jobs = Arc::new(JobManager::new(
            pool.clone(),
            Arc::new(EphemeralStore::new()),
            config.clone(),
        ));
        let channels = ChannelManager::new(pool, jobs.clone(), config);
        (jobs, channels)
    }

    async fn run_one_job(jobs: &JobManager, outcome: impl FnOnce(&str) -> Option<(JobType, String)>) {
        let job = jobs.assign_job_to_worker("worker").await.unwrap().unwrap();
        if let Some((kind, value)) = outcome(&job.id) {
            match kind {
                JobType::GenerateKraus => jobs.update_kraus(&job.id, &value).await.unwrap(),
                JobType::GenerateVector => jobs.update_vector(&job.id, &value).await.unwrap(),
                JobType::Minimize => jobs.update_entropy(&job.id, value.parse().unwrap()).await.unwrap(),
            }
        }
        jobs.complete(&job.id).await.unwrap();
    }

    #[tokio::test]
    async fn channel_progresses_from_created_to_minimizing() {
        let (jobs, channels) = managers(Config {
            channel_max_jobs: 2,
            ..Config::default()
        })
        .await;

        let channel = channels.create_channel(4, 2, 3, Some(2)).await.unwrap();
        channels.tick().await;

        let refreshed = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(refreshed.status(), ChannelStatus::Generating);

        run_one_job(&jobs, |_| Some((JobType::GenerateKraus, "kraus-1".to_string()))).await;
        channels.tick().await;

        let refreshed = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(refreshed.status(), ChannelStatus::Minimizing);
        assert_eq!(refreshed.kraus_id.as_deref(), Some("kraus-1"));

        // A further tick schedules generate_vector jobs now that the
        // channel has entered the minimizing state.
        channels.tick().await;
        let refreshed = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(refreshed.runs_spawned, 2);
    }

    #[tokio::test]
    async fn channel_completes_after_minimization_attempts() {
        let (jobs, channels) = managers(Config {
            channel_max_jobs: 5,
            ..Config::default()
        })
        .await;

        let channel = channels.create_channel(4, 2, 3, Some(1)).await.unwrap();
        channels.tick().await; // created -> generating, spawns generate_kraus

        run_one_job(&jobs, |_| Some((JobType::GenerateKraus, "kraus-1".to_string()))).await;
        channels.tick().await; // drains generate_kraus: generating -> minimizing
        channels.tick().await; // schedules generate_vector now that we're minimizing

        run_one_job(&jobs, |_| Some((JobType::GenerateVector, "vector-1".to_string()))).await;
        channels.tick().await; // drains generate_vector, spawns minimize

        run_one_job(&jobs, |_| Some((JobType::Minimize, "0.5".to_string()))).await;
        channels.tick().await; // drains minimize, completes the channel

        let refreshed = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(refreshed.status(), ChannelStatus::Completed);
        assert_eq!(refreshed.runs_completed, 1);
        assert_eq!(refreshed.best_moe, 0.5);
        assert_eq!(refreshed.best_vector_id.as_deref(), Some("vector-1"));
    }

    #[tokio::test]
    async fn recompute_best_is_monotone() {
        let (jobs, channels) = managers(Config {
            channel_max_jobs: 5,
            ..Config::default()
        })
        .await;

        let channel = channels.create_channel(4, 2, 3, Some(2)).await.unwrap();
        channels.tick().await; // created -> generating
        run_one_job(&jobs, |_| Some((JobType::GenerateKraus, "kraus-1".to_string()))).await;
        channels.tick().await; // generating -> minimizing
        channels.tick().await; // spawns both generate_vector jobs

        run_one_job(&jobs, |_| Some((JobType::GenerateVector, "vector-1".to_string()))).await;
        run_one_job(&jobs, |_| Some((JobType::GenerateVector, "vector-2".to_string()))).await;
        channels.tick().await; // drains both, creates two minimize jobs

        run_one_job(&jobs, |_| Some((JobType::Minimize, "0.8".to_string()))).await;
        channels.tick().await;
        let after_first = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(after_first.best_moe, 0.8);

        // A worse sample must not move best_moe backwards.
        run_one_job(&jobs, |_| Some((JobType::Minimize, "0.95".to_string()))).await;
        channels.tick().await;
        let after_second = channels.get_channel(channel.id).await.unwrap();
        assert_eq!(after_second.best_moe, 0.8);
        assert_eq!(after_second.best_vector_id.as_deref(), Some("vector-1"));
    }
}
