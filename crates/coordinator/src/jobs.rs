//! Job Manager: job lifecycle, worker leasing, and the liveness sweeper
//!
//! Leasing follows the same shape as a transactional conditional claim:
//! read the candidate row, then commit a `status = 'pending' -> 'running'`
//! update inside the same transaction, checking rows-affected so two
//! concurrent leases on the same job can never both succeed.

use crate::config::Config;
use crate::ephemeral::EphemeralStore;
use crate::error::{WebError, WebResult};
use crate::models::{Job, JobType};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

pub struct JobManager {
    pool: SqlitePool,
    ephemeral: Arc<EphemeralStore>,
    config: Arc<Config>,
}

impl JobManager {
    pub fn new(pool: SqlitePool, ephemeral: Arc<EphemeralStore>, config: Arc<Config>) -> Self {
        Self {
            pool,
            ephemeral,
            config,
        }
    }

    /// Create a job and enqueue it for dispatch. `minimize` jobs must
    /// carry both a Kraus operator and a vector at creation time.
    pub async fn create_job(
        &self,
        job_type: JobType,
        input_data: Value,
        kraus_operator: Option<String>,
        vector: Option<String>,
        channel_id: Option<i64>,
        priority: i64,
    ) -> WebResult<Job> {
        if job_type == JobType::Minimize && (kraus_operator.is_none() || vector.is_none()) {
            return Err(WebError::BadRequest(
                "minimize jobs require both a kraus operator and a vector".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let input_data = input_data.to_string();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, job_type, status, input_data, kraus_operator, vector,
                               entropy, num_iterations, time_created, last_update, channel_id, priority)
            VALUES (?, ?, 'pending', ?, ?, ?, -1.0, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(job_type.as_str())
        .bind(&input_data)
        .bind(&kraus_operator)
        .bind(&vector)
        .bind(now)
        .bind(now)
        .bind(channel_id)
        .bind(priority)
        .execute(&self.pool)
        .await?;

        self.ephemeral.enqueue_job(&id).await;

        self.get_job(&id).await
    }

    pub async fn get_job(&self, job_id: &str) -> WebResult<Job> {
        sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WebError::NotFound(format!("job {job_id} not found")))
    }

    /// Lease the next pending job to a worker. Returns `Ok(None)` when
    /// the queue is empty (callers map this to a 204 at the HTTP boundary).
    pub async fn assign_job_to_worker(&self, worker_id: &str) -> WebResult<Option<Job>> {
        loop {
            let Some(job_id) = self.ephemeral.dequeue_job().await else {
                return Ok(None);
            };

            let mut tx = self.pool.begin().await?;
            let now = chrono::Utc::now().timestamp();

            let result = sqlx::query(
                "UPDATE jobs SET status = 'running', worker_id = ?, time_started = ?, last_update = ? \
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(worker_id)
            .bind(now)
            .bind(now)
            .bind(&job_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                // Row missing or already claimed/restarted; queue was stale.
                tx.rollback().await?;
                self.sync_jobs().await?;
                continue;
            }

            tx.commit().await?;
            return Ok(Some(self.get_job(&job_id).await?));
        }
    }

    /// Heartbeat: advances `last_update` iff the job is running and owned
    /// by this worker.
    pub async fn ping(&self, worker_id: &str, job_id: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET last_update = ? WHERE id = ? AND worker_id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WebError::BadRequest(
                "job is not running under this worker".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn update_iterations(&self, job_id: &str, num_iterations: i64) -> WebResult<()> {
        self.touch_field(job_id, "num_iterations", num_iterations).await
    }

    pub async fn update_entropy(&self, job_id: &str, entropy: f64) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET entropy = ?, last_update = ? WHERE id = ?")
            .bind(entropy)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_vector(&self, job_id: &str, vector: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET vector = ?, last_update = ? WHERE id = ?")
            .bind(vector)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_kraus(&self, job_id: &str, kraus_operator: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE jobs SET kraus_operator = ?, last_update = ? WHERE id = ?")
            .bind(kraus_operator)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn touch_field(&self, job_id: &str, column: &str, value: i64) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        let query = format!("UPDATE jobs SET {column} = ?, last_update = ? WHERE id = ?");
        sqlx::query(&query)
            .bind(value)
            .bind(now)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn pause(&self, job_id: &str) -> WebResult<()> {
        self.transition(job_id, &["running"], "paused").await
    }

    pub async fn resume(&self, job_id: &str) -> WebResult<()> {
        self.transition(job_id, &["paused"], "pending").await?;
        self.ephemeral.enqueue_job(job_id).await;
        Ok(())
    }

    pub async fn cancel(&self, job_id: &str) -> WebResult<()> {
        self.transition(job_id, &["pending", "running", "paused"], "canceled")
            .await?;
        self.ephemeral.prune_from_queue(job_id).await;
        Ok(())
    }

    async fn transition(&self, job_id: &str, from: &[&str], to: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        let placeholders = from.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let query = format!(
            "UPDATE jobs SET status = ?, last_update = ? WHERE id = ? AND status IN ({placeholders})"
        );
        let mut q = sqlx::query(&query).bind(to).bind(now).bind(job_id);
        for s in from {
            q = q.bind(*s);
        }
        let result = q.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(WebError::BadRequest(format!(
                "job {job_id} is not in a state that allows this transition"
            )));
        }
        Ok(())
    }

    /// Mark a running job completed and drop it in the completion inbox
    /// for the channel manager to pick up.
    pub async fn complete(&self, job_id: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', time_finished = ? WHERE id = ? AND status = 'running'",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WebError::BadRequest(format!(
                "job {job_id} is not running"
            )));
        }

        self.ephemeral.push_completed(job_id).await;
        Ok(())
    }

    /// Force a job back to pending, clearing its run timestamps, and
    /// re-enqueue it for dispatch.
    pub async fn restart(&self, job_id: &str) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE jobs SET status = 'pending', time_started = NULL, time_finished = NULL, \
             worker_id = NULL, last_update = ? WHERE id = ?",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        self.ephemeral.enqueue_job(job_id).await;
        Ok(())
    }

    /// Reconcile the dispatch queue against the store: every pending row
    /// must be queued, every queued id whose row is no longer pending
    /// must be dropped.
    pub async fn sync_jobs(&self) -> WebResult<()> {
        let pending: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM jobs WHERE status = 'pending'")
                .fetch_all(&self.pool)
                .await?;

        for (id,) in &pending {
            if !self.ephemeral.queue_contains(id).await {
                self.ephemeral.enqueue_job(id).await;
            }
        }

        // Drain-and-rebuild keeps this O(queue) instead of O(queue^2);
        // any job enqueued concurrently with this sync is a pending job
        // that would already be accounted for above.
        let mut rebuilt = Vec::new();
        while let Some(id) = self.ephemeral.dequeue_job().await {
            if pending.iter().any(|(p,)| p == &id) {
                rebuilt.push(id);
            }
        }
        for id in rebuilt {
            self.ephemeral.enqueue_job(&id).await;
        }

        Ok(())
    }

    /// Periodic sweeper: reclaim jobs whose worker has gone silent past
    /// `job_ping_ttl`, auto-restart jobs stuck in `paused`/`running` past
    /// their respective TTLs, and replace canceled jobs with fresh clones.
    pub async fn manage_jobs(&self) -> WebResult<()> {
        let now = chrono::Utc::now().timestamp();

        let stale_running: Vec<(String,)> = sqlx::query_as(
            "SELECT id FROM jobs WHERE status = 'running' AND ? - last_update > ?",
        )
        .bind(now)
        .bind(self.config.job_ping_ttl.as_secs() as i64)
        .fetch_all(&self.pool)
        .await?;

        for (id,) in stale_running {
            tracing::warn!(job_id = %id, "worker ping timed out, restarting job");
            self.restart(&id).await?;
        }

        let stuck: Vec<(String, String, Option<i64>)> = sqlx::query_as(
            "SELECT id, status, time_started FROM jobs WHERE status IN ('running', 'paused') AND time_started IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        for (id, status, time_started) in stuck {
            let Some(started) = time_started else { continue };
            let ttl = if status == "paused" {
                self.config.job_paused_ttl.as_secs() as i64
            } else {
                self.config.job_running_ttl.as_secs() as i64
            };
            if now - started > ttl {
                tracing::warn!(job_id = %id, %status, "job exceeded its status TTL, restarting");
                self.restart(&id).await?;
            }
        }

        let canceled: Vec<Job> = sqlx::query_as("SELECT * FROM jobs WHERE status = 'canceled'")
            .fetch_all(&self.pool)
            .await?;

        for job in canceled {
            // Canceled rows are terminal; replace with a fresh job bearing
            // the same inputs rather than resurrecting the old row.
            let input_data: Value =
                serde_json::from_str(&job.input_data).unwrap_or(Value::Null);
            self.create_job(
                job.job_type(),
                input_data,
                job.kraus_operator.clone(),
                job.vector.clone(),
                job.channel_id,
                job.priority,
            )
            .await?;
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(&job.id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Drop expired tokens and revocation entries. Piggybacks on the same
    /// tick as the job sweeper since both are periodic ephemeral-store
    /// maintenance with no reason to run on separate schedules.
    pub async fn ephemeral_sweep(&self) {
        self.ephemeral.sweep_expired().await;
    }

    /// Pop the next completed job id for the channel manager to process.
    pub async fn pop_completed(&self) -> Option<String> {
        self.ephemeral.pop_completed().await
    }

    /// List completed `minimize` jobs bound to a channel, for best-MOE
    /// recomputation.
    pub async fn completed_minimize_jobs_for_channel(&self, channel_id: i64) -> WebResult<Vec<Job>> {
        let jobs: Vec<Job> = sqlx::query_as(
            "SELECT * FROM jobs WHERE channel_id = ? AND job_type = 'minimize' AND status = 'completed'",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> JobManager {
        manager_with_config(Config::default()).await
    }

    async fn manager_with_config(config: Config) -> JobManager {
        let pool = crate::db::connect(":memory:").await.unwrap();
        JobManager::new(pool, Arc::new(EphemeralStore::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn create_job_rejects_minimize_without_kraus_and_vector() {
        let mgr = manager().await;
        let err = mgr
            .create_job(JobType::Minimize, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, WebError::BadRequest(_)));
    }

    #[tokio::test]
    async fn lease_is_at_most_one() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();

        let first = mgr.assign_job_to_worker("worker-a").await.unwrap();
        assert_eq!(first.unwrap().id, job.id);

        // Queue is now empty; a second worker sees no work rather than the
        // same job twice.
        let second = mgr.assign_job_to_worker("worker-b").await.unwrap();
        assert!(second.is_none());

        let refreshed = mgr.get_job(&job.id).await.unwrap();
        assert_eq!(refreshed.status(), crate::models::JobStatus::Running);
        assert_eq!(refreshed.worker_id.as_deref(), Some("worker-a"));
    }

    #[tokio::test]
    async fn ping_fails_for_non_owning_worker() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        mgr.assign_job_to_worker("worker-a").await.unwrap();

        assert!(mgr.ping("worker-a", &job.id).await.is_ok());
        assert!(mgr.ping("worker-b", &job.id).await.is_err());
    }

    #[tokio::test]
    async fn manage_jobs_restarts_stale_lease() {
        let mgr = manager_with_config(Config {
            job_ping_ttl: std::time::Duration::from_secs(60),
            ..Config::default()
        })
        .await;

        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        mgr.assign_job_to_worker("worker-a").await.unwrap();

        // Simulate a worker that went silent well past the TTL.
        let stale = chrono::Utc::now().timestamp() - 3600;
        sqlx::query("UPDATE jobs SET last_update = ? WHERE id = ?")
            .bind(stale)
            .bind(&job.id)
            .execute(&mgr.pool)
            .await
            .unwrap();

        mgr.manage_jobs().await.unwrap();

        let refreshed = mgr.get_job(&job.id).await.unwrap();
        assert_eq!(refreshed.status(), crate::models::JobStatus::Pending);
        assert!(refreshed.worker_id.is_none());

        let leased = mgr.assign_job_to_worker("worker-b").await.unwrap();
        assert_eq!(leased.unwrap().id, job.id);
    }

    #[tokio::test]
    async fn manage_jobs_replaces_canceled_jobs() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        mgr.cancel(&job.id).await.unwrap();

        mgr.manage_jobs().await.unwrap();

        assert!(mgr.get_job(&job.id).await.is_err());
        let replacement = mgr.assign_job_to_worker("worker-a").await.unwrap();
        assert!(replacement.is_some());
    }

    #[tokio::test]
    async fn complete_requires_running_status() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();

        assert!(mgr.complete(&job.id).await.is_err());

        mgr.assign_job_to_worker("worker-a").await.unwrap();
        mgr.complete(&job.id).await.unwrap();

        let popped = mgr.pop_completed().await;
        assert_eq!(popped.as_deref(), Some(job.id.as_str()));
    }

    #[tokio::test]
    async fn cancel_removes_job_from_dispatch_queue() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();

        mgr.cancel(&job.id).await.unwrap();

        assert!(mgr.assign_job_to_worker("worker-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_jobs_reconciles_stale_queue_entries() {
        let mgr = manager().await;
        let job = mgr
            .create_job(JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        mgr.assign_job_to_worker("worker-a").await.unwrap();

        // Manually re-push the (now running) job id, simulating a stale
        // queue entry that never got dequeued.
        mgr.ephemeral.enqueue_job(&job.id).await;
        mgr.sync_jobs().await.unwrap();

        assert!(!mgr.ephemeral.queue_contains(&job.id).await);
    }
}
