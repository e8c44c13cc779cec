//! Upload Assembler: reassembles a chunked upload tied to one token into
//! a single durable file row.
//!
//! A token binds to the first `session_id` and `total_chunks` it sees;
//! every subsequent chunk is checked against that binding. Assembly is
//! triggered by whichever chunk observes a complete, contiguous part set,
//! guarded by a per-session lock so only one request performs it.

use crate::config::Config;
use crate::ephemeral::{EphemeralStore, TokenKind, TokenPayload};
use crate::error::{WebError, WebResult};
use crate::jobs::JobManager;
use crate::models::{FileKind, FileRecord};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub struct UploadAssembler {
    pool: SqlitePool,
    ephemeral: Arc<EphemeralStore>,
    assembly_locks: Arc<crate::ephemeral::AssemblyLocks>,
    jobs: Arc<JobManager>,
    config: Arc<Config>,
}

pub struct ChunkRequest {
    pub token: String,
    pub user_id: String,
    pub job_id: String,
    pub file_type: FileKind,
    pub session_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    Waiting,
    Assembled(FileRecord),
}

impl UploadAssembler {
    pub fn new(
        pool: SqlitePool,
        ephemeral: Arc<EphemeralStore>,
        assembly_locks: Arc<crate::ephemeral::AssemblyLocks>,
        jobs: Arc<JobManager>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            ephemeral,
            assembly_locks,
            jobs,
            config,
        }
    }

    pub async fn accept_chunk(&self, req: ChunkRequest) -> WebResult<ChunkOutcome> {
        // 1. Consume (peek, since upload tokens mutate rather than burn per chunk).
        let mut payload = self
            .ephemeral
            .peek_upload_token(&req.token, &req.user_id)
            .await
            .ok_or(WebError::UploadConflict("invalid or expired upload token".to_string()))?;

        // 2. Bind session_id / total_chunks on first sight, else validate.
        match &payload.session_id {
            None => {
                payload.session_id = Some(req.session_id.clone());
                payload.total_chunks = Some(req.total_chunks);
                payload.job_id = Some(req.job_id.clone());
                payload.file_type = Some(req.file_type.as_str().to_string());
            }
            Some(bound_session) if bound_session != &req.session_id => {
                self.ephemeral.burn_token(&req.token).await;
                return Err(WebError::UploadConflict(
                    "chunk session_id does not match the token's bound session".to_string(),
                ));
            }
            Some(_) => {
                if payload.total_chunks != Some(req.total_chunks) {
                    return Err(WebError::BadRequest(
                        "total_chunks does not match the value bound on the first chunk".to_string(),
                    ));
                }
            }
        }

        // 3. Generate a final path on first sight.
        if payload.file_path.is_none() {
            let unique = Uuid::new_v4().to_string();
            payload.file_path = Some(
                PathBuf::from(&self.config.save_path)
                    .join(format!("{}_{}", req.file_type.as_str(), unique))
                    .to_string_lossy()
                    .to_string(),
            );
        }

        self.ephemeral
            .update_upload_token(&req.token, payload.clone(), self.config.upload_token_ttl)
            .await;

        // 4. Refuse a duplicate chunk delivery.
        let part_path = self.part_path(&req.session_id, req.chunk_index);
        if tokio::fs::try_exists(&part_path).await.unwrap_or(false) {
            self.ephemeral.burn_token(&req.token).await;
            return Err(WebError::UploadConflict(format!(
                "chunk {} of session {} already received",
                req.chunk_index, req.session_id
            )));
        }

        // 5. Write the chunk and its digest sidecar.
        tokio::fs::create_dir_all(&self.config.tmp_path).await?;
        tokio::fs::write(&part_path, &req.bytes).await?;

        let digest = hex::encode(Sha256::digest(&req.bytes));
        tokio::fs::write(self.digest_path(&req.session_id, req.chunk_index), digest).await?;

        // 6. Check for completeness and assemble if so.
        if !self.assembly_locks.try_acquire(&req.session_id).await {
            // Another request is already assembling this session.
            return Ok(ChunkOutcome::Waiting);
        }

        let outcome = self
            .try_assemble(&req.token, &req.session_id, req.total_chunks, &payload)
            .await;
        self.assembly_locks.release(&req.session_id).await;
        outcome
    }

    fn part_path(&self, session_id: &str, chunk_index: u32) -> PathBuf {
        PathBuf::from(&self.config.tmp_path).join(format!("{session_id}_{chunk_index}.tmp"))
    }

    fn digest_path(&self, session_id: &str, chunk_index: u32) -> PathBuf {
        PathBuf::from(&self.config.tmp_path).join(format!("{session_id}_{chunk_index}.sha256"))
    }

    async fn try_assemble(
        &self,
        token: &str,
        session_id: &str,
        total_chunks: u32,
        payload: &TokenPayload,
    ) -> WebResult<ChunkOutcome> {
        let mut present = Vec::new();
        for idx in 1..=total_chunks {
            if tokio::fs::try_exists(self.part_path(session_id, idx))
                .await
                .unwrap_or(false)
            {
                present.push(idx);
            }
        }

        if present.len() != total_chunks as usize {
            return Ok(ChunkOutcome::Waiting);
        }

        let final_path = payload
            .file_path
            .clone()
            .ok_or_else(|| WebError::Internal("upload token missing file_path".to_string()))?;

        let mut assembled = Vec::new();
        for idx in 1..=total_chunks {
            let part = tokio::fs::read(self.part_path(session_id, idx)).await?;
            let recorded = tokio::fs::read_to_string(self.digest_path(session_id, idx)).await?;
            let actual = hex::encode(Sha256::digest(&part));
            if actual != recorded.trim() {
                return Err(WebError::Internal(format!(
                    "chunk {idx} of session {session_id} failed its integrity check"
                )));
            }
            assembled.extend_from_slice(&part);
        }

        tokio::fs::create_dir_all(&self.config.save_path).await?;
        tokio::fs::write(&final_path, &assembled).await?;

        let file_type = payload
            .file_type
            .as_deref()
            .and_then(|s| FileKind::from_str(s).ok())
            .ok_or_else(|| WebError::Internal("upload token missing file_type".to_string()))?;

        let file_id = Uuid::new_v4().to_string()[..8].to_string();

        sqlx::query("INSERT INTO files (id, file_type, full_path) VALUES (?, ?, ?)")
            .bind(&file_id)
            .bind(file_type.as_str())
            .bind(&final_path)
            .execute(&self.pool)
            .await?;

        let job_id = payload
            .job_id
            .clone()
            .ok_or_else(|| WebError::Internal("upload token missing job_id".to_string()))?;

        match file_type {
            FileKind::Kraus => self.jobs.update_kraus(&job_id, &file_id).await?,
            FileKind::Vector => self.jobs.update_vector(&job_id, &file_id).await?,
        }

        for idx in 1..=total_chunks {
            let _ = tokio::fs::remove_file(self.part_path(session_id, idx)).await;
            let _ = tokio::fs::remove_file(self.digest_path(session_id, idx)).await;
        }

        self.ephemeral.burn_token(token).await;

        Ok(ChunkOutcome::Assembled(FileRecord {
            id: file_id,
            file_type: file_type.as_str().to_string(),
            full_path: final_path,
        }))
    }

    pub async fn get_file(&self, file_id: &str) -> WebResult<FileRecord> {
        sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WebError::NotFound(format!("file {file_id} not found")))
    }
}

pub fn mint_upload_payload(user_id: &str) -> TokenPayload {
    TokenPayload {
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

pub const UPLOAD_TOKEN_KIND: TokenKind = TokenKind::Upload;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeral::AssemblyLocks;
    use std::time::Duration;

    struct Fixture {
        assembler: UploadAssembler,
        jobs: Arc<JobManager>,
        ephemeral: Arc<EphemeralStore>,
        _save_dir: tempfile::TempDir,
        _tmp_dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let save_dir = tempfile::tempdir().unwrap();
        let tmp_dir = tempfile::tempdir().unwrap();
        let config = Arc::new(Config {
            save_path: save_dir.path().to_string_lossy().to_string(),
            tmp_path: tmp_dir.path().to_string_lossy().to_string(),
            ..Config::default()
        });

        let pool = crate::db::connect(":memory:").await.unwrap();
        let ephemeral = Arc::new(EphemeralStore::new());
        let jobs = Arc::new(JobManager::new(pool.clone(), ephemeral.clone(), config.clone()));
        let assembler = UploadAssembler::new(
            pool,
            ephemeral.clone(),
            Arc::new(AssemblyLocks::new()),
            jobs.clone(),
            config,
        );

        Fixture {
            assembler,
            jobs,
            ephemeral,
            _save_dir: save_dir,
            _tmp_dir: tmp_dir,
        }
    }

    fn chunk(token: &str, job_id: &str, session_id: &str, index: u32, total: u32, bytes: Vec<u8>) -> ChunkRequest {
        ChunkRequest {
            token: token.to_string(),
            user_id: "alice".to_string(),
            job_id: job_id.to_string(),
            file_type: FileKind::Kraus,
            session_id: session_id.to_string(),
            chunk_index: index,
            total_chunks: total,
            bytes,
        }
    }

    #[tokio::test]
    async fn single_chunk_upload_assembles_immediately() {
        let fx = fixture().await;
        let job = fx
            .jobs
            .create_job(crate::models::JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        let token = fx
            .ephemeral
            .mint_token(TokenKind::Upload, mint_upload_payload("alice"), Duration::from_secs(60))
            .await;

        let outcome = fx
            .assembler
            .accept_chunk(chunk(&token, &job.id, "session-1", 1, 1, b"hello world".to_vec()))
            .await
            .unwrap();

        let file = match outcome {
            ChunkOutcome::Assembled(file) => file,
            ChunkOutcome::Waiting => panic!("expected the single chunk to complete assembly"),
        };

        let contents = tokio::fs::read(&file.full_path).await.unwrap();
        assert_eq!(contents, b"hello world");

        let refreshed = fx.jobs.get_job(&job.id).await.unwrap();
        assert_eq!(refreshed.kraus_operator.as_deref(), Some(file.id.as_str()));
    }

    #[tokio::test]
    async fn out_of_order_chunks_still_assemble_byte_identical() {
        let fx = fixture().await;
        let job = fx
            .jobs
            .create_job(crate::models::JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        let token = fx
            .ephemeral
            .mint_token(TokenKind::Upload, mint_upload_payload("alice"), Duration::from_secs(60))
            .await;

        let waiting = fx
            .assembler
            .accept_chunk(chunk(&token, &job.id, "session-2", 2, 2, b"World".to_vec()))
            .await
            .unwrap();
        assert!(matches!(waiting, ChunkOutcome::Waiting));

        let outcome = fx
            .assembler
            .accept_chunk(chunk(&token, &job.id, "session-2", 1, 2, b"Hello".to_vec()))
            .await
            .unwrap();

        let file = match outcome {
            ChunkOutcome::Assembled(file) => file,
            ChunkOutcome::Waiting => panic!("expected assembly once both chunks arrived"),
        };
        let contents = tokio::fs::read(&file.full_path).await.unwrap();
        assert_eq!(contents, b"HelloWorld");
    }

    #[tokio::test]
    async fn duplicate_chunk_delivery_is_rejected() {
        let fx = fixture().await;
        let job = fx
            .jobs
            .create_job(crate::models::JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        let token = fx
            .ephemeral
            .mint_token(TokenKind::Upload, mint_upload_payload("alice"), Duration::from_secs(60))
            .await;

        fx.assembler
            .accept_chunk(chunk(&token, &job.id, "session-3", 1, 2, b"part-one-".to_vec()))
            .await
            .unwrap();

        let err = fx
            .assembler
            .accept_chunk(chunk(&token, &job.id, "session-3", 1, 2, b"part-one-".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WebError::UploadConflict(_)));
    }

    #[tokio::test]
    async fn chunk_for_a_different_session_than_the_token_bound_is_rejected() {
        let fx = fixture().await;
        let job = fx
            .jobs
            .create_job(crate::models::JobType::GenerateKraus, serde_json::json!({}), None, None, None, 0)
            .await
            .unwrap();
        let token = fx
            .ephemeral
            .mint_token(TokenKind::Upload, mint_upload_payload("alice"), Duration::from_secs(60))
            .await;

        fx.assembler
            .accept_chunk(chunk(&token, &job.id, "session-4", 1, 2, b"part-a".to_vec()))
            .await
            .unwrap();

        let err = fx
            .assembler
            .accept_chunk(chunk(&token, &job.id, "session-5", 1, 2, b"part-b".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WebError::UploadConflict(_)));

        // The token is burned on a session mismatch; it can't be reused.
        assert!(fx.ephemeral.peek_upload_token(&token, "alice").await.is_none());
    }
}
