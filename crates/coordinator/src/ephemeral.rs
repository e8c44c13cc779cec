//! In-process ephemeral state: dispatch queue, completion inbox, token
//! store, and JWT revocation set.
//!
//! None of this survives a process restart; the coordinator assumes a
//! single leader instance, so a Redis-backed equivalent buys nothing here.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Upload,
    Download,
}

/// Payload carried by a live token. Upload tokens accumulate fields as
/// chunks arrive; download tokens are minted with their full payload.
#[derive(Debug, Clone, Default)]
pub struct TokenPayload {
    pub user_id: String,
    pub file_id: Option<String>,
    pub job_id: Option<String>,
    pub file_type: Option<String>,
    pub session_id: Option<String>,
    pub total_chunks: Option<u32>,
    pub file_path: Option<String>,
}

struct TokenRecord {
    kind: TokenKind,
    payload: TokenPayload,
    expires_at: Instant,
}

/// Advisory queues and short-lived tokens shared across request handlers
/// and the background control loop.
pub struct EphemeralStore {
    dispatch_queue: RwLock<VecDeque<String>>,
    completion_inbox: RwLock<VecDeque<String>>,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    revoked: RwLock<HashMap<String, Instant>>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self {
            dispatch_queue: RwLock::new(VecDeque::new()),
            completion_inbox: RwLock::new(VecDeque::new()),
            tokens: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    // --- dispatch queue -------------------------------------------------

    pub async fn enqueue_job(&self, job_id: &str) {
        self.dispatch_queue.write().await.push_back(job_id.to_string());
    }

    pub async fn dequeue_job(&self) -> Option<String> {
        self.dispatch_queue.write().await.pop_front()
    }

    pub async fn queue_contains(&self, job_id: &str) -> bool {
        self.dispatch_queue.read().await.iter().any(|j| j == job_id)
    }

    pub async fn prune_from_queue(&self, job_id: &str) {
        self.dispatch_queue.write().await.retain(|j| j != job_id);
    }

    // --- completion inbox -------------------------------------------------

    pub async fn push_completed(&self, job_id: &str) {
        self.completion_inbox.write().await.push_back(job_id.to_string());
    }

    pub async fn pop_completed(&self) -> Option<String> {
        self.completion_inbox.write().await.pop_front()
    }

    // --- tokens -------------------------------------------------

    pub async fn mint_token(&self, kind: TokenKind, payload: TokenPayload, ttl: Duration) -> String {
        let token = Uuid::new_v4().to_string();
        let record = TokenRecord {
            kind,
            payload,
            expires_at: Instant::now() + ttl,
        };
        self.tokens.write().await.insert(token.clone(), record);
        token
    }

    /// Burn a token and return its payload, verifying kind/user/expiry.
    pub async fn consume_token(
        &self,
        kind: TokenKind,
        token: &str,
        user_id: &str,
    ) -> Option<TokenPayload> {
        let mut tokens = self.tokens.write().await;
        let record = tokens.get(token)?;
        if record.kind != kind || record.expires_at < Instant::now() || record.payload.user_id != user_id
        {
            return None;
        }
        Some(tokens.remove(token)?.payload)
    }

    /// Peek at a live upload token without burning it, for chunked
    /// uploads that must mutate the payload across several requests.
    pub async fn peek_upload_token(&self, token: &str, user_id: &str) -> Option<TokenPayload> {
        let tokens = self.tokens.read().await;
        let record = tokens.get(token)?;
        if record.kind != TokenKind::Upload
            || record.expires_at < Instant::now()
            || record.payload.user_id != user_id
        {
            return None;
        }
        Some(record.payload.clone())
    }

    pub async fn update_upload_token(&self, token: &str, payload: TokenPayload, ttl: Duration) {
        if let Some(record) = self.tokens.write().await.get_mut(token) {
            record.payload = payload;
            record.expires_at = Instant::now() + ttl;
        }
    }

    pub async fn burn_token(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }

    // --- revocation set -------------------------------------------------

    pub async fn revoke(&self, token: &str, ttl: Duration) {
        self.revoked.write().await.insert(token.to_string(), Instant::now() + ttl);
    }

    pub async fn is_revoked(&self, token: &str) -> bool {
        self.revoked.read().await.contains_key(token)
    }

    /// Drop expired revocation entries and tokens; called periodically
    /// from the control loop so the maps don't grow without bound within
    /// a single TTL window (still unbounded across windows — see design notes).
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        self.revoked.write().await.retain(|_, exp| *exp > now);
        self.tokens.write().await.retain(|_, rec| rec.expires_at > now);
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session locks guaranteeing only one upload assembly runs at a time
/// for a given (token, session) pair.
pub struct AssemblyLocks {
    active: RwLock<HashSet<String>>,
}

impl AssemblyLocks {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashSet::new()),
        }
    }

    /// Try to acquire the assembly lock for a session; returns false if
    /// another request is already assembling it.
    pub async fn try_acquire(&self, session_id: &str) -> bool {
        self.active.write().await.insert(session_id.to_string())
    }

    pub async fn release(&self, session_id: &str) {
        self.active.write().await.remove(session_id);
    }
}

impl Default for AssemblyLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_queue_is_fifo() {
        let store = EphemeralStore::new();
        store.enqueue_job("a").await;
        store.enqueue_job("b").await;
        assert_eq!(store.dequeue_job().await.as_deref(), Some("a"));
        assert_eq!(store.dequeue_job().await.as_deref(), Some("b"));
        assert_eq!(store.dequeue_job().await, None);
    }

    #[tokio::test]
    async fn prune_from_queue_removes_only_the_named_job() {
        let store = EphemeralStore::new();
        store.enqueue_job("a").await;
        store.enqueue_job("b").await;
        store.prune_from_queue("a").await;
        assert!(!store.queue_contains("a").await);
        assert!(store.queue_contains("b").await);
    }

    #[tokio::test]
    async fn token_is_single_use() {
        let store = EphemeralStore::new();
        let payload = TokenPayload {
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let token = store
            .mint_token(TokenKind::Download, payload, Duration::from_secs(60))
            .await;

        assert!(store.consume_token(TokenKind::Download, &token, "alice").await.is_some());
        assert!(store.consume_token(TokenKind::Download, &token, "alice").await.is_none());
    }

    #[tokio::test]
    async fn token_is_bound_to_the_minting_user() {
        let store = EphemeralStore::new();
        let payload = TokenPayload {
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let token = store
            .mint_token(TokenKind::Download, payload, Duration::from_secs(60))
            .await;

        assert!(store.consume_token(TokenKind::Download, &token, "mallory").await.is_none());
        // The failed attempt must not have burned it for its rightful owner.
        assert!(store.consume_token(TokenKind::Download, &token, "alice").await.is_some());
    }

    #[tokio::test]
    async fn token_kind_mismatch_is_rejected() {
        let store = EphemeralStore::new();
        let payload = TokenPayload {
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let token = store
            .mint_token(TokenKind::Upload, payload, Duration::from_secs(60))
            .await;

        assert!(store.consume_token(TokenKind::Download, &token, "alice").await.is_none());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let store = EphemeralStore::new();
        let payload = TokenPayload {
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let token = store
            .mint_token(TokenKind::Download, payload, Duration::from_secs(0))
            .await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(store.consume_token(TokenKind::Download, &token, "alice").await.is_none());
    }

    #[tokio::test]
    async fn sweep_expired_drops_stale_tokens_and_revocations() {
        let store = EphemeralStore::new();
        let payload = TokenPayload {
            user_id: "alice".to_string(),
            ..Default::default()
        };
        let token = store
            .mint_token(TokenKind::Upload, payload, Duration::from_secs(0))
            .await;
        store.revoke("refresh-token", Duration::from_secs(0)).await;

        tokio::time::sleep(Duration::from_millis(5)).await;
        store.sweep_expired().await;

        assert!(store.peek_upload_token(&token, "alice").await.is_none());
        assert!(!store.is_revoked("refresh-token").await);
    }

    #[tokio::test]
    async fn assembly_lock_excludes_concurrent_holders() {
        let locks = AssemblyLocks::new();
        assert!(locks.try_acquire("session-1").await);
        assert!(!locks.try_acquire("session-1").await);
        locks.release("session-1").await;
        assert!(locks.try_acquire("session-1").await);
    }
}
