use crate::models::{Account, Link, QueryLogEntry, Session};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// A unique constraint rejected the write.
    #[error("record already exists")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Relational store backing accounts, sessions, links and the query log.
///
/// Every uniqueness guarantee is enforced by the store itself: the `create_*`
/// methods are single conditional inserts that report [`StorageError::Conflict`]
/// when a unique column already holds the value.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert an account unless the email is taken
    async fn create_account(&self, email: &str, password_hash: &str) -> StorageResult<Account>;

    async fn get_account_by_email(&self, email: &str) -> StorageResult<Option<Account>>;

    /// Persist a refresh-token session keyed by the token digest
    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: i64,
    ) -> StorageResult<Session>;

    async fn get_session_by_token_hash(&self, token_hash: &str) -> StorageResult<Option<Session>>;

    /// Mark a session revoked. Returns false if it was unknown or already revoked.
    async fn revoke_session(&self, session_id: i64) -> StorageResult<bool>;

    /// Revoke every live session of an account, returning how many changed
    async fn revoke_account_sessions(&self, account_id: i64) -> StorageResult<u64>;

    /// Delete sessions that are revoked or expired as of `now`
    async fn purge_sessions(&self, now: i64) -> StorageResult<u64>;

    /// Insert a link unless the short code is taken
    async fn create_link(
        &self,
        short_code: &str,
        target_url: &str,
        owner_account_id: i64,
    ) -> StorageResult<Link>;

    async fn get_link(&self, short_code: &str) -> StorageResult<Option<Link>>;

    /// Atomically bump `hit_count` and append a query log entry in one transaction
    async fn record_hit(
        &self,
        link_id: i64,
        queried_by_account_id: i64,
        queried_at: i64,
    ) -> StorageResult<()>;

    async fn list_query_log(&self, link_id: i64) -> StorageResult<Vec<QueryLogEntry>>;
}
