use crate::models::{Account, Link, QueryLogEntry, Session};
use crate::storage::{unix_now, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id),
                token_hash TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_account ON sessions(account_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS links (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                short_code TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL,
                owner_account_id INTEGER NOT NULL REFERENCES accounts(id),
                hit_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                link_id INTEGER NOT NULL REFERENCES links(id),
                queried_by_account_id INTEGER NOT NULL,
                queried_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_query_log_link ON query_log(link_id)")
            .execute(self.pool.as_ref())
            .await?;

        Ok(())
    }

    async fn create_account(&self, email: &str, password_hash: &str) -> StorageResult<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (email, password_hash, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(email) DO NOTHING
            RETURNING id, email, password_hash, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(unix_now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        account.ok_or(StorageError::Conflict)
    }

    async fn get_account_by_email(&self, email: &str) -> StorageResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, email, password_hash, created_at
            FROM accounts
            WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(account)
    }

    async fn create_session(
        &self,
        account_id: i64,
        token_hash: &str,
        expires_at: i64,
    ) -> StorageResult<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (account_id, token_hash, created_at, expires_at, revoked)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(token_hash) DO NOTHING
            RETURNING id, account_id, token_hash, created_at, expires_at, revoked
            "#,
        )
        .bind(account_id)
        .bind(token_hash)
        .bind(unix_now())
        .bind(expires_at)
        .fetch_optional(self.pool.as_ref())
        .await?;

        session.ok_or(StorageError::Conflict)
    }

    async fn get_session_by_token_hash(&self, token_hash: &str) -> StorageResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, account_id, token_hash, created_at, expires_at, revoked
            FROM sessions
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(session)
    }

    async fn revoke_session(&self, session_id: i64) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = 1
            WHERE id = ? AND revoked = 0
            "#,
        )
        .bind(session_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_account_sessions(&self, account_id: i64) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked = 1
            WHERE account_id = ? AND revoked = 0
            "#,
        )
        .bind(account_id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_sessions(&self, now: i64) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE revoked = 1 OR expires_at <= ?
            "#,
        )
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_link(
        &self,
        short_code: &str,
        target_url: &str,
        owner_account_id: i64,
    ) -> StorageResult<Link> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            INSERT INTO links (short_code, target_url, owner_account_id, hit_count, created_at)
            VALUES (?, ?, ?, 0, ?)
            ON CONFLICT(short_code) DO NOTHING
            RETURNING id, short_code, target_url, owner_account_id, hit_count, created_at
            "#,
        )
        .bind(short_code)
        .bind(target_url)
        .bind(owner_account_id)
        .bind(unix_now())
        .fetch_optional(self.pool.as_ref())
        .await?;

        link.ok_or(StorageError::Conflict)
    }

    async fn get_link(&self, short_code: &str) -> StorageResult<Option<Link>> {
        let link = sqlx::query_as::<_, Link>(
            r#"
            SELECT id, short_code, target_url, owner_account_id, hit_count, created_at
            FROM links
            WHERE short_code = ?
            "#,
        )
        .bind(short_code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(link)
    }

    async fn record_hit(
        &self,
        link_id: i64,
        queried_by_account_id: i64,
        queried_at: i64,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE links
            SET hit_count = hit_count + 1
            WHERE id = ?
            "#,
        )
        .bind(link_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::Other(anyhow!("link {link_id} does not exist")));
        }

        sqlx::query(
            r#"
            INSERT INTO query_log (link_id, queried_by_account_id, queried_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(link_id)
        .bind(queried_by_account_id)
        .bind(queried_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_query_log(&self, link_id: i64) -> StorageResult<Vec<QueryLogEntry>> {
        let entries = sqlx::query_as::<_, QueryLogEntry>(
            r#"
            SELECT id, link_id, queried_by_account_id, queried_at
            FROM query_log
            WHERE link_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(entries)
    }
}
