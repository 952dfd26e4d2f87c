use crate::models::{Account, Link, QueryLogEntry, Session};
use crate::storage::{unix_now, Storage, StorageError, StorageResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id BIGSERIAL PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id BIGSERIAL PRIMARY KEY,
                account_id BIGINT NOT NULL REFERENCES accounts(id),
                token_hash TEXT NOT NULL UNIQUE,
                created_at BIGINT NOT NULL,
                expires_at BIGINT NOT NULL,
                revoked BOOLEAN NOT NULL DEFAULT FALSE
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
                id BIGSERIAL PRIMARY KEY,
                short_code TEXT NOT NULL UNIQUE,
                target_url TEXT NOT NULL,
                owner_account_id BIGINT NOT NULL REFERENCES accounts(id),
                hit_count BIGINT NOT NULL DEFAULT 0,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS query_log (
                id BIGSERIAL PRIMARY KEY,
                link_id BIGINT NOT NULL REFERENCES links(id),
                queried_by_account_id BIGINT NOT NULL,
                queried_at BIGINT NOT NULL
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
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO NOTHING
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
            WHERE email = $1
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
            VALUES ($1, $2, $3, $4, FALSE)
            ON CONFLICT (token_hash) DO NOTHING
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
            WHERE token_hash = $1
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
            SET revoked = TRUE
            WHERE id = $1 AND revoked = FALSE
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
            SET revoked = TRUE
            WHERE account_id = $1 AND revoked = FALSE
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
            WHERE revoked = TRUE OR expires_at <= $1
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
            VALUES ($1, $2, $3, 0, $4)
            ON CONFLICT (short_code) DO NOTHING
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
            WHERE short_code = $1
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
            WHERE id = $1
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
            VALUES ($1, $2, $3)
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
            WHERE link_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(link_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(entries)
    }
}
