use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::auth::password::{burn_verification, hash_password, verify_password};
use crate::auth::tokens::{generate_refresh_token, refresh_token_digest, AccessToken, TokenSigner};
use crate::config::AuthConfig;
use crate::error::{AuthFailure, ServiceError, ServiceResult};
use crate::models::{Account, Session};
use crate::storage::{unix_now, Storage, StorageError};
use crate::validation::{canonical_email, normalize_email, validate_password};

/// Tokens handed out by a successful login
#[derive(Debug, Clone, Serialize)]
pub struct LoginTokens {
    pub account_id: i64,
    pub refresh_token: String,
    pub access_token: AccessToken,
}

/// Accounts, refresh-token sessions and access-token issuance.
pub struct AccountManager {
    storage: Arc<dyn Storage>,
    signer: TokenSigner,
    refresh_ttl_secs: i64,
}

impl AccountManager {
    pub fn new(storage: Arc<dyn Storage>, config: &AuthConfig) -> Self {
        Self {
            storage,
            signer: TokenSigner::new(&config.jwt_secret, config.access_token_ttl_secs),
            refresh_ttl_secs: config.refresh_token_ttl_secs,
        }
    }

    pub fn access_token_ttl_secs(&self) -> i64 {
        self.signer.ttl_secs()
    }

    /// Register a new account. The email must not already be taken.
    pub async fn create_account(&self, email: &str, password: &str) -> ServiceResult<Account> {
        let email = normalize_email(email)?;
        validate_password(password)?;

        let password = password.to_owned();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ServiceError::Internal(format!("password hashing task failed: {e}")))?
            .map_err(|e| ServiceError::Internal(format!("password hashing failed: {e}")))?;

        match self.storage.create_account(&email, &password_hash).await {
            Ok(account) => {
                info!(account_id = account.id, domain = email_domain(&email), "Account created");
                Ok(account)
            }
            Err(StorageError::Conflict) => Err(ServiceError::Conflict("account".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials and open a new session.
    ///
    /// Unknown emails and wrong passwords fail identically and cost the same
    /// single Argon2 verification.
    pub async fn login(&self, email: &str, password: &str) -> ServiceResult<LoginTokens> {
        let email = canonical_email(email);
        let account = self.storage.get_account_by_email(&email).await?;

        let password = password.to_owned();
        let verified = tokio::task::spawn_blocking(move || match account {
            Some(account) => match verify_password(&password, &account.password_hash) {
                Ok(true) => Ok(Some(account)),
                Ok(false) => Ok(None),
                Err(e) => Err(e),
            },
            None => {
                burn_verification(&password);
                Ok(None)
            }
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("password verification task failed: {e}")))?
        .map_err(|e| ServiceError::Internal(format!("stored password hash is unreadable: {e}")))?;

        let Some(account) = verified else {
            debug!(domain = email_domain(&email), "Login rejected");
            return Err(ServiceError::Auth(AuthFailure::InvalidCredentials));
        };

        let now = unix_now();
        let refresh_token = generate_refresh_token();
        let session = self
            .storage
            .create_session(
                account.id,
                &refresh_token_digest(&refresh_token),
                now.saturating_add(self.refresh_ttl_secs),
            )
            .await?;
        let access_token = self.sign_access_token(account.id, now)?;

        info!(account_id = account.id, session_id = session.id, "Login succeeded");
        Ok(LoginTokens {
            account_id: account.id,
            refresh_token,
            access_token,
        })
    }

    /// Verify signature and expiry of an access token. Never touches the store.
    pub fn validate_access_token(&self, token: &str) -> ServiceResult<i64> {
        self.signer.verify(token).map_err(ServiceError::Auth)
    }

    /// Resolve a refresh token to its live session.
    pub async fn validate_refresh_token(&self, token: &str) -> ServiceResult<Session> {
        let session = self
            .storage
            .get_session_by_token_hash(&refresh_token_digest(token))
            .await?
            .ok_or(ServiceError::Auth(AuthFailure::InvalidToken))?;

        if session.revoked {
            return Err(ServiceError::Auth(AuthFailure::RevokedToken));
        }
        if session.is_expired_at(unix_now()) {
            return Err(ServiceError::Auth(AuthFailure::ExpiredToken));
        }
        Ok(session)
    }

    pub fn generate_access_token(&self, account_id: i64) -> ServiceResult<AccessToken> {
        self.sign_access_token(account_id, unix_now())
    }

    /// Mint a new access token from a refresh token. The refresh token itself
    /// is left unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<AccessToken> {
        let session = self.validate_refresh_token(refresh_token).await?;
        debug!(account_id = session.account_id, session_id = session.id, "Refreshing access token");
        self.generate_access_token(session.account_id)
    }

    /// Revoke the session's refresh token. Repeating it is a no-op.
    ///
    /// Access tokens already issued for the account stay valid until they
    /// expire on their own; they carry no session reference to check.
    pub async fn logout(&self, session: &Session) -> ServiceResult<()> {
        let revoked = self.storage.revoke_session(session.id).await?;
        if revoked {
            info!(account_id = session.account_id, session_id = session.id, "Session revoked");
        }
        Ok(())
    }

    pub async fn account_by_email(&self, email: &str) -> ServiceResult<Account> {
        self.storage
            .get_account_by_email(&canonical_email(email))
            .await?
            .ok_or_else(|| ServiceError::NotFound("account".to_string()))
    }

    /// Revoke every outstanding refresh token of an account.
    pub async fn revoke_all_sessions(&self, account_id: i64) -> ServiceResult<u64> {
        let count = self.storage.revoke_account_sessions(account_id).await?;
        info!(account_id, count, "Revoked all sessions");
        Ok(count)
    }

    /// Delete revoked and expired sessions.
    pub async fn purge_sessions(&self) -> ServiceResult<u64> {
        let count = self.storage.purge_sessions(unix_now()).await?;
        info!(count, "Purged sessions");
        Ok(count)
    }

    fn sign_access_token(&self, account_id: i64, now: i64) -> ServiceResult<AccessToken> {
        self.signer.issue(account_id, now).map_err(|e| {
            warn!(account_id, "Failed to sign access token");
            ServiceError::Internal(format!("token signing failed: {e}"))
        })
    }
}

fn email_domain(email: &str) -> &str {
    email.rsplit_once('@').map_or("", |(_, domain)| domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn manager_with(config: AuthConfig) -> (AccountManager, Arc<dyn Storage>) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        (AccountManager::new(Arc::clone(&storage), &config), storage)
    }

    async fn manager() -> AccountManager {
        manager_with(AuthConfig::new("unit-test-secret")).await.0
    }

    #[tokio::test]
    async fn login_issues_token_for_account() {
        let manager = manager().await;
        let account = manager.create_account("a@x.com", "pw1").await.unwrap();

        let tokens = manager.login("a@x.com", "pw1").await.unwrap();

        assert_eq!(tokens.account_id, account.id);
        assert_eq!(
            manager.validate_access_token(&tokens.access_token.token).unwrap(),
            account.id
        );
    }

    #[tokio::test]
    async fn login_normalizes_email() {
        let manager = manager().await;
        manager.create_account(" A@X.com", "pw1").await.unwrap();

        assert!(manager.login("a@x.COM ", "pw1").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_the_same_way() {
        let manager = manager().await;
        manager.create_account("a@x.com", "pw1").await.unwrap();

        let wrong_password = manager.login("a@x.com", "pw2").await.unwrap_err();
        let unknown = manager.login("b@x.com", "pw1").await.unwrap_err();

        assert!(matches!(wrong_password, ServiceError::Auth(AuthFailure::InvalidCredentials)));
        assert!(matches!(unknown, ServiceError::Auth(AuthFailure::InvalidCredentials)));
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_usable() {
        let manager = manager().await;
        let account = manager.create_account("a@x.com", "pw1").await.unwrap();
        let tokens = manager.login("a@x.com", "pw1").await.unwrap();

        let first = manager.refresh(&tokens.refresh_token).await.unwrap();
        let second = manager.refresh(&tokens.refresh_token).await.unwrap();

        assert_eq!(manager.validate_access_token(&first.token).unwrap(), account.id);
        assert_eq!(manager.validate_access_token(&second.token).unwrap(), account.id);
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected() {
        let mut config = AuthConfig::new("unit-test-secret");
        config.refresh_token_ttl_secs = -1;
        let (manager, _) = manager_with(config).await;
        manager.create_account("a@x.com", "pw1").await.unwrap();
        let tokens = manager.login("a@x.com", "pw1").await.unwrap();

        let err = manager.validate_refresh_token(&tokens.refresh_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthFailure::ExpiredToken)));
    }

    #[tokio::test]
    async fn login_with_huge_lifetimes_does_not_overflow() {
        let mut config = AuthConfig::new("unit-test-secret");
        config.access_token_ttl_secs = i64::MAX;
        config.refresh_token_ttl_secs = i64::MAX;
        let (manager, _) = manager_with(config).await;
        manager.create_account("a@x.com", "pw1").await.unwrap();

        let tokens = manager.login("a@x.com", "pw1").await.unwrap();

        assert_eq!(tokens.access_token.expires_at, i64::MAX);
        let session = manager.validate_refresh_token(&tokens.refresh_token).await.unwrap();
        assert_eq!(session.expires_at, i64::MAX);
    }

    #[tokio::test]
    async fn unknown_refresh_token_is_invalid() {
        let manager = manager().await;

        let err = manager.validate_refresh_token("no-such-token").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthFailure::InvalidToken)));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_leaves_other_sessions_alone() {
        let manager = manager().await;
        manager.create_account("a@x.com", "pw1").await.unwrap();
        let laptop = manager.login("a@x.com", "pw1").await.unwrap();
        let phone = manager.login("a@x.com", "pw1").await.unwrap();

        let session = manager.validate_refresh_token(&laptop.refresh_token).await.unwrap();
        manager.logout(&session).await.unwrap();
        manager.logout(&session).await.unwrap();

        let err = manager.validate_refresh_token(&laptop.refresh_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthFailure::RevokedToken)));
        assert!(manager.validate_refresh_token(&phone.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_all_then_purge() {
        let manager = manager().await;
        let account = manager.create_account("a@x.com", "pw1").await.unwrap();
        let first = manager.login("a@x.com", "pw1").await.unwrap();
        manager.login("a@x.com", "pw1").await.unwrap();

        assert_eq!(manager.revoke_all_sessions(account.id).await.unwrap(), 2);
        assert_eq!(manager.revoke_all_sessions(account.id).await.unwrap(), 0);
        assert_eq!(manager.purge_sessions().await.unwrap(), 2);

        let err = manager.validate_refresh_token(&first.refresh_token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(AuthFailure::InvalidToken)));
    }

    #[tokio::test]
    async fn account_lookup_by_email() {
        let manager = manager().await;
        let account = manager.create_account("a@x.com", "pw1").await.unwrap();

        assert_eq!(manager.account_by_email("A@x.com").await.unwrap().id, account.id);
        assert!(matches!(
            manager.account_by_email("b@x.com").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn domain_is_extracted_for_logging() {
        assert_eq!(email_domain("a@x.com"), "x.com");
        assert_eq!(email_domain("nodomain"), "");
    }
}
