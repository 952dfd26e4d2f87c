//! Account and link service integration tests
//!
//! These exercise AccountManager and LinkRegistry together against an
//! in-memory SQLite store, including the background analytics path.

use olympic::analytics::AnalyticsLogger;
use olympic::auth::{AccessClaims, AccountManager, TokenSigner};
use olympic::config::{AnalyticsConfig, AuthConfig, LinkConfig};
use olympic::error::{AuthFailure, ServiceError};
use olympic::links::LinkRegistry;
use olympic::storage::{SqliteStorage, Storage};
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "integration-test-secret";

struct Services {
    storage: Arc<dyn Storage>,
    accounts: Arc<AccountManager>,
    links: Arc<LinkRegistry>,
    analytics: Arc<AnalyticsLogger>,
}

async fn create_services() -> Services {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let analytics = Arc::new(AnalyticsLogger::new(
        Arc::clone(&storage),
        &AnalyticsConfig::default(),
    ));
    let accounts = Arc::new(AccountManager::new(
        Arc::clone(&storage),
        &AuthConfig::new(SECRET),
    ));
    let links = Arc::new(LinkRegistry::new(
        Arc::clone(&storage),
        Arc::clone(&analytics),
        &LinkConfig::default(),
    ));

    Services {
        storage,
        accounts,
        links,
        analytics,
    }
}

/// Wait until the background writer has caught up with `expected` hits
async fn wait_for_hit_count(links: &LinkRegistry, code: &str, expected: i64) -> i64 {
    let mut hit_count = 0;
    for _ in 0..100 {
        hit_count = links.describe_link(code).await.unwrap().hit_count;
        if hit_count >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    hit_count
}

#[tokio::test]
async fn test_concrete_scenario() {
    let services = create_services().await;

    let account = services.accounts.create_account("a@x.com", "pw1").await.unwrap();
    let tokens = services.accounts.login("a@x.com", "pw1").await.unwrap();

    let account_id = services
        .accounts
        .validate_access_token(&tokens.access_token.token)
        .unwrap();
    assert_eq!(account_id, account.id);
    assert_eq!(account_id, 1);

    services
        .links
        .create_link("https://example.com", "abc", account_id)
        .await
        .unwrap();

    let target = services.links.get_link("abc", account_id).await.unwrap();
    assert_eq!(target, "https://example.com");

    assert_eq!(wait_for_hit_count(&services.links, "abc", 1).await, 1);
}

#[tokio::test]
async fn test_duplicate_email_leaves_original_account() {
    let services = create_services().await;
    let original = services.accounts.create_account("a@x.com", "pw1").await.unwrap();

    let err = services
        .accounts
        .create_account("A@X.com", "other-password")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // The original password still works and the row is unchanged
    let stored = services.accounts.account_by_email("a@x.com").await.unwrap();
    assert_eq!(stored.id, original.id);
    assert_eq!(stored.password_hash, original.password_hash);
    assert!(services.accounts.login("a@x.com", "pw1").await.is_ok());
    assert!(services.accounts.login("a@x.com", "other-password").await.is_err());
}

#[tokio::test]
async fn test_wrong_password_issues_no_session() {
    let services = create_services().await;
    let account = services.accounts.create_account("a@x.com", "pw1").await.unwrap();

    let err = services.accounts.login("a@x.com", "wrong").await.unwrap_err();
    assert!(matches!(err, ServiceError::Auth(AuthFailure::InvalidCredentials)));

    // Nothing to revoke means no session row was written
    assert_eq!(services.storage.revoke_account_sessions(account.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_password_is_never_stored_in_plaintext() {
    let services = create_services().await;
    let account = services.accounts.create_account("a@x.com", "pw1").await.unwrap();

    assert_ne!(account.password_hash, "pw1");
    assert!(!account.password_hash.contains("pw1"));
}

#[tokio::test]
async fn test_access_token_validation() {
    let services = create_services().await;
    let account = services.accounts.create_account("a@x.com", "pw1").await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let valid = services.accounts.generate_access_token(account.id).unwrap();
    assert_eq!(
        services.accounts.validate_access_token(&valid.token).unwrap(),
        account.id
    );

    let foreign = TokenSigner::new("some-other-secret", 900)
        .issue(account.id, now)
        .unwrap();
    assert!(matches!(
        services.accounts.validate_access_token(&foreign.token),
        Err(ServiceError::Auth(AuthFailure::InvalidToken))
    ));

    let expired = TokenSigner::new(SECRET, 900)
        .sign(&AccessClaims {
            sub: account.id.to_string(),
            iat: now - 120,
            exp: now - 60,
        })
        .unwrap();
    assert!(matches!(
        services.accounts.validate_access_token(&expired.token),
        Err(ServiceError::Auth(AuthFailure::ExpiredToken))
    ));
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let services = create_services().await;
    services.accounts.create_account("a@x.com", "pw1").await.unwrap();
    let tokens = services.accounts.login("a@x.com", "pw1").await.unwrap();

    let session = services
        .accounts
        .validate_refresh_token(&tokens.refresh_token)
        .await
        .unwrap();
    services.accounts.logout(&session).await.unwrap();

    let err = services
        .accounts
        .validate_refresh_token(&tokens.refresh_token)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Auth(_)));
    assert!(services.accounts.refresh(&tokens.refresh_token).await.is_err());

    // Stateless access tokens outlive the session until they expire
    assert!(services
        .accounts
        .validate_access_token(&tokens.access_token.token)
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_link_same_code() {
    let services = create_services().await;
    let owner_id = services.accounts.create_account("a@x.com", "pw1").await.unwrap().id;

    let mut handles = vec![];
    for i in 0..10 {
        let links = Arc::clone(&services.links);
        handles.push(tokio::spawn(async move {
            links
                .create_link(&format!("https://example.com/{i}"), "race", owner_id)
                .await
        }));
    }

    let mut success_count = 0;
    let mut conflict_count = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => success_count += 1,
            Err(ServiceError::Conflict(_)) => conflict_count += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(success_count, 1, "Exactly one creation should succeed");
    assert_eq!(conflict_count, 9, "All others should conflict");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_redirect_is_counted_once() {
    let services = create_services().await;
    let owner = services.accounts.create_account("a@x.com", "pw1").await.unwrap();
    services
        .links
        .create_link("https://example.com", "counted", owner.id)
        .await
        .unwrap();

    let mut handles = vec![];
    for viewer in 0..25 {
        let links = Arc::clone(&services.links);
        handles.push(tokio::spawn(async move {
            links.get_link("counted", viewer).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "https://example.com");
    }

    assert!(services.analytics.shutdown().await);

    let link = services.links.describe_link("counted").await.unwrap();
    assert_eq!(link.hit_count, 25);
    let log = services.storage.list_query_log(link.id).await.unwrap();
    assert_eq!(log.len(), 25);
    assert_eq!(services.analytics.stats().recorded, 25);
}

#[tokio::test]
async fn test_unknown_short_code_is_not_found() {
    let services = create_services().await;

    assert!(matches!(
        services.links.get_link("nope", 1).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_multiple_sessions_per_account() {
    let services = create_services().await;
    let account = services.accounts.create_account("a@x.com", "pw1").await.unwrap();

    let first = services.accounts.login("a@x.com", "pw1").await.unwrap();
    let second = services.accounts.login("a@x.com", "pw1").await.unwrap();
    assert_ne!(first.refresh_token, second.refresh_token);

    assert!(services.accounts.validate_refresh_token(&first.refresh_token).await.is_ok());
    assert!(services.accounts.validate_refresh_token(&second.refresh_token).await.is_ok());

    assert_eq!(services.accounts.revoke_all_sessions(account.id).await.unwrap(), 2);
    assert!(services.accounts.validate_refresh_token(&first.refresh_token).await.is_err());
    assert!(services.accounts.validate_refresh_token(&second.refresh_token).await.is_err());
}
