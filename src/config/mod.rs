use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;
const MAX_REFRESH_TOKEN_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Stands in for JWT_SECRET in tools that never sign or verify tokens
const UNUSED_SIGNING_SECRET: &str = "olympic-admin-signs-no-tokens";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub auth: AuthConfig,
    pub links: LinkConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Signing key and token lifetimes for the account manager
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "AuthConfig::default_access_token_ttl_secs")]
    pub access_token_ttl_secs: i64,
    #[serde(default = "AuthConfig::default_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: i64,
}

// Keeps the signing secret out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("refresh_token_ttl_secs", &self.refresh_token_ttl_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "LinkConfig::default_short_code_max_length")]
    pub short_code_max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Bounded queue between redirects and the background writers
    pub queue_capacity: usize,
    /// Number of hit records written concurrently
    pub workers: usize,
    /// Total attempts per hit record before it is given up
    pub max_attempts: u32,
    /// Upper bound on draining queued records at shutdown
    pub drain_timeout_secs: u64,
}

impl DatabaseConfig {
    const fn default_max_connections() -> u32 {
        10
    }
}

impl AuthConfig {
    const fn default_access_token_ttl_secs() -> i64 {
        15 * 60
    }

    const fn default_refresh_token_ttl_secs() -> i64 {
        7 * 24 * 60 * 60
    }

    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_token_ttl_secs: Self::default_access_token_ttl_secs(),
            refresh_token_ttl_secs: Self::default_refresh_token_ttl_secs(),
        }
    }
}

impl LinkConfig {
    const fn default_short_code_max_length() -> usize {
        32
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            short_code_max_length: Self::default_short_code_max_length(),
        }
    }
}

impl AnalyticsConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            workers: 4,
            max_attempts: 3,
            drain_timeout_secs: 10,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

/// JWT_SECRET is mandatory for the server. Tools that never touch tokens
/// may run without it.
fn resolve_jwt_secret(value: Option<String>, required: bool) -> anyhow::Result<String> {
    match value {
        Some(secret) => Ok(secret),
        None if required => bail!("JWT_SECRET must be set"),
        None => Ok(UNUSED_SIGNING_SECRET.to_string()),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load(true)
    }

    /// Same as [`Config::from_env`] but with JWT_SECRET optional, for the
    /// admin tool whose commands never issue or check tokens.
    pub fn from_env_for_admin() -> anyhow::Result<Self> {
        Self::load(false)
    }

    fn load(secret_required: bool) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./olympic.db?mode=rwc".to_string());
        let max_connections =
            env_or("DATABASE_MAX_CONNECTIONS", DatabaseConfig::default_max_connections())?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_or("API_PORT", 8080u16)?;

        let jwt_secret = resolve_jwt_secret(std::env::var("JWT_SECRET").ok(), secret_required)?;
        let access_token_ttl_secs = env_or(
            "ACCESS_TOKEN_TTL_SECS",
            AuthConfig::default_access_token_ttl_secs(),
        )?;
        let refresh_token_ttl_secs = env_or(
            "REFRESH_TOKEN_TTL_SECS",
            AuthConfig::default_refresh_token_ttl_secs(),
        )?;

        let short_code_max_length = env_or(
            "SHORT_CODE_MAX_LENGTH",
            LinkConfig::default_short_code_max_length(),
        )?;

        let analytics_defaults = AnalyticsConfig::default();
        let analytics = AnalyticsConfig {
            queue_capacity: env_or("ANALYTICS_QUEUE_CAPACITY", analytics_defaults.queue_capacity)?,
            workers: env_or("ANALYTICS_WORKERS", analytics_defaults.workers)?,
            max_attempts: env_or("ANALYTICS_MAX_ATTEMPTS", analytics_defaults.max_attempts)?,
            drain_timeout_secs: env_or(
                "ANALYTICS_DRAIN_TIMEOUT_SECS",
                analytics_defaults.drain_timeout_secs,
            )?,
        };

        let config = Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            auth: AuthConfig {
                jwt_secret,
                access_token_ttl_secs,
                refresh_token_ttl_secs,
            },
            links: LinkConfig {
                short_code_max_length,
            },
            analytics,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth.jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        if !(1..=MAX_ACCESS_TOKEN_TTL_SECS).contains(&self.auth.access_token_ttl_secs) {
            bail!("ACCESS_TOKEN_TTL_SECS must be between 1 and {MAX_ACCESS_TOKEN_TTL_SECS}");
        }
        if !(1..=MAX_REFRESH_TOKEN_TTL_SECS).contains(&self.auth.refresh_token_ttl_secs) {
            bail!("REFRESH_TOKEN_TTL_SECS must be between 1 and {MAX_REFRESH_TOKEN_TTL_SECS}");
        }
        if self.database.max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if self.links.short_code_max_length == 0 {
            bail!("SHORT_CODE_MAX_LENGTH must be at least 1");
        }
        if self.analytics.queue_capacity == 0 || self.analytics.workers == 0 {
            bail!("ANALYTICS_QUEUE_CAPACITY and ANALYTICS_WORKERS must be at least 1");
        }
        if self.analytics.max_attempts == 0 {
            bail!("ANALYTICS_MAX_ATTEMPTS must be at least 1");
        }
        Ok(())
    }
}
