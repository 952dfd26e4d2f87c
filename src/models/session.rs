use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted refresh-token session. Only the digest of the token is stored.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Session {
    pub id: i64,
    pub account_id: i64,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub revoked: bool,
}

impl Session {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}
