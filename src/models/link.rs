use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub target_url: String,
    pub owner_account_id: i64,
    pub hit_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct QueryLogEntry {
    pub id: i64,
    pub link_id: i64,
    pub queried_by_account_id: i64,
    pub queried_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkRequest {
    pub url: String,
    pub short_code: String,
}
