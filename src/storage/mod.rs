pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

/// Current Unix timestamp in seconds
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
