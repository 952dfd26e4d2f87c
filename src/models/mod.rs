pub mod account;
pub mod link;
pub mod session;

pub use account::{Account, CredentialsRequest};
pub use link::{CreateLinkRequest, Link, QueryLogEntry};
pub use session::{RefreshRequest, Session};
