//! Accounts, passwords and the two kinds of tokens.
//!
//! Access tokens are short-lived signed JWTs checked without a store round
//! trip. Refresh tokens are opaque random strings whose authority comes only
//! from a live row in the `sessions` table.

pub mod manager;
pub mod password;
pub mod tokens;

pub use manager::{AccountManager, LoginTokens};
pub use tokens::{AccessClaims, AccessToken, TokenSigner};
