//! Signed access tokens and opaque refresh tokens.

use base64::prelude::*;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthFailure;

const REFRESH_TOKEN_BYTES: usize = 32;

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Account id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// A freshly signed access token and its expiry (Unix seconds)
#[derive(Debug, Clone, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: i64,
}

/// HS256 signer/verifier bound to the server's shared secret.
#[derive(Clone)]
pub struct TokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl TokenSigner {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs,
        }
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    /// Sign a token for `account_id` valid for the configured lifetime from `now`.
    pub fn issue(&self, account_id: i64, now: i64) -> jsonwebtoken::errors::Result<AccessToken> {
        let claims = AccessClaims {
            sub: account_id.to_string(),
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &AccessClaims) -> jsonwebtoken::errors::Result<AccessToken> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)?;
        Ok(AccessToken {
            token,
            expires_at: claims.exp,
        })
    }

    /// Check signature and expiry, returning the subject account id.
    pub fn verify(&self, token: &str) -> Result<i64, AuthFailure> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthFailure::ExpiredToken,
                _ => AuthFailure::InvalidToken,
            },
        )?;

        data.claims
            .sub
            .parse::<i64>()
            .map_err(|_| AuthFailure::InvalidToken)
    }
}

/// New opaque refresh token: 32 random bytes, base64url without padding.
pub fn generate_refresh_token() -> String {
    let bytes: [u8; REFRESH_TOKEN_BYTES] = rand::random();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Digest under which a refresh token is persisted and looked up.
pub fn refresh_token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(digest)
}
