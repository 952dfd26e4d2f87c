use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::handlers::{error_response, AppState};
use crate::error::{AuthFailure, ServiceError};

/// Account id taken from a verified access token
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedAccount(pub i64);

/// Require `Authorization: Bearer <access token>` and expose the subject to
/// downstream handlers.
pub async fn require_access_token(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let verified = match bearer_token(&request) {
        Some(token) => state.accounts.validate_access_token(token),
        None => Err(ServiceError::Auth(AuthFailure::InvalidToken)),
    };

    match verified {
        Ok(account_id) => {
            request
                .extensions_mut()
                .insert(AuthenticatedAccount(account_id));
            next.run(request).await
        }
        Err(err) => error_response(err).into_response(),
    }
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
