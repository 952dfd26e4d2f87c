use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Redirect,
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::middleware::AuthenticatedAccount;
use crate::auth::AccountManager;
use crate::error::ServiceError;
use crate::links::LinkRegistry;
use crate::models::{CreateLinkRequest, CredentialsRequest, Link, RefreshRequest};

pub struct AppState {
    pub accounts: Arc<AccountManager>,
    pub links: Arc<LinkRegistry>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub email: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub refresh_token: String,
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

/// Map a service failure onto a status code and client-safe message.
///
/// Auth failures share one message so clients cannot tell which check failed.
pub fn error_response(err: ServiceError) -> ApiError {
    let (status, message) = match &err {
        ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, err.to_string()),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        ServiceError::Auth(reason) => {
            tracing::debug!(%reason, "Request rejected");
            (StatusCode::UNAUTHORIZED, "authentication failed".to_string())
        }
        ServiceError::Storage(_) | ServiceError::Internal(_) => {
            tracing::error!(error = %err, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            )
        }
    };

    (status, Json(ErrorResponse { error: message }))
}

/// Register a new account
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<AccountResponse>)> {
    let account = state
        .accounts
        .create_account(&payload.email, &payload.password)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(AccountResponse {
            id: account.id,
            email: account.email,
        }),
    ))
}

/// Exchange credentials for a refresh token and an access token
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let tokens = state
        .accounts
        .login(&payload.email, &payload.password)
        .await
        .map_err(error_response)?;

    Ok(Json(LoginResponse {
        refresh_token: tokens.refresh_token,
        access_token: tokens.access_token.token,
        token_type: "Bearer",
        expires_in: state.accounts.access_token_ttl_secs(),
    }))
}

/// Mint a new access token from a refresh token
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    let access_token = state
        .accounts
        .refresh(&payload.refresh_token)
        .await
        .map_err(error_response)?;

    Ok(Json(RefreshResponse {
        access_token: access_token.token,
        token_type: "Bearer",
        expires_in: state.accounts.access_token_ttl_secs(),
    }))
}

/// Revoke a refresh token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<SuccessResponse>> {
    let session = state
        .accounts
        .validate_refresh_token(&payload.refresh_token)
        .await
        .map_err(error_response)?;
    state
        .accounts
        .logout(&session)
        .await
        .map_err(error_response)?;

    Ok(Json(SuccessResponse {
        message: "Logged out".to_string(),
    }))
}

/// Claim a short code for the caller
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account_id)): Extension<AuthenticatedAccount>,
    Json(payload): Json<CreateLinkRequest>,
) -> ApiResult<(StatusCode, Json<Link>)> {
    let link = state
        .links
        .create_link(&payload.url, &payload.short_code, account_id)
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(link)))
}

/// Redirect to the target of a short code
pub async fn resolve_link(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account_id)): Extension<AuthenticatedAccount>,
    Path(code): Path<String>,
) -> ApiResult<Redirect> {
    let target_url = state
        .links
        .get_link(&code, account_id)
        .await
        .map_err(error_response)?;

    Ok(Redirect::temporary(&target_url))
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
