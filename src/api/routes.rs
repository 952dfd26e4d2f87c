use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::auth::AccountManager;
use crate::links::LinkRegistry;

use super::handlers::{
    create_account, create_link, health_check, login, logout, refresh, resolve_link, AppState,
};
use super::middleware::require_access_token;

pub fn create_api_router(accounts: Arc<AccountManager>, links: Arc<LinkRegistry>) -> Router {
    let state = Arc::new(AppState { accounts, links });

    let protected_routes = Router::new()
        .route("/api/links", post(create_link))
        .route("/api/links/{code}", get(resolve_link))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_access_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/accounts", post(create_account))
        .route("/api/login", post(login))
        .route("/api/refresh", post(refresh))
        .route("/api/logout", post(logout))
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
