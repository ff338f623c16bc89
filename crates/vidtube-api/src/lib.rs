pub mod auth;
pub mod credentials;
pub mod error;
pub mod media;
pub mod middleware;
pub mod profile;
pub mod response;
pub mod session;
pub mod subscriptions;
pub mod tokens;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::require_auth;

/// Room for both images plus the text fields of a registration form.
const MAX_BODY_SIZE: usize = 2 * media::MAX_IMAGE_SIZE + 1024 * 1024;

/// All `/api/v1` routes. Transport layers (CORS, tracing, static files) are
/// added by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/users/register", post(auth::register))
        .route("/users/login", post(auth::login))
        .route("/users/refresh-token", post(auth::refresh_token));

    let protected_routes = Router::new()
        .route("/users/logout", post(auth::logout))
        .route("/users/change-password", post(auth::change_password))
        .route("/users/current-user", get(users::current_user))
        .route("/users/update-account", patch(users::update_account))
        .route("/users/avatar", patch(users::update_avatar))
        .route("/users/cover-image", patch(users::update_cover_image))
        .route("/users/c/{username}", get(users::channel_profile))
        .route("/users/history", get(users::watch_history))
        .route("/users/history/{video_id}", post(users::record_watch))
        .route("/subscriptions/c/{channel_id}", post(subscriptions::toggle_subscription))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let api = public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health))
        .fallback(route_not_found)
}

async fn route_not_found() -> ApiError {
    ApiError::NotFound("Route".into())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
