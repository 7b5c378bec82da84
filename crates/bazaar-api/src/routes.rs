use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::storage::MAX_IMAGE_SIZE;
use crate::{auth, listings, messages, users};

/// Room for a full set of listing images plus multipart overhead.
const MAX_BODY_SIZE: usize = listings::MAX_IMAGES_PER_LISTING * MAX_IMAGE_SIZE + 1024 * 1024;

/// Builds the API router. Static path segments (`/listings/search`,
/// `/listings/mine`, `/users/profile`, `/users/favorites`) are registered
/// ahead of the `{id}` captures and always win over them.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/listings", get(listings::list))
        .route("/listings/search", get(listings::search))
        .route("/listings/{id}", get(listings::get_one))
        .route("/users/{id}", get(users::get_public_profile));

    let protected_routes = Router::new()
        .route("/auth/verify", get(auth::verify))
        .route("/listings", post(listings::create))
        .route("/listings/mine", get(listings::mine))
        .route("/listings/{id}", put(listings::update).delete(listings::remove))
        .route("/listings/{id}/rate", post(listings::rate))
        .route("/listings/{id}/favorite", post(listings::favorite))
        .route("/listings/{id}/images", post(listings::upload_images))
        .route("/users/profile", get(users::profile).put(users::update_profile))
        .route("/users/avatar", put(users::upload_avatar))
        .route("/users/password", put(users::change_password))
        .route("/users/favorites", get(users::favorites))
        .route("/messages", post(messages::send))
        .route("/messages/conversations", get(messages::conversations))
        .route("/messages/conversations/{id}", get(messages::conversation))
        .route("/messages/unread-count", get(messages::unread_count))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
