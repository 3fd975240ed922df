//! HTTP API

pub mod auth;
pub mod errors;
pub mod handlers;

pub use auth::{JwtAuthority, Principal};
pub use errors::{ApiError, ApiResult, ErrorResponse};

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::listing::LifecycleManager;
use crate::subscription::SubscriptionService;
use handlers::{listings, status, subscriptions};

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub subscriptions: Arc<SubscriptionService>,
    pub auth: Arc<JwtAuthority>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(status::health_check))
        // Developer listings
        .route("/listings", post(listings::create_listing).get(listings::list_listings))
        .route("/listings/:id", get(listings::get_listing).patch(listings::edit_listing))
        .route("/listings/:id/pin", post(listings::request_pin))
        .route("/listings/:id/publish", post(listings::publish_payload))
        .route("/listings/:id/confirm-publish", post(listings::confirm_publish))
        // Public catalogue
        .route("/published", get(listings::list_published))
        .route("/published/:id", get(listings::get_published))
        // Consumer subscriptions
        .route(
            "/subscriptions",
            post(subscriptions::create_subscription).get(subscriptions::list_subscriptions),
        )
        .route("/subscriptions/:tx_hash", get(subscriptions::get_subscription))
        .route("/subscriptions/:tx_hash/cancel", post(subscriptions::cancel_subscription))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH])
                .allow_headers(Any),
        )
        .with_state(state)
}
