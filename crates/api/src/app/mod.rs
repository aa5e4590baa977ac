//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: event store, bus, read models, dispatcher and auth state
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request bodies and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use kedai_auth::{LogTacSender, TacSender};
use kedai_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, StartupError};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
/// Sign-in codes are written to the log.
pub async fn build_app(config: AppConfig) -> Result<Router, StartupError> {
    build_app_with(config, Arc::new(LogTacSender)).await
}

/// Same as [`build_app`] with a chosen delivery channel for sign-in codes.
pub async fn build_app_with(config: AppConfig, tac_sender: Arc<dyn TacSender>) -> Result<Router, StartupError> {
    let services = Arc::new(services::build_services(config, tac_sender).await?);

    // Protected routes: require a session; tenant comes from it.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::auth_middleware,
    ));

    Ok(Router::new()
        .route("/health", get(routes::system::health))
        .nest("/auth", routes::auth::router())
        .route("/billing/stripe/webhook", post(routes::billing::stripe_webhook))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(services)),
        ))
}
