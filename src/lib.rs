//! Cinema checkout library
//!
//! Cart to order assembly, the order state machine, payment sessions against
//! a hosted checkout gateway, idempotent webhook settlement and refund
//! requests for the movie storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod notifications;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    http::HeaderValue,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    events::EventSender,
    gateway::PaymentGateway,
    services::{ServiceContainer, ServiceFactory},
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: ServiceContainer,
    pub auth: Arc<AuthService>,
}

impl AppState {
    /// Wires every service against one database pool, gateway and event channel.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let factory = ServiceFactory::new(db.clone(), event_sender, gateway, config.clone());
        let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&config)));

        Self {
            db,
            services: ServiceContainer::new(&factory),
            config,
            auth,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes of the versioned API, mounted under `api_prefix`.
pub fn api_routes() -> Router<AppState> {
    let cart = Router::new()
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::clear_cart),
        )
        .route("/cart/items", post(handlers::cart::add_to_cart))
        .route(
            "/cart/items/:movie_id",
            delete(handlers::cart::remove_from_cart),
        );

    let orders = Router::new()
        .route(
            "/orders",
            get(handlers::orders::list_orders).post(handlers::orders::create_order),
        )
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/confirm", post(handlers::orders::confirm_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route("/orders/:id/refund", post(handlers::orders::request_refund));

    let payments = Router::new()
        .route("/payments", get(handlers::payments::list_payments))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/status/success",
            get(handlers::payments::payment_success),
        )
        .route(
            "/payments/:id/status/cancel",
            get(handlers::payments::payment_cancel),
        );

    Router::new()
        .merge(cart)
        .merge(orders)
        .merge(payments)
        .route("/purchases", get(handlers::purchases::list_purchases))
        .route("/refunds", get(handlers::refunds::list_refunds))
        .route(
            "/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if cfg.is_development() => CorsLayer::permissive(),
        None => {
            ::tracing::warn!("No CORS origins configured; cross-origin requests are refused");
            CorsLayer::new()
        }
    }
}

/// Full application router: versioned API, root webhook, health probes and
/// the OpenAPI document, wrapped in the request-id, trace, CORS and timeout
/// layers.
pub fn app_router(state: AppState) -> Router {
    let cfg = state.config.clone();

    Router::new()
        .nest(&cfg.api_prefix, api_routes())
        .route(
            "/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .nest("/health", handlers::health::health_routes())
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .layer(TimeoutLayer::new(Duration::from_secs(
            cfg.request_timeout_secs,
        )))
        .layer(cors_layer(&cfg))
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
