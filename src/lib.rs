//! Bookstore Orders Library
//!
//! Order, payment and inventory consistency engine behind the bookstore
//! storefront: stock-safe checkout, wallet payment reconciliation and cart
//! snapshots across sessions.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod services;
pub mod session;
pub mod tracing;

use axum::{response::Json, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::ToSchema;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub sessions: Arc<session::SessionStore>,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
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

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(api_status))
        // Shopper
        .nest("/cart", handlers::cart::cart_routes())
        .route("/checkout", axum::routing::post(handlers::checkout::checkout))
        .nest("/orders", handlers::orders::order_routes())
        // Wallet gateway (notification is signature-verified, not session-bound)
        .nest("/payments", handlers::payments::payment_routes())
        // Auth layer hooks
        .nest("/session", handlers::session::session_routes())
        // Admin
        .nest("/admin/orders", handlers::orders::admin_order_routes())
}

/// Full application router: API, health probes, OpenAPI document and the
/// request id / tracing layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .nest("/health", handlers::health::health_routes())
        .merge(openapi::openapi_routes())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "bookstore-orders",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}
