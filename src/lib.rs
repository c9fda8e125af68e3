//! Storefront API Library
//!
//! Cart, address book, hosted checkout and the reconciliation of processor
//! payment events into orders.
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
pub mod migrator;
pub mod payments;
pub mod services;
pub mod tracing;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

/// Envelope for every JSON success body
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
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
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    let shopper = Router::new()
        .route("/cart", get(handlers::carts::get_cart))
        .route("/cart/items", post(handlers::carts::add_item))
        .route(
            "/cart/items/:product_id",
            put(handlers::carts::update_item).delete(handlers::carts::remove_item),
        )
        .route(
            "/addresses",
            get(handlers::addresses::list_addresses).post(handlers::addresses::add_address),
        )
        .route(
            "/addresses/:address_id",
            put(handlers::addresses::update_address),
        )
        .route(
            "/addresses/:address_id/default",
            post(handlers::addresses::set_default_address),
        )
        .route(
            "/checkout/sessions",
            post(handlers::checkout::create_checkout_session),
        )
        .route("/orders", get(handlers::orders::list_my_orders))
        .route("/orders/:id", get(handlers::orders::get_my_order));

    let admin = Router::new()
        .route("/admin/orders", post(handlers::orders::create_order))
        .route(
            "/admin/orders/:id",
            get(handlers::orders::get_order)
                .patch(handlers::orders::update_order)
                .delete(handlers::orders::delete_order),
        )
        .route(
            "/admin/orders/by-number/:order_number",
            get(handlers::orders::get_order_by_number),
        )
        .route(
            "/admin/orders/:id/cancel",
            post(handlers::orders::cancel_order),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .merge(shopper)
        .merge(admin)
}

async fn api_status(State(state): State<AppState>) -> ApiResult<Value> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "service": "storefront-api",
        "payment_processor": state.services.payment_processor.name(),
        "environment": state.config.environment,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(State(state): State<AppState>) -> ApiResult<Value> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(e) => {
            ::tracing::warn!(error = %e, "Database health check failed");
            "unhealthy"
        }
    };

    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": Utc::now().to_rfc3339(),
    }))))
}
