#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    middleware,
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    entities::product,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    payments::{CheckoutSession, CheckoutSessionRequest, PaymentProcessor},
    services::{
        addresses::{AddAddressInput, ShopperAddress},
        catalog::CreateProductInput,
        checkout::CheckoutUrls,
    },
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_KEY: &str = "admin-test-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory stand-in for the hosted checkout processor.
#[derive(Default)]
pub struct FakeProcessor {
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
    pub line_items: Mutex<HashMap<String, Vec<Option<i64>>>>,
    pub fail: AtomicBool,
    pub line_item_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl FakeProcessor {
    pub fn last_request(&self) -> Option<CheckoutSessionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    fn name(&self) -> &str {
        "fakepay"
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "processor unreachable".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{n}");
        self.line_items.lock().unwrap().insert(
            id.clone(),
            request
                .line_items
                .iter()
                .map(|l| Some(i64::from(l.quantity)))
                .collect(),
        );
        self.requests.lock().unwrap().push(request);
        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }

    async fn list_line_items(&self, session_id: &str) -> Result<Vec<Option<i64>>, ServiceError> {
        self.line_item_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "processor unreachable".to_string(),
            ));
        }
        Ok(self
            .line_items
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Helper harness for spinning up an application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub processor: Arc<FakeProcessor>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Webhook signatures are not checked and admin routes are open.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Requires a signed webhook and the admin API key.
    pub async fn secured() -> Self {
        Self::with_config(|cfg| {
            cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
            cfg.admin_api_key = Some(ADMIN_KEY.to_string());
        })
        .await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let processor = Arc::new(FakeProcessor::default());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            processor.clone(),
            CheckoutUrls {
                success_url: "https://shop.test/success".to_string(),
                cancel_url: "https://shop.test/cancel".to_string(),
            },
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .layer(middleware::from_fn(
                storefront_api::tracing::request_id_middleware,
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            processor,
            _event_task: event_task,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, String)],
        body: Option<String>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json)
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    pub async fn shopper_request(
        &self,
        method: Method,
        uri: &str,
        shopper_id: Uuid,
        body: Option<Value>,
    ) -> Response {
        self.request(
            method,
            uri,
            &[("x-shopper-id", shopper_id.to_string())],
            body.map(|b| b.to_string()),
        )
        .await
    }

    pub async fn admin_request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.request(
            method,
            uri,
            &[("x-api-key", ADMIN_KEY.to_string())],
            body.map(|b| b.to_string()),
        )
        .await
    }

    pub async fn post_webhook(&self, payload: &str, signature: Option<String>) -> Response {
        let mut headers = Vec::new();
        if let Some(sig) = signature {
            headers.push(("stripe-signature", sig));
        }
        self.request(
            Method::POST,
            "/api/v1/payments/webhook",
            &headers,
            Some(payload.to_string()),
        )
        .await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                price,
                currency: "usd".to_string(),
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_address(&self, shopper_id: Uuid, line1: &str) -> ShopperAddress {
        self.state
            .services
            .addresses
            .add_address(
                shopper_id,
                AddAddressInput {
                    recipient_name: "Sam Shopper".to_string(),
                    phone: None,
                    line1: line1.to_string(),
                    line2: None,
                    city: "Springfield".to_string(),
                    state: "IL".to_string(),
                    postal_code: "62701".to_string(),
                    is_default: false,
                },
            )
            .await
            .expect("seed address")
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A `checkout.session.completed` event as the processor sends it
pub fn completed_event(
    session_id: &str,
    metadata: &HashMap<String, String>,
    quantities: Option<&[i64]>,
) -> String {
    let mut object = serde_json::json!({
        "id": session_id,
        "object": "checkout.session",
        "payment_status": "paid",
        "metadata": metadata,
    });
    if let Some(quantities) = quantities {
        object["line_items"] = serde_json::json!({
            "object": "list",
            "data": quantities.iter().map(|q| serde_json::json!({ "quantity": q })).collect::<Vec<_>>(),
        });
    }
    serde_json::json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": { "object": object },
    })
    .to_string()
}
