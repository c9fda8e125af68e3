//! Cart → hosted checkout → processor webhook → orders.

mod common;

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{completed_event, response_json, TestApp, WEBHOOK_SECRET};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;
use storefront_api::{
    entities::{
        order::{OrderStatus, PaymentStatus},
        payment_session_receipt,
    },
    errors::ServiceError,
    payments::{signature::compute_signature, ADDRESS_ID_KEY, PRODUCT_IDS_KEY, SHOPPER_ID_KEY},
    services::{
        cart::AddToCartInput,
        checkout::{CheckoutItem, CheckoutRequest},
    },
};
use uuid::Uuid;

struct Shop {
    app: TestApp,
    shopper: Uuid,
    address_id: Uuid,
    widget: Uuid,
    gadget: Uuid,
}

async fn shop(app: TestApp) -> Shop {
    let shopper = Uuid::new_v4();
    let address = app.seed_address(shopper, "1 Main St").await;
    let widget = app.seed_product("Widget", dec!(25.50)).await;
    let gadget = app.seed_product("Gadget", dec!(10.00)).await;
    for (product_id, quantity) in [(widget.id, 2), (gadget.id, 1)] {
        app.state
            .services
            .cart
            .add_item(shopper, AddToCartInput { product_id, quantity })
            .await
            .unwrap();
    }
    Shop {
        shopper,
        address_id: address.address_id,
        widget: widget.id,
        gadget: gadget.id,
        app,
    }
}

impl Shop {
    fn request(&self, items: &[(Uuid, i32)]) -> CheckoutRequest {
        CheckoutRequest {
            items: items
                .iter()
                .map(|(product_id, quantity)| CheckoutItem {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .collect(),
            address_id: self.address_id,
        }
    }

    async fn start_checkout(&self) -> String {
        self.app
            .state
            .services
            .checkout
            .create_checkout_session(self.shopper, self.request(&[(self.widget, 2), (self.gadget, 1)]))
            .await
            .unwrap()
            .session_id
    }

    fn metadata(&self) -> HashMap<String, String> {
        self.app
            .processor
            .last_request()
            .expect("checkout session was requested")
            .metadata
    }
}

fn signed(payload: &str) -> String {
    let t = Utc::now().timestamp();
    format!("t={},v1={}", t, compute_signature(t, payload.as_bytes(), WEBHOOK_SECRET))
}

#[tokio::test]
async fn checkout_session_carries_lines_and_metadata() {
    let s = shop(TestApp::new().await).await;

    let response = s
        .app
        .shopper_request(
            Method::POST,
            "/api/v1/checkout/sessions",
            s.shopper,
            Some(json!({
                "address_id": s.address_id,
                "items": [
                    { "product_id": s.widget, "quantity": 1 },
                    { "product_id": s.gadget, "quantity": 1 },
                    { "product_id": s.widget, "quantity": 1 }
                ]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["data"]["session_id"], "cs_test_1");
    assert_eq!(body["data"]["url"], "https://checkout.test/pay/cs_test_1");

    let request = s.app.processor.last_request().unwrap();
    assert_eq!(request.line_items.len(), 2);
    assert_eq!(request.line_items[0].product_id, s.widget);
    assert_eq!(request.line_items[0].quantity, 2);
    assert_eq!(request.line_items[0].unit_amount, dec!(25.50));
    assert_eq!(request.line_items[0].name, "Widget");
    assert_eq!(request.success_url, "https://shop.test/success");
    assert_eq!(request.metadata[SHOPPER_ID_KEY], s.shopper.to_string());
    assert_eq!(request.metadata[ADDRESS_ID_KEY], s.address_id.to_string());
    assert_eq!(
        request.metadata[PRODUCT_IDS_KEY],
        format!("{},{}", s.widget, s.gadget)
    );

    // Nothing is written until the processor reports payment.
    let orders = s
        .app
        .state
        .services
        .orders
        .list_orders_for_shopper(s.shopper, 1, 20)
        .await
        .unwrap();
    assert_eq!(orders.total, 0);
}

#[tokio::test]
async fn unavailable_products_are_dropped_from_checkout() {
    let s = shop(TestApp::new().await).await;
    s.app
        .state
        .services
        .catalog
        .set_active(s.gadget, false)
        .await
        .unwrap();

    s.app
        .state
        .services
        .checkout
        .create_checkout_session(
            s.shopper,
            s.request(&[(s.widget, 1), (s.gadget, 1), (Uuid::new_v4(), 1)]),
        )
        .await
        .unwrap();

    let request = s.app.processor.last_request().unwrap();
    assert_eq!(request.line_items.len(), 1);
    assert_eq!(request.metadata[PRODUCT_IDS_KEY], s.widget.to_string());
}

#[tokio::test]
async fn checkout_without_purchasable_products_never_calls_the_processor() {
    let s = shop(TestApp::new().await).await;
    let checkout = &s.app.state.services.checkout;

    assert_matches!(
        checkout
            .create_checkout_session(s.shopper, s.request(&[(Uuid::new_v4(), 1)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        checkout.create_checkout_session(s.shopper, s.request(&[])).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        checkout
            .create_checkout_session(s.shopper, s.request(&[(s.widget, 0)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(s.app.processor.request_count(), 0);
}

#[tokio::test]
async fn checkout_requires_an_address_of_the_shopper() {
    let s = shop(TestApp::new().await).await;
    let result = s
        .app
        .state
        .services
        .checkout
        .create_checkout_session(Uuid::new_v4(), s.request(&[(s.widget, 1)]))
        .await;

    assert_matches!(result, Err(ServiceError::NotFound(_)));
    assert_eq!(s.app.processor.request_count(), 0);
}

#[tokio::test]
async fn processor_outage_is_a_retryable_error() {
    let s = shop(TestApp::new().await).await;
    s.app.processor.fail.store(true, Ordering::SeqCst);

    let response = s
        .app
        .shopper_request(
            Method::POST,
            "/api/v1/checkout/sessions",
            s.shopper,
            Some(json!({
                "address_id": s.address_id,
                "items": [{ "product_id": s.widget, "quantity": 1 }]
            })),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = response_json(response).await;
    assert_eq!(body["retryable"], true);

    let orders = s
        .app
        .state
        .services
        .orders
        .list_orders_for_shopper(s.shopper, 1, 20)
        .await
        .unwrap();
    assert_eq!(orders.total, 0);
    assert_eq!(
        s.app
            .state
            .services
            .cart
            .list_active_items(s.shopper)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn completed_session_becomes_orders_and_clears_the_cart() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let payload = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));

    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await, json!({ "received": true }));

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);

    let widget = orders.iter().find(|o| o.product_id == s.widget).unwrap();
    assert_eq!(widget.quantity, 2);
    assert_eq!(widget.unit_price, dec!(25.50));
    assert_eq!(widget.grand_total, dec!(51.00));
    assert_eq!(widget.address_id, s.address_id);
    assert_eq!(widget.payment_method.as_deref(), Some("fakepay"));
    assert_eq!(widget.order_status, OrderStatus::Pending);
    assert_eq!(widget.payment_status, PaymentStatus::Pending);
    assert_eq!(
        widget.notes.as_deref(),
        Some(format!("Checkout session {session_id}").as_str())
    );

    let gadget = orders.iter().find(|o| o.product_id == s.gadget).unwrap();
    assert_eq!(gadget.quantity, 1);
    assert_eq!(gadget.grand_total, dec!(10.00));
    assert_ne!(widget.order_number, gadget.order_number);

    assert!(s
        .app
        .state
        .services
        .cart
        .list_active_items(s.shopper)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn redelivered_event_does_not_duplicate_orders() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let payload = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));

    for _ in 0..2 {
        let response = s.app.post_webhook(&payload, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn missing_line_items_are_fetched_from_the_processor() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let payload = completed_event(&session_id, &s.metadata(), None);

    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(s.app.processor.line_item_calls.load(Ordering::SeqCst), 1);
    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);
}

#[tokio::test]
async fn line_item_fetch_failure_creates_nothing() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    s.app.processor.fail.store(true, Ordering::SeqCst);
    let payload = completed_event(&session_id, &s.metadata(), None);

    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert!(orders.is_empty());
    assert_eq!(
        s.app
            .state
            .services
            .cart
            .list_active_items(s.shopper)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn fewer_line_items_than_products_creates_only_paired_orders() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let payload = completed_event(&session_id, &s.metadata(), Some(&[3]));

    s.app.post_webhook(&payload, None).await;

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].product_id, s.widget);
    assert_eq!(orders[0].quantity, 3);
}

#[tokio::test]
async fn incomplete_metadata_is_acknowledged_without_orders() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let mut metadata = s.metadata();
    metadata.remove(SHOPPER_ID_KEY);
    let payload = completed_event(&session_id, &metadata, Some(&[2, 1]));

    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert!(orders.is_empty());
    assert_eq!(
        s.app
            .state
            .services
            .cart
            .list_active_items(s.shopper)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn failed_materialization_can_be_retried() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let mut metadata = s.metadata();
    metadata.insert(ADDRESS_ID_KEY.to_string(), Uuid::new_v4().to_string());

    // Every line fails on the unknown address, so the session is released.
    let broken = completed_event(&session_id, &metadata, Some(&[2, 1]));
    s.app.post_webhook(&broken, None).await;
    assert!(s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap()
        .is_empty());

    let fixed = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));
    s.app.post_webhook(&fixed, None).await;
    assert_eq!(
        s.app
            .state
            .services
            .orders
            .find_by_checkout_session(&session_id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn other_event_types_are_acknowledged() {
    let app = TestApp::secured().await;

    let bare = r#"{"id":"evt_1","type":"payment_intent.created"}"#;
    let response = app.post_webhook(bare, Some(signed(bare))).await;
    assert_eq!(response.status(), StatusCode::OK);

    // The object of a non-checkout event has a shape of its own and no id.
    let balance = json!({
        "id": "evt_2",
        "type": "balance.available",
        "data": {
            "object": {
                "object": "balance",
                "available": [{ "amount": 2500, "currency": "usd", "source_types": { "card": 2500 } }],
                "livemode": false,
                "pending": [{ "amount": 0, "currency": "usd" }]
            }
        }
    })
    .to_string();
    let response = app.post_webhook(&balance, Some(signed(&balance))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["received"], true);
}

#[tokio::test]
async fn completion_without_a_session_object_is_acknowledged() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    let payload = json!({
        "id": "evt_3",
        "type": "checkout.session.completed",
        "data": { "object": { "object": "checkout.session", "metadata": s.metadata() } }
    })
    .to_string();

    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap()
        .is_empty());
}

async fn leave_claim(s: &Shop, session_id: &str, age: Duration) {
    payment_session_receipt::ActiveModel {
        session_id: Set(session_id.to_string()),
        shopper_id: Set(s.shopper),
        received_at: Set(Utc::now() - age),
    }
    .insert(&*s.app.state.db)
    .await
    .unwrap();
}

#[tokio::test]
async fn abandoned_claim_is_taken_over_by_redelivery() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    // A delivery claimed the session an hour ago and never wrote its orders.
    leave_claim(&s, &session_id, Duration::hours(1)).await;

    let payload = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));
    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let orders = s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap();
    assert_eq!(orders.len(), 2);
    assert!(s
        .app
        .state
        .services
        .cart
        .list_active_items(s.shopper)
        .await
        .unwrap()
        .is_empty());

    s.app.post_webhook(&payload, None).await;
    assert_eq!(
        s.app
            .state
            .services
            .orders
            .find_by_checkout_session(&session_id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn live_claim_blocks_redelivery() {
    let s = shop(TestApp::new().await).await;
    let session_id = s.start_checkout().await;
    leave_claim(&s, &session_id, Duration::seconds(5)).await;

    let payload = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));
    let response = s.app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::OK);

    assert!(s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap()
        .is_empty());
    assert!(!s
        .app
        .state
        .services
        .orders
        .claim_session(&session_id, s.shopper)
        .await
        .unwrap());
}

#[tokio::test]
async fn webhook_signature_and_payload_are_checked() {
    let s = shop(TestApp::secured().await).await;
    let session_id = s.start_checkout().await;
    let payload = completed_event(&session_id, &s.metadata(), Some(&[2, 1]));

    let unsigned = s.app.post_webhook(&payload, None).await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let forged = s
        .app
        .post_webhook(&payload, Some(format!("t={},v1=deadbeef", Utc::now().timestamp())))
        .await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    assert!(s
        .app
        .state
        .services
        .orders
        .find_by_checkout_session(&session_id)
        .await
        .unwrap()
        .is_empty());

    let garbage = "not json";
    let malformed = s.app.post_webhook(garbage, Some(signed(garbage))).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let accepted = s.app.post_webhook(&payload, Some(signed(&payload))).await;
    assert_eq!(accepted.status(), StatusCode::OK);
    assert_eq!(
        s.app
            .state
            .services
            .orders
            .find_by_checkout_session(&session_id)
            .await
            .unwrap()
            .len(),
        2
    );
}
