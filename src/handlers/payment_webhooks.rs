use crate::{
    errors::ServiceError,
    payments::signature::{verify_signature, SIGNATURE_HEADER},
    services::materializer::{
        CompletedCheckoutSession, MaterializationOutcome, ProcessorLineItem,
    },
    AppState,
};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, info, warn};

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    line_items: Option<LineItemList>,
}

#[derive(Debug, Deserialize)]
struct LineItemList {
    #[serde(default)]
    data: Vec<LineItemRecord>,
}

#[derive(Debug, Deserialize)]
struct LineItemRecord {
    #[serde(default)]
    quantity: Option<i64>,
}

/// POST /api/v1/payments/webhook
///
/// Acknowledges every authentic, well-formed event with 200 so the
/// processor does not redeliver it; outcomes are logged, not returned.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if let Err(e) = verify_signature(
            header,
            &body,
            secret,
            state.config.webhook_tolerance(),
            Utc::now().timestamp(),
        ) {
            warn!(error = %e, "Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    match event.event_type.as_str() {
        CHECKOUT_COMPLETED => match session_object(event.data) {
            Ok(session) => handle_checkout_completed(&state, session).await,
            Err(e) => {
                warn!(event_id = ?event.id, error = %e, "Checkout completion without a usable session object")
            }
        },
        other => info!(event_id = ?event.id, event_type = %other, "Ignoring payment webhook event"),
    }

    Ok(Json(json!({ "received": true })))
}

/// Only checkout completions carry a session; every other event type keeps
/// its `data.object` opaque.
fn session_object(data: Option<Value>) -> Result<SessionObject, serde_json::Error> {
    let object = data
        .and_then(|mut data| data.get_mut("object").map(Value::take))
        .unwrap_or(Value::Null);
    serde_json::from_value(object)
}

async fn handle_checkout_completed(state: &AppState, session: SessionObject) {
    let line_items = match session.line_items {
        Some(list) if !list.data.is_empty() => list
            .data
            .into_iter()
            .map(|item| ProcessorLineItem {
                quantity: item.quantity,
            })
            .collect(),
        _ => match state
            .services
            .payment_processor
            .list_line_items(&session.id)
            .await
        {
            Ok(quantities) => quantities
                .into_iter()
                .map(|quantity| ProcessorLineItem { quantity })
                .collect(),
            Err(e) => {
                error!(session_id = %session.id, error = %e, "Could not fetch checkout line items");
                Vec::new()
            }
        },
    };

    let completed = CompletedCheckoutSession {
        session_id: session.id,
        metadata: session.metadata,
        line_items,
    };

    // Runs detached: a dropped request must not stop it between the claim
    // and the orders.
    let session_id = completed.session_id.clone();
    let materializer = state.services.materializer.clone();
    let task = tokio::spawn(async move { materializer.materialize(&completed).await });
    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Checkout materialization task failed");
            return;
        }
    };

    match outcome {
        MaterializationOutcome::Skipped(reason) => {
            warn!(session_id = %session_id, reason = %reason, "Checkout session not materialized");
        }
        MaterializationOutcome::Completed(report) => {
            for line in report.lines.iter().filter_map(|line| line.as_ref().err()) {
                error!(session_id = %report.session_id, error = %line, "Checkout line failed");
            }
            info!(
                session_id = %report.session_id,
                orders_created = report.orders_created(),
                lines_failed = report.lines_failed(),
                "Checkout completion processed"
            );
        }
    }
}
