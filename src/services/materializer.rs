//! Turns a completed processor checkout session into order rows.
//!
//! The checkout metadata carries the shopper, the shipping address and the
//! purchased product ids in line order; the processor reports the line items
//! (and their quantities) in the same order. Product `i` is paired with line
//! item `i`. Lines are written independently: one failing line never rolls
//! back the others, and every line's result is reported back to the caller.

use crate::{
    entities::order,
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{split_product_ids, ADDRESS_ID_KEY, PRODUCT_IDS_KEY, SHOPPER_ID_KEY},
    services::orders::CreateOrderInput,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Writes order lines and guards a session against being materialized twice
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderLineWriter: Send + Sync {
    /// `Ok(false)` when the session was already claimed
    async fn claim_session(&self, session_id: &str, shopper_id: Uuid) -> Result<bool, ServiceError>;
    async fn release_session(&self, session_id: &str) -> Result<(), ServiceError>;
    async fn create_order(&self, input: CreateOrderInput) -> Result<order::Model, ServiceError>;
}

/// Clears a shopper's cart once their purchase has become orders
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartDeactivator: Send + Sync {
    async fn deactivate_all(&self, shopper_id: Uuid) -> Result<u64, ServiceError>;
}

/// A line item as reported by the processor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorLineItem {
    pub quantity: Option<i64>,
}

/// The parts of a `checkout.session.completed` event the materializer reads
#[derive(Debug, Clone, Default)]
pub struct CompletedCheckoutSession {
    pub session_id: String,
    pub metadata: HashMap<String, String>,
    pub line_items: Vec<ProcessorLineItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingShopperId,
    MissingAddressId,
    InvalidShopperId(String),
    InvalidAddressId(String),
    NoProducts,
    NoLineItems,
    AlreadyProcessed,
    ClaimFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingShopperId => write!(f, "metadata has no shopper id"),
            Self::MissingAddressId => write!(f, "metadata has no address id"),
            Self::InvalidShopperId(v) => write!(f, "invalid shopper id '{}'", v),
            Self::InvalidAddressId(v) => write!(f, "invalid address id '{}'", v),
            Self::NoProducts => write!(f, "metadata lists no products"),
            Self::NoLineItems => write!(f, "session has no line items"),
            Self::AlreadyProcessed => write!(f, "session already materialized"),
            Self::ClaimFailed(e) => write!(f, "could not claim session: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLineOutcome {
    pub index: usize,
    pub product_id: Uuid,
    pub quantity: i32,
    pub order_id: Uuid,
    pub order_number: String,
    pub grand_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaterializationError {
    #[error("no line item for product {product_id} at position {index}")]
    MissingLineItem { index: usize, product_id: String },
    #[error("invalid product id '{value}' at position {index}")]
    InvalidProductId { index: usize, value: String },
    #[error("order for product {product_id} at position {index} failed: {reason}")]
    LineFailed {
        index: usize,
        product_id: Uuid,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct MaterializationReport {
    pub session_id: String,
    pub shopper_id: Uuid,
    pub address_id: Uuid,
    /// One entry per product id in the metadata, in metadata order
    pub lines: Vec<Result<OrderLineOutcome, MaterializationError>>,
    /// Rows deactivated, or `None` when the cart was left alone
    pub cart_items_deactivated: Option<u64>,
    pub cart_error: Option<String>,
}

impl MaterializationReport {
    pub fn orders(&self) -> impl Iterator<Item = &OrderLineOutcome> {
        self.lines.iter().filter_map(|line| line.as_ref().ok())
    }

    pub fn orders_created(&self) -> usize {
        self.orders().count()
    }

    pub fn lines_failed(&self) -> usize {
        self.lines.len() - self.orders_created()
    }
}

#[derive(Debug, Clone)]
pub enum MaterializationOutcome {
    Skipped(SkipReason),
    Completed(MaterializationReport),
}

pub struct OrderMaterializer {
    orders: Arc<dyn OrderLineWriter>,
    cart: Arc<dyn CartDeactivator>,
    processor_name: String,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderMaterializer {
    pub fn new(
        orders: Arc<dyn OrderLineWriter>,
        cart: Arc<dyn CartDeactivator>,
        processor_name: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            cart,
            processor_name: processor_name.into(),
            event_sender: None,
        }
    }

    pub fn with_event_sender(mut self, event_sender: Arc<EventSender>) -> Self {
        self.event_sender = Some(event_sender);
        self
    }

    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn materialize(&self, session: &CompletedCheckoutSession) -> MaterializationOutcome {
        let (shopper_id, address_id, product_ids) = match parse_metadata(session) {
            Ok(parsed) => parsed,
            Err(reason) => {
                warn!(reason = %reason, "Skipping checkout session");
                return MaterializationOutcome::Skipped(reason);
            }
        };

        match self.orders.claim_session(&session.session_id, shopper_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!("Checkout session already materialized, ignoring redelivery");
                return MaterializationOutcome::Skipped(SkipReason::AlreadyProcessed);
            }
            Err(e) => {
                error!(error = %e, "Failed to claim checkout session");
                return MaterializationOutcome::Skipped(SkipReason::ClaimFailed(e.to_string()));
            }
        }

        let mut lines = Vec::with_capacity(product_ids.len());
        for (index, raw_product_id) in product_ids.iter().enumerate() {
            let line = self
                .materialize_line(session, shopper_id, address_id, index, raw_product_id)
                .await;
            if let Err(e) = &line {
                error!(error = %e, "Checkout line was not materialized");
            }
            lines.push(line);
        }

        let mut report = MaterializationReport {
            session_id: session.session_id.clone(),
            shopper_id,
            address_id,
            lines,
            cart_items_deactivated: None,
            cart_error: None,
        };

        if report.orders_created() > 0 {
            match self.cart.deactivate_all(shopper_id).await {
                Ok(items) => report.cart_items_deactivated = Some(items),
                Err(e) => {
                    error!(error = %e, shopper_id = %shopper_id, "Failed to deactivate cart after checkout");
                    report.cart_error = Some(e.to_string());
                }
            }
        } else if let Err(e) = self.orders.release_session(&session.session_id).await {
            error!(error = %e, "Failed to release claim on checkout session");
        }

        info!(
            shopper_id = %shopper_id,
            orders_created = report.orders_created(),
            lines_failed = report.lines_failed(),
            "Checkout session materialized"
        );
        if let Some(sender) = &self.event_sender {
            sender
                .send_or_log(Event::CheckoutSessionMaterialized {
                    session_id: session.session_id.clone(),
                    shopper_id,
                    orders_created: report.orders_created(),
                    lines_failed: report.lines_failed(),
                })
                .await;
        }

        MaterializationOutcome::Completed(report)
    }

    async fn materialize_line(
        &self,
        session: &CompletedCheckoutSession,
        shopper_id: Uuid,
        address_id: Uuid,
        index: usize,
        raw_product_id: &str,
    ) -> Result<OrderLineOutcome, MaterializationError> {
        let product_id =
            Uuid::parse_str(raw_product_id).map_err(|_| MaterializationError::InvalidProductId {
                index,
                value: raw_product_id.to_string(),
            })?;

        let line_item =
            session
                .line_items
                .get(index)
                .ok_or_else(|| MaterializationError::MissingLineItem {
                    index,
                    product_id: raw_product_id.to_string(),
                })?;

        let quantity = match line_item.quantity {
            None => 1,
            Some(q) => i32::try_from(q).map_err(|_| MaterializationError::LineFailed {
                index,
                product_id,
                reason: format!("quantity {} out of range", q),
            })?,
        };

        let mut input = CreateOrderInput::new(shopper_id, address_id, product_id, quantity);
        input.payment_method = Some(self.processor_name.clone());
        input.notes = Some(format!("Checkout session {}", session.session_id));
        input.checkout_session_id = Some(session.session_id.clone());

        let order = self
            .orders
            .create_order(input)
            .await
            .map_err(|e| MaterializationError::LineFailed {
                index,
                product_id,
                reason: e.to_string(),
            })?;

        Ok(OrderLineOutcome {
            index,
            product_id,
            quantity: order.quantity,
            order_id: order.id,
            order_number: order.order_number,
            grand_total: order.grand_total,
        })
    }
}

fn parse_metadata(
    session: &CompletedCheckoutSession,
) -> Result<(Uuid, Uuid, Vec<String>), SkipReason> {
    let shopper = session
        .metadata
        .get(SHOPPER_ID_KEY)
        .filter(|v| !v.is_empty())
        .ok_or(SkipReason::MissingShopperId)?;
    let address = session
        .metadata
        .get(ADDRESS_ID_KEY)
        .filter(|v| !v.is_empty())
        .ok_or(SkipReason::MissingAddressId)?;

    let shopper_id =
        Uuid::parse_str(shopper).map_err(|_| SkipReason::InvalidShopperId(shopper.clone()))?;
    let address_id =
        Uuid::parse_str(address).map_err(|_| SkipReason::InvalidAddressId(address.clone()))?;

    let product_ids: Vec<String> = session
        .metadata
        .get(PRODUCT_IDS_KEY)
        .map(|v| split_product_ids(v).map(str::to_string).collect())
        .unwrap_or_default();
    if product_ids.is_empty() {
        return Err(SkipReason::NoProducts);
    }
    if session.line_items.is_empty() {
        return Err(SkipReason::NoLineItems);
    }

    Ok((shopper_id, address_id, product_ids))
}
