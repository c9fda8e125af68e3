//! Payment processor integration: the processor seam used by checkout and
//! the webhook receiver, the metadata attached to checkout sessions, and the
//! Stripe implementation.

pub mod signature;
pub mod stripe;

use crate::errors::ServiceError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub use self::stripe::StripeClient;

pub const SHOPPER_ID_KEY: &str = "shopper_id";
pub const ADDRESS_ID_KEY: &str = "address_id";
pub const PRODUCT_IDS_KEY: &str = "product_ids";

/// Longest metadata value the processor accepts
pub const METADATA_VALUE_LIMIT: usize = 500;

/// One line of a hosted checkout, priced at the current catalog price
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutLineItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_amount: Decimal,
    pub currency: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<CheckoutLineItem>,
    pub metadata: HashMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// A hosted-checkout payment processor
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Stored on orders as the payment method
    fn name(&self) -> &str;

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError>;

    /// Quantities of a session's line items, in checkout order
    async fn list_line_items(&self, session_id: &str) -> Result<Vec<Option<i64>>, ServiceError>;
}

/// Identifies the purchase a checkout session belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutMetadata {
    pub shopper_id: Uuid,
    pub address_id: Uuid,
    pub product_ids: Vec<Uuid>,
}

impl CheckoutMetadata {
    /// Encodes for the processor. Fails when the product list does not fit
    /// in one metadata value.
    pub fn to_map(&self) -> Result<HashMap<String, String>, ServiceError> {
        let product_ids = self
            .product_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        if product_ids.len() > METADATA_VALUE_LIMIT {
            return Err(ServiceError::ValidationError(format!(
                "too many products for one checkout ({}); the limit is {}",
                self.product_ids.len(),
                METADATA_VALUE_LIMIT / 37
            )));
        }

        Ok(HashMap::from([
            (SHOPPER_ID_KEY.to_string(), self.shopper_id.to_string()),
            (ADDRESS_ID_KEY.to_string(), self.address_id.to_string()),
            (PRODUCT_IDS_KEY.to_string(), product_ids),
        ]))
    }
}

/// Splits a `product_ids` metadata value, skipping empty segments
pub fn split_product_ids(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}
