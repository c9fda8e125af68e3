use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    payments::{CheckoutLineItem, CheckoutMetadata, CheckoutSessionRequest, PaymentProcessor},
    services::{addresses::AddressLookup, catalog::ProductLookup},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "checkout requires at least one item"))]
    #[validate]
    pub items: Vec<CheckoutItem>,
    pub address_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSessionResponse {
    pub session_id: String,
    pub url: String,
}

/// Redirect targets handed to the processor
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// Starts a hosted checkout for the items a shopper wants to buy.
///
/// Nothing is written locally; orders appear only once the processor
/// reports the session as paid.
#[derive(Clone)]
pub struct CheckoutService {
    products: Arc<dyn ProductLookup>,
    addresses: Arc<dyn AddressLookup>,
    processor: Arc<dyn PaymentProcessor>,
    urls: CheckoutUrls,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        products: Arc<dyn ProductLookup>,
        addresses: Arc<dyn AddressLookup>,
        processor: Arc<dyn PaymentProcessor>,
        urls: CheckoutUrls,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            products,
            addresses,
            processor,
            urls,
            event_sender,
        }
    }

    #[instrument(skip(self, request), fields(items = request.items.len(), address_id = %request.address_id))]
    pub async fn create_checkout_session(
        &self,
        shopper_id: Uuid,
        request: CheckoutRequest,
    ) -> Result<CheckoutSessionResponse, ServiceError> {
        request.validate()?;

        self.addresses
            .find_shopper_address(shopper_id, request.address_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Address {} not found", request.address_id))
            })?;

        let mut line_items: Vec<CheckoutLineItem> = Vec::new();
        for item in merge_duplicates(request.items) {
            match self.products.find_product(item.product_id).await? {
                Some(product) => line_items.push(CheckoutLineItem {
                    product_id: product.id,
                    name: product.name,
                    unit_amount: product.price,
                    currency: product.currency,
                    quantity: item.quantity,
                }),
                None => {
                    warn!(product_id = %item.product_id, "Dropping unavailable product from checkout");
                }
            }
        }

        if line_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "no purchasable products in checkout".to_string(),
            ));
        }

        let metadata = CheckoutMetadata {
            shopper_id,
            address_id: request.address_id,
            product_ids: line_items.iter().map(|l| l.product_id).collect(),
        }
        .to_map()?;

        let session = self
            .processor
            .create_checkout_session(CheckoutSessionRequest {
                line_items,
                metadata,
                success_url: self.urls.success_url.clone(),
                cancel_url: self.urls.cancel_url.clone(),
            })
            .await?;

        info!(shopper_id = %shopper_id, session_id = %session.id, "Checkout session started");
        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated {
                shopper_id,
                session_id: session.id.clone(),
            })
            .await;

        Ok(CheckoutSessionResponse {
            session_id: session.id,
            url: session.url,
        })
    }
}

/// Sums quantities of repeated products, keeping first-seen order
fn merge_duplicates(items: Vec<CheckoutItem>) -> Vec<CheckoutItem> {
    let mut merged: Vec<CheckoutItem> = Vec::with_capacity(items.len());
    for item in items {
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => merged.push(item),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_merge_in_first_seen_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let merged = merge_duplicates(vec![
            CheckoutItem { product_id: a, quantity: 1 },
            CheckoutItem { product_id: b, quantity: 2 },
            CheckoutItem { product_id: a, quantity: 3 },
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!((merged[0].product_id, merged[0].quantity), (a, 4));
        assert_eq!((merged[1].product_id, merged[1].quantity), (b, 2));
    }

    #[test]
    fn empty_and_zero_quantity_requests_are_invalid() {
        let empty = CheckoutRequest {
            items: vec![],
            address_id: Uuid::new_v4(),
        };
        assert!(empty.validate().is_err());

        let zero = CheckoutRequest {
            items: vec![CheckoutItem {
                product_id: Uuid::new_v4(),
                quantity: 0,
            }],
            address_id: Uuid::new_v4(),
        };
        assert!(zero.validate().is_err());
    }
}
