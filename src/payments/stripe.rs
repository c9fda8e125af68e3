use super::{CheckoutSession, CheckoutSessionRequest, PaymentProcessor};
use crate::errors::ServiceError;
use async_trait::async_trait;
use reqwest::{Client, Response};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, instrument};

/// Stripe line-item listings page at 100 entries
const LINE_ITEMS_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineItemList {
    data: Vec<LineItemRecord>,
}

#[derive(Debug, Deserialize)]
struct LineItemRecord {
    quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Stripe Checkout over the REST API
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(
        secret_key: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn form_for(request: &CheckoutSessionRequest) -> Result<Vec<(String, String)>, ServiceError> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];

        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{}]", i);
            form.push((
                format!("{}[price_data][currency]", prefix),
                item.currency.to_lowercase(),
            ));
            form.push((
                format!("{}[price_data][unit_amount]", prefix),
                minor_units(item.unit_amount)?.to_string(),
            ));
            form.push((
                format!("{}[price_data][product_data][name]", prefix),
                item.name.clone(),
            ));
            form.push((format!("{}[quantity]", prefix), item.quantity.to_string()));
        }

        let mut keys: Vec<&String> = request.metadata.keys().collect();
        keys.sort();
        for key in keys {
            form.push((format!("metadata[{}]", key), request.metadata[key].clone()));
        }

        Ok(form)
    }
}

/// Amount in the currency's minor unit (cents)
fn minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

fn unavailable(e: reqwest::Error) -> ServiceError {
    error!(error = %e, "Payment processor request failed");
    ServiceError::ExternalServiceError(format!("payment processor request failed: {}", e))
}

async fn ensure_success(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ErrorEnvelope>()
        .await
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| status.to_string());
    error!(status = %status, message = %message, "Payment processor rejected request");
    Err(ServiceError::ExternalServiceError(format!(
        "payment processor returned {}: {}",
        status, message
    )))
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    fn name(&self) -> &str {
        "stripe"
    }

    #[instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        let form = Self::form_for(&request)?;

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(unavailable)?;

        let session: SessionResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(unavailable)?;

        let url = session.url.ok_or_else(|| {
            ServiceError::ExternalServiceError("checkout session has no redirect url".to_string())
        })?;

        info!(session_id = %session.id, "Checkout session created");
        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    #[instrument(skip(self))]
    async fn list_line_items(&self, session_id: &str) -> Result<Vec<Option<i64>>, ServiceError> {
        let response = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{}/line_items",
                self.api_base, session_id
            ))
            .query(&[("limit", LINE_ITEMS_PAGE_LIMIT)])
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(unavailable)?;

        let list: LineItemList = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(unavailable)?;

        Ok(list.data.into_iter().map(|item| item.quantity).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::CheckoutLineItem;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use uuid::Uuid;

    #[test]
    fn converts_to_minor_units() {
        assert_eq!(minor_units(dec!(25.50)).unwrap(), 2550);
        assert_eq!(minor_units(dec!(0.005)).unwrap(), 0);
        assert_eq!(minor_units(dec!(19.999)).unwrap(), 2000);
    }

    #[test]
    fn form_carries_lines_and_metadata() {
        let request = CheckoutSessionRequest {
            line_items: vec![CheckoutLineItem {
                product_id: Uuid::new_v4(),
                name: "Widget".into(),
                unit_amount: dec!(10.00),
                currency: "USD".into(),
                quantity: 2,
            }],
            metadata: HashMap::from([("shopper_id".to_string(), "abc".to_string())]),
            success_url: "https://shop.test/ok".into(),
            cancel_url: "https://shop.test/cancel".into(),
        };

        let form = StripeClient::form_for(&request).unwrap();
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("mode"), Some("payment"));
        assert_eq!(get("line_items[0][price_data][unit_amount]"), Some("1000"));
        assert_eq!(get("line_items[0][price_data][currency]"), Some("usd"));
        assert_eq!(get("line_items[0][quantity]"), Some("2"));
        assert_eq!(get("metadata[shopper_id]"), Some("abc"));
    }
}
