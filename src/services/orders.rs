use crate::{
    entities::{
        address,
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus, PaymentStatus},
        payment_session_receipt, product, shopper_address,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        materializer::OrderLineWriter,
        order_status::{plan_cancellation, resolve_status_change},
        pricing::OrderPricing,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const MAX_PAGE_SIZE: u64 = 100;

/// How long a claim without orders blocks redeliveries of its session.
pub const CLAIM_LEASE_MINUTES: i64 = 15;

/// Input for creating one order line, from checkout or directly by an admin
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderInput {
    pub shopper_id: Uuid,
    pub address_id: Uuid,
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[serde(default)]
    pub tax_amount: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    #[validate(length(max = 50))]
    #[serde(default)]
    pub payment_method: Option<String>,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub checkout_session_id: Option<String>,
}

impl CreateOrderInput {
    pub fn new(shopper_id: Uuid, address_id: Uuid, product_id: Uuid, quantity: i32) -> Self {
        Self {
            shopper_id,
            address_id,
            product_id,
            quantity,
            tax_amount: None,
            shipping_cost: None,
            discount_amount: None,
            payment_method: None,
            notes: None,
            checkout_session_id: None,
        }
    }
}

/// Administrative partial update; only fields that are present are applied
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateOrderInput {
    pub order_status: Option<OrderStatus>,
    pub delivery_status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CancelOrderInput {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[serde(default)]
    pub refund_amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// `ORD-<UTC yyyymmddHHMMSSmmm>-<6 hex>`; sorts by creation time
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("ORD-{}-{:06X}", now.format("%Y%m%d%H%M%S%3f"), suffix)
}

/// Service for creating and administering orders
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates one order line. The product's current price is read once and
    /// frozen into the order; all statuses start at `pending`. The cart is
    /// not touched.
    #[instrument(skip(self, input), fields(shopper_id = %input.shopper_id, product_id = %input.product_id))]
    pub async fn create_order(&self, input: CreateOrderInput) -> Result<OrderModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(input.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let address = address::Entity::find_by_id(input.address_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Address {} not found", input.address_id))
            })?;

        let recipient_name = shopper_address::Entity::find()
            .filter(shopper_address::Column::ShopperId.eq(input.shopper_id))
            .filter(shopper_address::Column::AddressId.eq(input.address_id))
            .one(&txn)
            .await?
            .map(|link| link.recipient_name)
            .unwrap_or_default();

        let pricing = OrderPricing::new(product.price, input.quantity).with_adjustments(
            input.tax_amount,
            input.shipping_cost,
            input.discount_amount,
        );
        pricing.validate()?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now)),
            shopper_id: Set(input.shopper_id),
            address_id: Set(address.id),
            product_id: Set(product.id),
            quantity: Set(pricing.quantity),
            unit_price: Set(pricing.unit_price),
            subtotal: Set(pricing.subtotal()?),
            tax_amount: Set(pricing.tax_amount),
            shipping_cost: Set(pricing.shipping_cost),
            discount_amount: Set(pricing.discount_amount),
            grand_total: Set(pricing.grand_total()?),
            order_status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            delivery_status: Set(OrderStatus::Pending),
            payment_method: Set(input.payment_method),
            checkout_session_id: Set(input.checkout_session_id),
            tracking_number: Set(None),
            notes: Set(input.notes),
            cancellation_reason: Set(None),
            cancelled_at: Set(None),
            refund_amount: Set(None),
            product_name: Set(product.name),
            recipient_name: Set(recipient_name),
            shipping_line1: Set(address.line1),
            shipping_line2: Set(address.line2),
            shipping_city: Set(address.city),
            shipping_state: Set(address.state),
            shipping_postal_code: Set(address.postal_code),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await?;

        info!(order_id = %order.id, order_number = %order.order_number, grand_total = %order.grand_total, "Order created");
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id: order.id,
                order_number: order.order_number.clone(),
                shopper_id: order.shopper_id,
                grand_total: order.grand_total,
            })
            .await;

        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Same as [`Self::get_order`] but hides orders that belong to someone else
    #[instrument(skip(self))]
    pub async fn get_order_for_shopper(
        &self,
        shopper_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .filter(order::Column::ShopperId.eq(shopper_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<OrderModel, ServiceError> {
        OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_number)))
    }

    /// Orders materialized from one checkout session, oldest first
    #[instrument(skip(self))]
    pub async fn find_by_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .order_by_asc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Shopper order history, newest first. `page` starts at 1.
    #[instrument(skip(self))]
    pub async fn list_orders_for_shopper(
        &self,
        shopper_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        if page == 0 || per_page == 0 || per_page > MAX_PAGE_SIZE {
            return Err(ServiceError::ValidationError(format!(
                "page must be >= 1 and per_page between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        let paginator = OrderEntity::find()
            .filter(order::Column::ShopperId.eq(shopper_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::OrderNumber)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }

    /// Administrative partial update with transition checks
    #[instrument(skip(self, input))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        input: UpdateOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let now = Utc::now();
        let change = resolve_status_change(
            &current,
            input.order_status,
            input.delivery_status,
            input.payment_status,
            now,
        )
        .map_err(|e| {
            warn!(order_id = %order_id, error = %e, "Rejected order status change");
            e
        })?;

        let old_status = current.order_status;
        let mut active: order::ActiveModel = current.into();
        if let Some(status) = change.order_status {
            active.order_status = Set(status);
        }
        if let Some(status) = change.delivery_status {
            active.delivery_status = Set(status);
        }
        if let Some(status) = change.payment_status {
            active.payment_status = Set(status);
        }
        if let Some(at) = change.cancelled_at {
            active.cancelled_at = Set(Some(at));
        }
        if let Some(tracking_number) = input.tracking_number {
            active.tracking_number = Set(Some(tracking_number));
        }
        if let Some(notes) = input.notes {
            active.notes = Set(Some(notes));
        }
        active.updated_at = Set(now);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(order_id = %order_id, order_status = %updated.order_status, delivery_status = %updated.delivery_status, payment_status = %updated.payment_status, "Order updated");
        if old_status != updated.order_status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.to_string(),
                    new_status: updated.order_status.to_string(),
                })
                .await;
        }

        Ok(updated)
    }

    /// Cancels unconditionally: order and delivery status become `cancelled`
    #[instrument(skip(self, input))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        input: CancelOrderInput,
    ) -> Result<OrderModel, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let current = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let now = Utc::now();
        let plan = plan_cancellation(&current, input.refund_amount, now)?;

        let mut active: order::ActiveModel = current.into();
        active.order_status = Set(OrderStatus::Cancelled);
        active.delivery_status = Set(OrderStatus::Cancelled);
        active.payment_status = Set(plan.payment_status);
        active.cancellation_reason = Set(Some(input.reason));
        active.cancelled_at = Set(Some(plan.cancelled_at));
        active.refund_amount = Set(Some(plan.refund_amount));
        active.updated_at = Set(now);

        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(order_id = %order_id, refund_amount = %plan.refund_amount, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id,
                refund_amount: plan.refund_amount,
            })
            .await;

        Ok(updated)
    }

    /// Administrative hard delete
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let existing = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        existing.delete(&*self.db).await?;

        warn!(order_id = %order_id, "Order hard-deleted");
        self.event_sender.send_or_log(Event::OrderDeleted(order_id)).await;
        Ok(())
    }

    /// Records that `session_id` is being materialized. Returns `false` when
    /// the session already has orders or holds a live claim. A claim older
    /// than [`CLAIM_LEASE_MINUTES`] that never produced orders was abandoned
    /// and is taken over.
    #[instrument(skip(self))]
    pub async fn claim_session(
        &self,
        session_id: &str,
        shopper_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let stale_before = now - Duration::minutes(CLAIM_LEASE_MINUTES);
        let txn = self.db.begin().await?;

        let existing_orders = OrderEntity::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .count(&txn)
            .await?;
        if existing_orders > 0 {
            txn.rollback().await?;
            return Ok(false);
        }

        let receipt = payment_session_receipt::Entity::find_by_id(session_id.to_string())
            .one(&txn)
            .await?;
        if let Some(receipt) = receipt {
            if receipt.received_at > stale_before {
                txn.rollback().await?;
                return Ok(false);
            }
            // The staleness filter lets only one concurrent delivery take over.
            let taken = payment_session_receipt::Entity::update_many()
                .col_expr(payment_session_receipt::Column::ShopperId, Expr::value(shopper_id))
                .col_expr(payment_session_receipt::Column::ReceivedAt, Expr::value(now))
                .filter(payment_session_receipt::Column::SessionId.eq(session_id))
                .filter(payment_session_receipt::Column::ReceivedAt.lte(stale_before))
                .exec(&txn)
                .await?;
            txn.commit().await?;
            if taken.rows_affected == 1 {
                warn!(
                    session_id = %session_id,
                    abandoned_at = %receipt.received_at,
                    "Taking over abandoned checkout session claim"
                );
            }
            return Ok(taken.rows_affected == 1);
        }

        let inserted = payment_session_receipt::ActiveModel {
            session_id: Set(session_id.to_string()),
            shopper_id: Set(shopper_id),
            received_at: Set(now),
        }
        .insert(&txn)
        .await;

        match inserted {
            Ok(_) => {
                txn.commit().await?;
                Ok(true)
            }
            // A concurrent delivery of the same session won the insert.
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                txn.rollback().await?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drops a claim so that a redelivered event can try again
    #[instrument(skip(self))]
    pub async fn release_session(&self, session_id: &str) -> Result<(), ServiceError> {
        payment_session_receipt::Entity::delete_by_id(session_id.to_string())
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderLineWriter for OrderService {
    async fn claim_session(&self, session_id: &str, shopper_id: Uuid) -> Result<bool, ServiceError> {
        OrderService::claim_session(self, session_id, shopper_id).await
    }

    async fn release_session(&self, session_id: &str) -> Result<(), ServiceError> {
        OrderService::release_session(self, session_id).await
    }

    async fn create_order(&self, input: CreateOrderInput) -> Result<OrderModel, ServiceError> {
        OrderService::create_order(self, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn order_number_has_timestamp_and_hex_suffix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let number = generate_order_number(at);
        assert!(number.starts_with("ORD-20240309140507000-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn order_numbers_sort_by_creation_time() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(generate_order_number(earlier) < generate_order_number(later));
    }

    #[test]
    fn create_input_rejects_zero_quantity() {
        let input = CreateOrderInput::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 0);
        assert!(input.validate().is_err());
    }
}
