//! Allowed status transitions for orders.
//!
//! Order and delivery status share one lifecycle:
//!
//! ```text
//! pending -> confirmed -> processing -> shipped -> delivered
//!    \           \            \
//!     +-----------+------------+--> cancelled
//! ```
//!
//! `pending` may also skip straight to `processing`. Payment status moves
//! `pending -> paid | failed`, `failed -> pending | paid` (retry), and
//! `paid -> partially_refunded -> refunded`. Setting a status to its current
//! value is always allowed.

use crate::{
    entities::order::{self, OrderStatus, PaymentStatus},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

pub fn is_valid_order_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Confirmed | Processing | Cancelled)
            | (Confirmed, Processing | Cancelled)
            | (Processing, Shipped | Cancelled)
            | (Shipped, Delivered)
    )
}

pub fn is_valid_payment_transition(from: PaymentStatus, to: PaymentStatus) -> bool {
    use PaymentStatus::*;
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        (Pending, Paid | Failed)
            | (Failed, Pending | Paid)
            | (Paid, Refunded | PartiallyRefunded)
            | (PartiallyRefunded, Refunded)
    )
}

fn ensure_order_transition(
    field: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), ServiceError> {
    if is_valid_order_transition(from, to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "Cannot transition {} from '{}' to '{}'",
            field, from, to
        )))
    }
}

/// Status columns to write after an administrative update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order_status: Option<OrderStatus>,
    pub delivery_status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Validates requested status changes against `current`.
///
/// Cancelling the order stamps `cancelled_at` once and, unless the caller
/// also supplied a delivery status, forces delivery to `cancelled` without a
/// delivery transition check.
pub fn resolve_status_change(
    current: &order::Model,
    order_status: Option<OrderStatus>,
    delivery_status: Option<OrderStatus>,
    payment_status: Option<PaymentStatus>,
    now: DateTime<Utc>,
) -> Result<StatusChange, ServiceError> {
    let mut change = StatusChange::default();

    if let Some(to) = order_status {
        ensure_order_transition("order status", current.order_status, to)?;
        change.order_status = Some(to);
    }

    match delivery_status {
        Some(to) => {
            ensure_order_transition("delivery status", current.delivery_status, to)?;
            change.delivery_status = Some(to);
        }
        None if order_status == Some(OrderStatus::Cancelled) => {
            change.delivery_status = Some(OrderStatus::Cancelled);
        }
        None => {}
    }

    if let Some(to) = payment_status {
        if !is_valid_payment_transition(current.payment_status, to) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot transition payment status from '{}' to '{}'",
                current.payment_status, to
            )));
        }
        change.payment_status = Some(to);
    }

    if order_status == Some(OrderStatus::Cancelled) && current.cancelled_at.is_none() {
        change.cancelled_at = Some(now);
    }

    Ok(change)
}

/// Outcome of a cancellation: the refund to record and the payment status it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationPlan {
    pub refund_amount: Decimal,
    pub payment_status: PaymentStatus,
    pub cancelled_at: DateTime<Utc>,
}

pub fn plan_cancellation(
    current: &order::Model,
    refund_amount: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<CancellationPlan, ServiceError> {
    let refund = refund_amount.unwrap_or(Decimal::ZERO);
    if refund < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "refund_amount must not be negative".to_string(),
        ));
    }
    if refund > current.grand_total {
        return Err(ServiceError::ValidationError(format!(
            "refund_amount {} exceeds order total {}",
            refund, current.grand_total
        )));
    }

    let captured = matches!(
        current.payment_status,
        PaymentStatus::Paid | PaymentStatus::PartiallyRefunded
    );
    if refund > Decimal::ZERO && !captured {
        return Err(ServiceError::ValidationError(format!(
            "cannot refund an order whose payment is '{}'",
            current.payment_status
        )));
    }

    let payment_status = match current.payment_status {
        PaymentStatus::Paid | PaymentStatus::PartiallyRefunded if refund > Decimal::ZERO => {
            if refund == current.grand_total {
                PaymentStatus::Refunded
            } else {
                PaymentStatus::PartiallyRefunded
            }
        }
        status => status,
    };

    Ok(CancellationPlan {
        refund_amount: refund,
        payment_status,
        cancelled_at: current.cancelled_at.unwrap_or(now),
    })
}
