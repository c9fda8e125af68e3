use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// Domain writes have already committed by the time events are emitted.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted after a write commits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        shopper_id: Uuid,
        grand_total: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        refund_amount: Decimal,
    },
    OrderDeleted(Uuid),
    CartItemAdded {
        shopper_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    CartDeactivated {
        shopper_id: Uuid,
        items: u64,
    },
    DefaultAddressChanged {
        shopper_id: Uuid,
        address_id: Uuid,
    },
    CheckoutSessionCreated {
        shopper_id: Uuid,
        session_id: String,
    },
    CheckoutSessionMaterialized {
        session_id: String,
        shopper_id: Uuid,
        orders_created: usize,
        lines_failed: usize,
    },
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutSessionMaterialized {
                session_id,
                lines_failed,
                ..
            } if *lines_failed > 0 => {
                warn!(
                    session_id = %session_id,
                    lines_failed,
                    "checkout session materialized with failed lines; needs reconciliation"
                );
            }
            _ => info!(event = ?event, "domain event"),
        }
    }

    info!("Event channel closed; event processing loop stopped");
}
