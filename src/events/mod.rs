use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::{OrderStatus, PaymentMethod};

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

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain operations never fail because nobody is listening.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Domain events emitted by the order engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        user_id: String,
        payment_method: PaymentMethod,
        total: Decimal,
    },
    PaymentSessionOpened {
        order_id: Uuid,
        request_id: String,
    },
    PaymentSettled {
        order_id: Uuid,
        transaction_id: Option<String>,
    },
    PaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled(Uuid),
    /// A cancellation could not credit stock back for one line.
    StockRestoreFailed {
        order_id: Uuid,
        book_id: Uuid,
        quantity: i32,
        reason: String,
    },
    /// A gateway notification was refused (signature or amount mismatch).
    CallbackRejected {
        order_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
    PendingOrderExpired(Uuid),
}

/// Consumes the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderPlaced {
                order_id,
                user_id,
                payment_method,
                total,
            } => {
                info!(%order_id, %user_id, %payment_method, %total, "order placed");
            }
            Event::PaymentSessionOpened {
                order_id,
                request_id,
            } => {
                info!(%order_id, %request_id, "wallet payment session opened");
            }
            Event::PaymentSettled {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, transaction_id = ?transaction_id, "payment settled");
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(%order_id, %reason, "payment failed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            Event::StockRestoreFailed {
                order_id,
                book_id,
                quantity,
                reason,
            } => {
                // needs manual stock correction
                error!(%order_id, %book_id, quantity, %reason, "stock credit-back failed");
            }
            Event::CallbackRejected {
                order_id,
                reason,
                at,
            } => {
                warn!(security = true, %order_id, %reason, %at, "gateway callback rejected");
            }
            Event::PendingOrderExpired(order_id) => {
                info!(%order_id, "abandoned wallet order expired");
            }
        }
    }

    warn!("Event processing loop has ended");
}
