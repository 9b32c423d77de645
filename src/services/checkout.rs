//! Checkout orchestration: cart to stock-safe invoice, wallet hand-off and
//! payment reconciliation.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::invoice::Model as InvoiceModel;
use crate::entities::{OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::Cart;
use crate::services::orders::{build_invoice, OrderService, PaymentOutcome, Settlement};
use crate::services::payment_gateway::{
    gateway_amount, order_info, PaymentGateway, QueryVerdict, WalletCallback, RESULT_SUCCESS,
};
use crate::services::stock_ledger::{StockLedger, StockRequest};

/// Where the shopper goes to pay a wallet order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentSession {
    pub order_id: Uuid,
    /// Whole currency units, as signed for the gateway
    pub amount: i64,
    pub pay_url: Option<String>,
    pub qr_code_url: Option<String>,
    pub deeplink: Option<String>,
}

#[derive(Debug, Clone)]
pub enum CheckoutOutcome {
    /// Cash on delivery: the order is final and the cart should be cleared.
    Placed(InvoiceModel),
    /// Wallet: the order waits for payment; the cart is kept until PAID.
    AwaitingPayment {
        order: InvoiceModel,
        session: PaymentSession,
    },
}

impl CheckoutOutcome {
    pub fn order(&self) -> &InvoiceModel {
        match self {
            CheckoutOutcome::Placed(order) => order,
            CheckoutOutcome::AwaitingPayment { order, .. } => order,
        }
    }
}

/// How an inbound gateway notification was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    /// This notification settled the order to the given status.
    Applied(PaymentStatus),
    /// The order was already settled; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusView {
    pub order_id: Uuid,
    pub status: PaymentStatus,
    pub paid: bool,
}

impl From<&InvoiceModel> for PaymentStatusView {
    fn from(order: &InvoiceModel) -> Self {
        Self {
            order_id: order.id,
            status: order.payment_status,
            paid: order.payment_status == PaymentStatus::Paid,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    orders: OrderService,
    ledger: StockLedger,
    gateway: Arc<dyn PaymentGateway>,
    order_info_prefix: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        orders: OrderService,
        ledger: StockLedger,
        gateway: Arc<dyn PaymentGateway>,
        order_info_prefix: impl Into<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            orders,
            ledger,
            gateway,
            order_info_prefix: order_info_prefix.into(),
        }
    }

    pub fn orders(&self) -> &OrderService {
        &self.orders
    }

    /// Turns `cart` into an invoice owned by `user_id`.
    ///
    /// Availability of every line is checked before anything is written.
    /// Stock is then reserved and the invoice inserted in one transaction,
    /// so a lost race leaves no partial decrement behind.
    #[instrument(skip(self, cart), fields(items = cart.len()))]
    pub async fn checkout(
        &self,
        user_id: &str,
        cart: &Cart,
        method: PaymentMethod,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if cart.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        if let Some(item) = cart.items().iter().find(|i| i.quantity <= 0) {
            return Err(ServiceError::ValidationError(format!(
                "quantity for \"{}\" must be at least 1",
                item.name
            )));
        }

        let requests: Vec<StockRequest> = cart
            .items()
            .iter()
            .map(|i| StockRequest {
                book_id: i.book_id,
                quantity: i.quantity,
            })
            .collect();

        self.ledger.check_availability(&requests).await.map_err(|e| {
            counter!("bookstore_checkout.rejected", 1, "reason" => "stock");
            e
        })?;

        let txn = self.db.begin().await?;
        StockLedger::reserve_all(&txn, &requests).await?;
        let order =
            OrderService::insert_invoice(&txn, build_invoice(user_id, cart, method)).await?;
        txn.commit().await?;

        info!(order_id = %order.id, %user_id, payment_method = %method, total = %order.total_price, "Order placed");
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: order.id,
                user_id: user_id.to_string(),
                payment_method: method,
                total: order.total_price,
            })
            .await;

        match method {
            PaymentMethod::Cod => {
                counter!("bookstore_checkout.completed", 1, "method" => "cod");
                Ok(CheckoutOutcome::Placed(order))
            }
            PaymentMethod::Wallet => self.open_payment_session(order).await,
        }
    }

    /// Hands a persisted PENDING_PAYMENT order to the gateway.
    ///
    /// An unreachable gateway leaves the order pending and is returned as a
    /// retriable error. A rejection marks the order PAYMENT_FAILED; its stock
    /// stays reserved until the order is cancelled.
    async fn open_payment_session(
        &self,
        order: InvoiceModel,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let amount = gateway_amount(order.total_price)?;
        let order_ref = order.id.to_string();
        let info = order_info(&self.order_info_prefix, &order_ref);

        let response = match self.gateway.create_payment(&order_ref, amount, &info).await {
            Ok(response) => response,
            Err(e) => {
                counter!("bookstore_checkout.gateway_errors", 1);
                warn!(order_id = %order.id, error = %e, "Payment gateway unavailable, order left pending");
                return Err(e);
            }
        };

        if !response.is_accepted() {
            let reason = format!("gateway result {}: {}", response.result_code, response.message);
            self.orders
                .settle_payment(
                    order.id,
                    PaymentOutcome::Failed {
                        reason: reason.clone(),
                    },
                )
                .await?;
            counter!("bookstore_checkout.rejected", 1, "reason" => "gateway");
            return Err(ServiceError::PaymentFailed(reason));
        }

        self.orders
            .set_request_id(order.id, &response.request_id)
            .await?;
        self.event_sender
            .send_or_log(Event::PaymentSessionOpened {
                order_id: order.id,
                request_id: response.request_id.clone(),
            })
            .await;
        counter!("bookstore_checkout.completed", 1, "method" => "wallet");

        let order = self.orders.get(order.id).await?;
        Ok(CheckoutOutcome::AwaitingPayment {
            session: PaymentSession {
                order_id: order.id,
                amount,
                pay_url: response.pay_url,
                qr_code_url: response.qr_code_url,
                deeplink: response.deeplink,
            },
            order,
        })
    }

    /// Applies an inbound gateway notification.
    ///
    /// Forged or tampered notifications are rejected and never touch the
    /// invoice. Genuine notifications for an order that is already settled
    /// are acknowledged as duplicates.
    #[instrument(skip(self, callback), fields(order_id = %callback.order_id, result_code = callback.result_code))]
    pub async fn handle_gateway_callback(
        &self,
        callback: &WalletCallback,
    ) -> Result<CallbackAck, ServiceError> {
        let order_id = Uuid::parse_str(&callback.order_id)
            .map_err(|_| ServiceError::BadRequest(format!("unknown order id {}", callback.order_id)))?;

        if !self.gateway.verify_callback_signature(callback) {
            self.reject_callback(callback, "signature mismatch").await;
            return Err(ServiceError::InvalidSignature(
                "callback signature mismatch".to_string(),
            ));
        }

        let order = self.orders.get(order_id).await?;
        if order.payment_status.is_settled() || order.order_status == OrderStatus::Cancelled {
            info!(%order_id, payment_status = %order.payment_status, order_status = %order.order_status, "Callback for settled order ignored");
            return Ok(CallbackAck::Duplicate);
        }

        let expected = gateway_amount(order.total_price)?;
        if callback.amount != expected {
            self.reject_callback(callback, "amount mismatch").await;
            return Err(ServiceError::InvalidSignature(format!(
                "callback amount {} does not match order amount {}",
                callback.amount, expected
            )));
        }

        let outcome = if callback.result_code == RESULT_SUCCESS {
            PaymentOutcome::Paid {
                transaction_id: callback.trans_id.map(|t| t.to_string()),
            }
        } else {
            PaymentOutcome::Failed {
                reason: format!("gateway result {}: {}", callback.result_code, callback.message),
            }
        };

        match self.orders.settle_payment(order_id, outcome).await? {
            Settlement::Applied(order) => Ok(CallbackAck::Applied(order.payment_status)),
            Settlement::AlreadySettled(_) => Ok(CallbackAck::Duplicate),
        }
    }

    async fn reject_callback(&self, callback: &WalletCallback, reason: &str) {
        counter!("bookstore_payments.callback_rejected", 1);
        warn!(security = true, order_id = %callback.order_id, %reason, "Rejecting gateway callback");
        self.event_sender
            .send_or_log(Event::CallbackRejected {
                order_id: callback.order_id.clone(),
                reason: reason.to_string(),
                at: Utc::now(),
            })
            .await;
    }

    /// Client-side polling for a wallet order.
    ///
    /// A pending order triggers one gateway query; a gateway error is logged
    /// and the stored status returned.
    #[instrument(skip(self))]
    pub async fn poll_status(&self, order_id: Uuid) -> Result<PaymentStatusView, ServiceError> {
        let order = self.orders.get(order_id).await?;
        if order.payment_status != PaymentStatus::PendingPayment {
            return Ok(PaymentStatusView::from(&order));
        }

        match self.query_and_settle(&order).await {
            Ok(Some(settlement)) => Ok(PaymentStatusView::from(settlement.invoice())),
            Ok(None) => Ok(PaymentStatusView::from(&order)),
            Err(e) => {
                warn!(%order_id, error = %e, "Payment status query failed, returning stored status");
                Ok(PaymentStatusView::from(&order))
            }
        }
    }

    /// Queries the gateway once for a PENDING_PAYMENT order and settles it
    /// when the answer is terminal. `None` means still pending.
    pub async fn query_and_settle(
        &self,
        order: &InvoiceModel,
    ) -> Result<Option<Settlement>, ServiceError> {
        let order_ref = order.id.to_string();
        let request_id = order.request_id.clone().unwrap_or_else(|| {
            format!("{}_query_{}", order_ref, Utc::now().timestamp_millis())
        });

        let response = self.gateway.query_status(&order_ref, &request_id).await?;
        let outcome = match response.verdict() {
            QueryVerdict::Pending => return Ok(None),
            QueryVerdict::Paid { transaction_id } => PaymentOutcome::Paid { transaction_id },
            QueryVerdict::Failed { reason } => PaymentOutcome::Failed { reason },
        };

        Ok(Some(self.orders.settle_payment(order.id, outcome).await?))
    }

    /// Admin cancellation; credits stock back.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<InvoiceModel, ServiceError> {
        self.orders.cancel(order_id).await
    }

    /// Admin status change, validated against the state machine.
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<InvoiceModel, ServiceError> {
        self.orders.transition_status(order_id, status).await
    }
}
