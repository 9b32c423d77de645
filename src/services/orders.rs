use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::invoice::{self, Entity as Invoice, Model as InvoiceModel};
use crate::entities::{OrderLine, OrderLines, OrderStatus, PaymentMethod, PaymentStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::Cart;
use crate::services::stock_ledger::StockLedger;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderSortField {
    #[default]
    CreatedAt,
    TotalPrice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

/// Admin listing filter. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct OrderListQuery {
    pub page: u64,
    pub limit: u64,
    pub status: Option<OrderStatus>,
    pub sort_by: OrderSortField,
    pub sort_dir: SortDirection,
}

impl Default for OrderListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            status: None,
            sort_by: OrderSortField::default(),
            sort_dir: SortDirection::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderPage {
    pub orders: Vec<OrderView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct OrderStatistics {
    pub total: u64,
    pub processing: u64,
    pub shipped: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub awaiting_payment: u64,
    pub payment_failed: u64,
    /// Sum of totals of PAID orders
    pub paid_revenue: Decimal,
}

/// Public shape of an invoice.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub total_price: Decimal,
    pub lines: Vec<OrderLine>,
    pub user_id: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<InvoiceModel> for OrderView {
    fn from(m: InvoiceModel) -> Self {
        Self {
            id: m.id,
            created_at: m.created_at,
            total_price: m.total_price,
            lines: m.lines.0,
            user_id: m.user_id,
            order_status: m.order_status,
            payment_status: m.payment_status,
            payment_method: m.payment_method,
            transaction_id: m.transaction_id,
            updated_at: m.updated_at,
        }
    }
}

/// Terminal result reported by the gateway for a wallet order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid { transaction_id: Option<String> },
    Failed { reason: String },
}

/// What a settlement attempt did.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// This call moved the invoice out of PENDING_PAYMENT.
    Applied(InvoiceModel),
    /// Someone else already settled it, it never awaited payment, or the
    /// order was cancelled.
    AlreadySettled(InvoiceModel),
}

impl Settlement {
    pub fn invoice(&self) -> &InvoiceModel {
        match self {
            Settlement::Applied(m) | Settlement::AlreadySettled(m) => m,
        }
    }

    pub fn into_invoice(self) -> InvoiceModel {
        match self {
            Settlement::Applied(m) | Settlement::AlreadySettled(m) => m,
        }
    }
}

/// Builds the pending invoice for `cart`: one line per cart item, total
/// equal to the cart sum, payment status by method.
pub fn build_invoice(user_id: &str, cart: &Cart, method: PaymentMethod) -> invoice::ActiveModel {
    let now = Utc::now();
    let lines = cart
        .items()
        .iter()
        .map(|item| OrderLine {
            id: Uuid::new_v4(),
            book_id: item.book_id,
            quantity: item.quantity,
        })
        .collect();

    let payment_status = match method {
        PaymentMethod::Cod => PaymentStatus::CodPending,
        PaymentMethod::Wallet => PaymentStatus::PendingPayment,
    };

    invoice::ActiveModel {
        id: Set(Uuid::new_v4()),
        created_at: Set(now),
        total_price: Set(cart.total_price()),
        lines: Set(OrderLines(lines)),
        user_id: Set(user_id.to_string()),
        order_status: Set(OrderStatus::Processing),
        payment_status: Set(payment_status),
        payment_method: Set(method),
        transaction_id: Set(None),
        request_id: Set(None),
        updated_at: Set(now),
    }
}

/// Invoice lifecycle: creation, lookups, status machine and settlement.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Persists a built invoice on `conn` (the checkout transaction).
    pub async fn insert_invoice<C: ConnectionTrait>(
        conn: &C,
        model: invoice::ActiveModel,
    ) -> Result<InvoiceModel, ServiceError> {
        Ok(model.insert(conn).await?)
    }

    pub async fn find(&self, order_id: Uuid) -> Result<Option<InvoiceModel>, ServiceError> {
        Ok(Invoice::find_by_id(order_id).one(&*self.db).await?)
    }

    pub async fn get(&self, order_id: Uuid) -> Result<InvoiceModel, ServiceError> {
        self.find(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// A user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<InvoiceModel>, ServiceError> {
        Ok(Invoice::find()
            .filter(invoice::Column::UserId.eq(user_id))
            .order_by_desc(invoice::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderListQuery) -> Result<OrderPage, ServiceError> {
        let page = query.page.max(1);
        let limit = query.limit.max(1);

        let mut select = Invoice::find();
        if let Some(status) = query.status {
            select = select.filter(invoice::Column::OrderStatus.eq(status));
        }
        let column = match query.sort_by {
            OrderSortField::CreatedAt => invoice::Column::CreatedAt,
            OrderSortField::TotalPrice => invoice::Column::TotalPrice,
        };
        select = match query.sort_dir {
            SortDirection::Asc => select.order_by_asc(column),
            SortDirection::Desc => select.order_by_desc(column),
        };
        // stable order across pages
        select = select.order_by_asc(invoice::Column::Id);

        let paginator = select.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders: orders.into_iter().map(OrderView::from).collect(),
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    #[instrument(skip(self))]
    pub async fn order_statistics(&self) -> Result<OrderStatistics, ServiceError> {
        let db = &*self.db;
        let count_status = |status: OrderStatus| {
            Invoice::find()
                .filter(invoice::Column::OrderStatus.eq(status))
                .count(db)
        };
        let count_payment = |status: PaymentStatus| {
            Invoice::find()
                .filter(invoice::Column::PaymentStatus.eq(status))
                .count(db)
        };

        let paid_revenue: Option<Decimal> = Invoice::find()
            .select_only()
            .column_as(invoice::Column::TotalPrice.sum(), "paid_revenue")
            .filter(invoice::Column::PaymentStatus.eq(PaymentStatus::Paid))
            .into_tuple::<Option<Decimal>>()
            .one(db)
            .await?
            .flatten();

        Ok(OrderStatistics {
            total: Invoice::find().count(db).await?,
            processing: count_status(OrderStatus::Processing).await?,
            shipped: count_status(OrderStatus::Shipped).await?,
            delivered: count_status(OrderStatus::Delivered).await?,
            cancelled: count_status(OrderStatus::Cancelled).await?,
            awaiting_payment: count_payment(PaymentStatus::PendingPayment).await?,
            payment_failed: count_payment(PaymentStatus::PaymentFailed).await?,
            paid_revenue: paid_revenue.unwrap_or_default(),
        })
    }

    /// Unconditional status setter. Performs no transition check; use
    /// [`OrderService::transition_status`] or [`OrderService::cancel`] when
    /// the state machine must hold.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<InvoiceModel, ServiceError> {
        let order = self.get(order_id).await?;
        let old_status = order.order_status;

        let mut active: invoice::ActiveModel = order.into();
        active.order_status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, old_status = %old_status, new_status = %new_status, "Order status updated");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;

        Ok(updated)
    }

    /// Moves the order along the fulfilment state machine. Cancellation is
    /// routed through [`OrderService::cancel`] so stock is credited back.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<InvoiceModel, ServiceError> {
        if new_status == OrderStatus::Cancelled {
            return self.cancel(order_id).await;
        }

        let order = self.get(order_id).await?;
        let current = order.order_status;
        if current == OrderStatus::Cancelled {
            return Err(ServiceError::OrderAlreadyCancelled(order_id));
        }
        if !current.can_transition_to(new_status) {
            return Err(ServiceError::InvalidTransition {
                from: current.to_string(),
                to: new_status.to_string(),
            });
        }

        // Guard on the status we validated against.
        let result = Invoice::update_many()
            .set(invoice::ActiveModel {
                order_status: Set(new_status),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(invoice::Column::Id.eq(order_id))
            .filter(invoice::Column::OrderStatus.eq(current))
            .exec(&*self.db)
            .await?;

        let updated = self.get(order_id).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::InvalidTransition {
                from: updated.order_status.to_string(),
                to: new_status.to_string(),
            });
        }

        info!(order_id = %order_id, old_status = %current, new_status = %new_status, "Order status transitioned");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: current,
                new_status,
            })
            .await;

        Ok(updated)
    }

    /// Cancels a PROCESSING or SHIPPED order and credits every line back to
    /// stock.
    ///
    /// The status change is a conditional update, so when two cancellations
    /// race only one of them restocks. A payment still awaiting the gateway
    /// is failed in the same transaction, so a late notification can no
    /// longer mark the cancelled order PAID. Credit-back failures are logged
    /// and reported as events; they never undo the cancellation.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid) -> Result<InvoiceModel, ServiceError> {
        let order = self.get(order_id).await?;
        if order.order_status.is_terminal() {
            return Err(Self::cancel_rejection(order_id, order.order_status));
        }
        let old_status = order.order_status;
        let now = Utc::now();

        let txn = self.db.begin().await?;
        let result = Invoice::update_many()
            .set(invoice::ActiveModel {
                order_status: Set(OrderStatus::Cancelled),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(invoice::Column::Id.eq(order_id))
            .filter(
                invoice::Column::OrderStatus.is_in([OrderStatus::Processing, OrderStatus::Shipped]),
            )
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            // lost to a concurrent cancel or delivery
            let current = self.get(order_id).await?;
            return Err(Self::cancel_rejection(order_id, current.order_status));
        }

        let abandoned = Invoice::update_many()
            .set(invoice::ActiveModel {
                payment_status: Set(PaymentStatus::PaymentFailed),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(invoice::Column::Id.eq(order_id))
            .filter(invoice::Column::PaymentStatus.eq(PaymentStatus::PendingPayment))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        if abandoned.rows_affected > 0 {
            warn!(order_id = %order_id, "Pending wallet payment failed by cancellation");
            self.event_sender
                .send_or_log(Event::PaymentFailed {
                    order_id,
                    reason: "order cancelled before payment completed".to_string(),
                })
                .await;
        }

        for line in order.lines() {
            self.restock_line(order_id, line).await;
        }

        info!(order_id = %order_id, lines = order.lines().len(), "Order cancelled");
        counter!("bookstore_orders.cancelled", 1);
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: OrderStatus::Cancelled,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;

        self.get(order_id).await
    }

    fn cancel_rejection(order_id: Uuid, status: OrderStatus) -> ServiceError {
        match status {
            OrderStatus::Delivered => ServiceError::OrderAlreadyDelivered(order_id),
            _ => ServiceError::OrderAlreadyCancelled(order_id),
        }
    }

    async fn restock_line(&self, order_id: Uuid, line: &OrderLine) {
        let reason = match StockLedger::increment_on(&*self.db, line.book_id, line.quantity).await {
            Ok(true) => return,
            Ok(false) => "book no longer exists".to_string(),
            Err(e) => e.to_string(),
        };

        error!(order_id = %order_id, book_id = %line.book_id, quantity = line.quantity, %reason, "Failed to credit stock back");
        self.event_sender
            .send_or_log(Event::StockRestoreFailed {
                order_id,
                book_id: line.book_id,
                quantity: line.quantity,
                reason,
            })
            .await;
    }

    /// Moves a PENDING_PAYMENT invoice to PAID or PAYMENT_FAILED.
    ///
    /// The write is conditional on the invoice still awaiting payment and
    /// not being cancelled, so between the gateway callback and client
    /// polling the first writer wins and everyone after it observes
    /// `AlreadySettled`.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn settle_payment(
        &self,
        order_id: Uuid,
        outcome: PaymentOutcome,
    ) -> Result<Settlement, ServiceError> {
        let mut update = invoice::ActiveModel {
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        match &outcome {
            PaymentOutcome::Paid { transaction_id } => {
                update.payment_status = Set(PaymentStatus::Paid);
                update.transaction_id = Set(transaction_id.clone());
            }
            PaymentOutcome::Failed { .. } => {
                update.payment_status = Set(PaymentStatus::PaymentFailed);
            }
        }

        let result = Invoice::update_many()
            .set(update)
            .filter(invoice::Column::Id.eq(order_id))
            .filter(invoice::Column::PaymentStatus.eq(PaymentStatus::PendingPayment))
            .filter(invoice::Column::OrderStatus.ne(OrderStatus::Cancelled))
            .exec(&*self.db)
            .await?;

        let invoice = self.get(order_id).await?;
        if result.rows_affected == 0 {
            info!(order_id = %order_id, payment_status = %invoice.payment_status, "Payment already settled, ignoring");
            return Ok(Settlement::AlreadySettled(invoice));
        }

        match outcome {
            PaymentOutcome::Paid { transaction_id } => {
                counter!("bookstore_payments.settled", 1, "outcome" => "paid");
                info!(order_id = %order_id, transaction_id = ?transaction_id, "Payment settled");
                self.event_sender
                    .send_or_log(Event::PaymentSettled {
                        order_id,
                        transaction_id,
                    })
                    .await;
            }
            PaymentOutcome::Failed { reason } => {
                counter!("bookstore_payments.settled", 1, "outcome" => "failed");
                warn!(order_id = %order_id, %reason, "Payment failed");
                self.event_sender
                    .send_or_log(Event::PaymentFailed { order_id, reason })
                    .await;
            }
        }

        Ok(Settlement::Applied(invoice))
    }

    /// Records the gateway request id used to open the payment session.
    pub async fn set_request_id(&self, order_id: Uuid, request_id: &str) -> Result<(), ServiceError> {
        let result = Invoice::update_many()
            .set(invoice::ActiveModel {
                request_id: Set(Some(request_id.to_string())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(invoice::Column::Id.eq(order_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Ok(())
    }

    /// Wallet orders still PROCESSING whose payment is pending or failed and
    /// that were created before `cutoff`, oldest first.
    pub async fn find_stale_wallet_orders(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<InvoiceModel>, ServiceError> {
        Ok(Invoice::find()
            .filter(invoice::Column::PaymentMethod.eq(PaymentMethod::Wallet))
            .filter(invoice::Column::OrderStatus.eq(OrderStatus::Processing))
            .filter(invoice::Column::PaymentStatus.is_in([
                PaymentStatus::PendingPayment,
                PaymentStatus::PaymentFailed,
            ]))
            .filter(invoice::Column::CreatedAt.lt(cutoff))
            .order_by_asc(invoice::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CartItem;
    use rust_decimal_macros::dec;

    #[test]
    fn invoice_lines_mirror_cart() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cart = Cart::from_items([
            CartItem::new(a, "Dune", dec!(120000), 2),
            CartItem::new(b, "Emma", dec!(85000), 1),
        ]);

        let model = build_invoice("u-1", &cart, PaymentMethod::Wallet);
        let lines = model.lines.clone().unwrap();
        let pairs: Vec<(Uuid, i32)> = lines.0.iter().map(|l| (l.book_id, l.quantity)).collect();
        assert_eq!(pairs, vec![(a, 2), (b, 1)]);
        assert_eq!(model.total_price.clone().unwrap(), dec!(325000));
        assert_eq!(
            model.payment_status.clone().unwrap(),
            PaymentStatus::PendingPayment
        );
    }

    #[test]
    fn cod_invoices_start_cod_pending() {
        let cart = Cart::from_items([CartItem::new(Uuid::new_v4(), "Dune", dec!(1), 1)]);
        let model = build_invoice("u-1", &cart, PaymentMethod::Cod);
        assert_eq!(model.payment_status.clone().unwrap(), PaymentStatus::CodPending);
        assert_eq!(model.order_status.clone().unwrap(), OrderStatus::Processing);
    }

    #[test]
    fn list_query_defaults_to_newest_first() {
        let query = OrderListQuery::default();
        assert_eq!(query.page, 1);
        assert_eq!(query.sort_by, OrderSortField::CreatedAt);
        assert_eq!(query.sort_dir, SortDirection::Desc);
    }
}
