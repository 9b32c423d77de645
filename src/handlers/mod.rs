pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payments;
pub mod session;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart_snapshot::CartSnapshotService, checkout::CheckoutService, orders::OrderService,
    payment_gateway::PaymentGateway, stock_ledger::StockLedger,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub stock: StockLedger,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub snapshots: CartSnapshotService,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let stock = StockLedger::new(db_pool.clone());
        let orders = OrderService::new(db_pool.clone(), event_sender.clone());
        let checkout = CheckoutService::new(
            db_pool.clone(),
            event_sender,
            orders.clone(),
            stock.clone(),
            gateway,
            config.wallet.order_info_prefix.clone(),
        );
        let snapshots = CartSnapshotService::new(db_pool, stock.clone());

        Self {
            stock,
            orders,
            checkout,
            snapshots,
        }
    }
}
