// Stock and catalog
pub mod stock_ledger;

// Cart persistence across sessions
pub mod cart_snapshot;

// Orders and payments
pub mod checkout;
pub mod orders;
pub mod payment_gateway;
pub mod reconciliation;
