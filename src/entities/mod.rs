pub mod book;
pub mod cart_snapshot;
pub mod invoice;

pub use invoice::{OrderLine, OrderLines, OrderStatus, PaymentMethod, PaymentStatus};
