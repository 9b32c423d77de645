pub mod cart;

pub use cart::{Cart, CartItem};
