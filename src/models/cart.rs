//! Session-scoped shopping cart.
//!
//! Pure in-memory structure: no I/O happens here. Lines are identified by
//! `book_id` alone, so two items for the same book always collapse into one
//! line regardless of their captured name or price.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::cart_snapshot::SnapshotItem;

/// A book in the cart with the price captured when it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub book_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
}

impl CartItem {
    pub fn new(book_id: Uuid, name: impl Into<String>, price: Decimal, quantity: i32) -> Self {
        Self {
            book_id,
            name: name.into(),
            price,
            quantity,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

impl From<SnapshotItem> for CartItem {
    fn from(item: SnapshotItem) -> Self {
        Self {
            book_id: item.book_id,
            name: item.name,
            price: item.price,
            quantity: item.quantity,
        }
    }
}

impl From<&CartItem> for SnapshotItem {
    fn from(item: &CartItem) -> Self {
        Self {
            book_id: item.book_id,
            name: item.name.clone(),
            price: item.price,
            quantity: item.quantity,
        }
    }
}

/// Ordered list of cart lines, unique by `book_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items {
            cart.add_item(item);
        }
        cart
    }

    fn position(&self, book_id: Uuid) -> Option<usize> {
        self.items.iter().position(|i| i.book_id == book_id)
    }

    /// Adds `item`, or increases the quantity of the existing line for the
    /// same book. New books are appended, preserving insertion order.
    pub fn add_item(&mut self, item: CartItem) {
        match self.position(item.book_id) {
            Some(idx) => self.items[idx].quantity += item.quantity,
            None => self.items.push(item),
        }
    }

    /// Removes the line for `book_id`. Returns whether anything was removed.
    pub fn remove_item(&mut self, book_id: Uuid) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.book_id != book_id);
        self.items.len() != before
    }

    /// Sets the absolute quantity of the line for `book_id`.
    ///
    /// The value is stored as given, zero included; callers that want zero
    /// to delete the line call [`Cart::remove_item`]. Returns `false` when
    /// the book is not in the cart.
    pub fn update_quantity(&mut self, book_id: Uuid, quantity: i32) -> bool {
        match self.position(book_id) {
            Some(idx) => {
                self.items[idx].quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, book_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|i| i.book_id == book_id)
    }

    pub(crate) fn get_mut(&mut self, book_id: Uuid) -> Option<&mut CartItem> {
        self.items.iter_mut().find(|i| i.book_id == book_id)
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }

    pub fn total_price(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }
}
