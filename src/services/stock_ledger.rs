//! Atomic per-book stock counter.
//!
//! Every mutation of `books.quantity` is a single conditional
//! `UPDATE ... WHERE` statement. Nothing here reads a row, adjusts it in
//! memory and writes it back.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::book::{self, Entity as Book};
use crate::errors::ServiceError;

/// One book and the quantity a checkout wants to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockRequest {
    pub book_id: Uuid,
    pub quantity: i32,
}

#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Catalog lookup: `{id, title, price, quantity}`.
    pub async fn get_book(&self, book_id: Uuid) -> Result<Option<book::Model>, ServiceError> {
        Ok(Book::find_by_id(book_id).one(&*self.db).await?)
    }

    pub async fn get_books(
        &self,
        book_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, book::Model>, ServiceError> {
        if book_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let books = Book::find()
            .filter(book::Column::Id.is_in(book_ids.iter().copied()))
            .all(&*self.db)
            .await?;
        Ok(books.into_iter().map(|b| (b.id, b)).collect())
    }

    /// Takes `quantity` units only if at least that many are available.
    /// Returns `false`, changing nothing, when the guard fails or the book
    /// does not exist.
    pub async fn decrement(&self, book_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        Self::decrement_on(&*self.db, book_id, quantity).await
    }

    /// Adds `quantity` units back. Returns `false` when the book does not
    /// exist.
    pub async fn increment(&self, book_id: Uuid, quantity: i32) -> Result<bool, ServiceError> {
        Self::increment_on(&*self.db, book_id, quantity).await
    }

    /// [`StockLedger::decrement`] on an explicit connection or transaction.
    pub async fn decrement_on<C: ConnectionTrait>(
        conn: &C,
        book_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        ensure_positive(quantity)?;

        let result = Book::update_many()
            .col_expr(
                book::Column::Quantity,
                Expr::col(book::Column::Quantity).sub(quantity),
            )
            .filter(book::Column::Id.eq(book_id))
            .filter(book::Column::Quantity.gte(quantity))
            .exec(conn)
            .await?;

        let applied = result.rows_affected == 1;
        debug!(%book_id, quantity, applied, "conditional stock decrement");
        Ok(applied)
    }

    pub async fn increment_on<C: ConnectionTrait>(
        conn: &C,
        book_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        ensure_positive(quantity)?;

        let result = Book::update_many()
            .col_expr(
                book::Column::Quantity,
                Expr::col(book::Column::Quantity).add(quantity),
            )
            .filter(book::Column::Id.eq(book_id))
            .exec(conn)
            .await?;

        let applied = result.rows_affected == 1;
        debug!(%book_id, quantity, applied, "stock increment");
        Ok(applied)
    }

    /// Read-only first pass of checkout: every request must be satisfiable
    /// from current stock, otherwise the first short book is reported.
    #[instrument(skip(self, requests))]
    pub async fn check_availability(&self, requests: &[StockRequest]) -> Result<(), ServiceError> {
        let ids: Vec<Uuid> = requests.iter().map(|r| r.book_id).collect();
        let books = self.get_books(&ids).await?;

        for req in requests {
            ensure_positive(req.quantity)?;
            let book = books
                .get(&req.book_id)
                .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", req.book_id)))?;
            if book.quantity < req.quantity {
                return Err(ServiceError::InsufficientStock {
                    book_id: book.id,
                    title: book.title.clone(),
                    requested: req.quantity,
                    available: book.quantity,
                });
            }
        }
        Ok(())
    }

    /// Second pass: conditionally decrements every request on `conn`.
    ///
    /// Run it inside a transaction; dropping the transaction after an error
    /// undoes the decrements already applied for the same checkout. A lost
    /// race is reported as `InsufficientStock` when the book is now short,
    /// and as `StockConflict` otherwise.
    pub async fn reserve_all<C: ConnectionTrait>(
        conn: &C,
        requests: &[StockRequest],
    ) -> Result<(), ServiceError> {
        for req in requests {
            if Self::decrement_on(conn, req.book_id, req.quantity).await? {
                continue;
            }

            counter!("bookstore_stock.conflicts", 1);
            warn!(book_id = %req.book_id, quantity = req.quantity, "lost stock race during reservation");

            let book = Book::find_by_id(req.book_id)
                .one(conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Book {} not found", req.book_id)))?;
            if book.quantity < req.quantity {
                return Err(ServiceError::InsufficientStock {
                    book_id: book.id,
                    title: book.title,
                    requested: req.quantity,
                    available: book.quantity,
                });
            }
            return Err(ServiceError::StockConflict(format!(
                "book {} changed during reservation",
                req.book_id
            )));
        }
        Ok(())
    }
}

fn ensure_positive(quantity: i32) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "quantity must be positive, got {}",
            quantity
        )));
    }
    Ok(())
}
