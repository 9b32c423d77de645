//! Durable per-user copy of the session cart, taken at logout and merged
//! back at the next login.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, DatabaseConnection, EntityTrait, Set,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::cart_snapshot::{self, Entity as CartSnapshot, SnapshotItem, SnapshotItems};
use crate::errors::ServiceError;
use crate::models::{Cart, CartItem};
use crate::services::stock_ledger::StockLedger;

#[derive(Clone)]
pub struct CartSnapshotService {
    db: Arc<DatabaseConnection>,
    ledger: StockLedger,
}

impl CartSnapshotService {
    pub fn new(db: Arc<DatabaseConnection>, ledger: StockLedger) -> Self {
        Self { db, ledger }
    }

    pub async fn find(&self, user_id: &str) -> Result<Option<cart_snapshot::Model>, ServiceError> {
        Ok(CartSnapshot::find_by_id(user_id.to_string())
            .one(&*self.db)
            .await?)
    }

    /// Upserts the snapshot for `user_id`; an empty cart deletes it instead.
    #[instrument(skip(self, cart), fields(items = cart.len()))]
    pub async fn save_snapshot(&self, user_id: &str, cart: &Cart) -> Result<(), ServiceError> {
        if cart.is_empty() {
            let deleted = CartSnapshot::delete_by_id(user_id.to_string())
                .exec(&*self.db)
                .await?;
            if deleted.rows_affected > 0 {
                info!(%user_id, "deleted snapshot for empty cart");
            }
            return Ok(());
        }

        let model = cart_snapshot::ActiveModel {
            user_id: Set(user_id.to_string()),
            items: Set(SnapshotItems(cart.items().iter().map(SnapshotItem::from).collect())),
            last_updated: Set(Utc::now()),
        };

        CartSnapshot::insert(model)
            .on_conflict(
                OnConflict::column(cart_snapshot::Column::UserId)
                    .update_columns([
                        cart_snapshot::Column::Items,
                        cart_snapshot::Column::LastUpdated,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        info!(%user_id, items = cart.len(), "saved cart snapshot");
        Ok(())
    }

    /// Merges the stored snapshot into `live` and deletes the snapshot.
    ///
    /// Saved lines whose book is gone or out of stock are dropped. Matching
    /// lines sum their quantities, new lines keep the saved quantity, and
    /// both are capped at current stock with name and price refreshed from
    /// the catalog. Without a snapshot `live` is returned unchanged.
    #[instrument(skip(self, live))]
    pub async fn restore_and_merge(&self, user_id: &str, live: Cart) -> Result<Cart, ServiceError> {
        let Some(snapshot) = self.find(user_id).await? else {
            return Ok(live);
        };

        let saved = snapshot.items.0;
        let ids: Vec<Uuid> = saved.iter().map(|i| i.book_id).collect();
        let books = self.ledger.get_books(&ids).await?;

        let mut merged = live;
        for item in saved {
            let Some(book) = books.get(&item.book_id) else {
                warn!(book_id = %item.book_id, "dropping snapshot line for deleted book");
                continue;
            };
            if book.quantity <= 0 {
                warn!(book_id = %book.id, title = %book.title, "dropping snapshot line for out-of-stock book");
                continue;
            }

            match merged.get_mut(book.id) {
                Some(existing) => {
                    existing.quantity = (existing.quantity + item.quantity).min(book.quantity);
                    existing.name = book.title.clone();
                    existing.price = book.price;
                }
                None => merged.add_item(CartItem::new(
                    book.id,
                    book.title.clone(),
                    book.price,
                    item.quantity.min(book.quantity),
                )),
            }
        }

        CartSnapshot::delete_by_id(user_id.to_string())
            .exec(&*self.db)
            .await?;

        info!(%user_id, items = merged.len(), "restored cart snapshot");
        Ok(merged)
    }

    /// Removes a deleted book from every stored snapshot. Snapshots left
    /// empty are deleted. Returns the number of snapshots touched.
    pub async fn purge_book(&self, book_id: Uuid) -> Result<u64, ServiceError> {
        self.purge_books(&[book_id]).await
    }

    #[instrument(skip(self))]
    pub async fn purge_books(&self, book_ids: &[Uuid]) -> Result<u64, ServiceError> {
        if book_ids.is_empty() {
            return Ok(0);
        }

        // Items are a JSON column, so filtering happens here rather than in SQL.
        let snapshots = CartSnapshot::find().all(&*self.db).await?;
        let mut touched = 0u64;

        for snapshot in snapshots {
            let before = snapshot.items.0.len();
            let kept: Vec<SnapshotItem> = snapshot
                .items
                .0
                .iter()
                .filter(|i| !book_ids.contains(&i.book_id))
                .cloned()
                .collect();
            if kept.len() == before {
                continue;
            }

            if kept.is_empty() {
                CartSnapshot::delete_by_id(snapshot.user_id.clone())
                    .exec(&*self.db)
                    .await?;
            } else {
                let mut active: cart_snapshot::ActiveModel = snapshot.clone().into();
                active.items = Set(SnapshotItems(kept));
                active.last_updated = Set(Utc::now());
                active.update(&*self.db).await?;
            }
            touched += 1;
            info!(user_id = %snapshot.user_id, "purged deleted books from cart snapshot");
        }

        Ok(touched)
    }

    /// Logout hook. Failures are logged and swallowed so logout succeeds.
    pub async fn save_on_logout(&self, user_id: &str, cart: &Cart) {
        if let Err(e) = self.save_snapshot(user_id, cart).await {
            warn!(%user_id, error = %e, "failed to save cart snapshot on logout");
        }
    }

    /// Login hook. On failure the live cart is returned unchanged.
    pub async fn restore_on_login(&self, user_id: &str, live: Cart) -> Cart {
        match self.restore_and_merge(user_id, live.clone()).await {
            Ok(merged) => merged,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to restore cart snapshot on login");
                live
            }
        }
    }
}
