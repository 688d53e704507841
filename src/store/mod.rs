//! Persistence seams for the lifecycle core.
//!
//! Services talk to these traits only; the Postgres realizations are the
//! production stores and the in-memory ones back the test suite with the
//! same conflict and compare-and-set semantics.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::Result;
use crate::notifications::{ListNotificationsQuery, Notification};
use crate::orders::{ListOrdersQuery, Order};
use crate::settlement::BlockchainTransaction;

pub mod memory;
pub mod postgres;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Order>;

    /// Inserts a new order; `Conflict` if the id already exists.
    async fn insert(&self, order: &Order) -> Result<()>;

    /// Persists `order` if its version still matches the stored one, and
    /// returns the stored copy with the version bumped. `Conflict` signals a
    /// concurrent modification; the caller should re-read and retry its
    /// intent.
    async fn save(&self, order: &Order) -> Result<Order>;

    async fn list(&self, query: &ListOrdersQuery) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn get_by_tx_id(&self, tx_id: &str) -> Result<BlockchainTransaction>;

    /// The order's active (pending or confirmed) settlement attempt, if any.
    /// Failed attempts are superseded and never returned here.
    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<BlockchainTransaction>>;

    async fn insert(&self, transaction: &BlockchainTransaction) -> Result<()>;

    /// Compare-and-set to `confirmed`; returns whether this call applied the
    /// change. Exactly one concurrent caller observes `true`.
    async fn mark_confirmed_if_pending(
        &self,
        tx_id: &str,
        block_number: Option<i64>,
        gas_used: Option<i64>,
    ) -> Result<bool>;

    /// Compare-and-set to `failed`; returns whether this call applied it.
    async fn mark_failed_if_pending(&self, tx_id: &str) -> Result<bool>;

    /// Oldest pending transactions, for the confirmation watcher.
    async fn list_pending(&self, limit: i64) -> Result<Vec<BlockchainTransaction>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;

    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: &ListNotificationsQuery,
    ) -> Result<Vec<Notification>>;

    /// Marks one notification read; a no-op if it already was.
    async fn mark_read(&self, id: Uuid) -> Result<()>;

    /// Marks every unread notification owned by `user_id` read, atomically
    /// with respect to concurrent single marks. Returns how many changed.
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64>;

    async fn count_unread(&self, user_id: Uuid) -> Result<i64>;
}
