//! In-memory store realizations.
//!
//! Backing for the test suite. Conflict detection and compare-and-set
//! behavior match the Postgres stores exactly; every mutation happens under
//! a single write lock so bulk operations stay atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::models::page_window;
use crate::notifications::{ListNotificationsQuery, Notification};
use crate::orders::{ListOrdersQuery, Order};
use crate::settlement::{BlockchainTransaction, TransactionStatus};

use super::{NotificationStore, OrderStore, TransactionStore};

#[derive(Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get(&self, id: Uuid) -> Result<Order> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound("order"))
    }

    async fn insert(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(Error::Conflict(format!("order {} already exists", order.id)));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn save(&self, order: &Order) -> Result<Order> {
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or(Error::NotFound("order"))?;

        if stored.version != order.version {
            return Err(Error::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }

        let mut updated = order.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list(&self, query: &ListOrdersQuery) -> Result<Vec<Order>> {
        let (limit, offset) = page_window(query.page, query.limit);

        let mut matching: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| query.buyer_id.map_or(true, |id| order.buyer_id == id))
            .filter(|order| query.farmer_id.map_or(true, |id| order.farmer_id == id))
            .filter(|order| query.status.map_or(true, |status| order.status == status))
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryTransactionStore {
    transactions: RwLock<Vec<BlockchainTransaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn get_by_tx_id(&self, tx_id: &str) -> Result<BlockchainTransaction> {
        self.transactions
            .read()
            .await
            .iter()
            .find(|tx| tx.tx_id == tx_id)
            .cloned()
            .ok_or(Error::NotFound("settlement transaction"))
    }

    async fn active_for_order(&self, order_id: Uuid) -> Result<Option<BlockchainTransaction>> {
        Ok(self
            .transactions
            .read()
            .await
            .iter()
            .find(|tx| tx.order_id == order_id && tx.status != TransactionStatus::Failed)
            .cloned())
    }

    async fn insert(&self, transaction: &BlockchainTransaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.iter().any(|tx| tx.tx_id == transaction.tx_id) {
            return Err(Error::Conflict(format!(
                "transaction {} already recorded",
                transaction.tx_id
            )));
        }
        transactions.push(transaction.clone());
        Ok(())
    }

    async fn mark_confirmed_if_pending(
        &self,
        tx_id: &str,
        block_number: Option<i64>,
        gas_used: Option<i64>,
    ) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        match transactions
            .iter_mut()
            .find(|tx| tx.tx_id == tx_id && tx.status == TransactionStatus::Pending)
        {
            Some(tx) => {
                tx.status = TransactionStatus::Confirmed;
                tx.block_number = block_number;
                tx.gas_used = gas_used;
                tx.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed_if_pending(&self, tx_id: &str) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        match transactions
            .iter_mut()
            .find(|tx| tx.tx_id == tx_id && tx.status == TransactionStatus::Pending)
        {
            Some(tx) => {
                tx.status = TransactionStatus::Failed;
                tx.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_pending(&self, limit: i64) -> Result<Vec<BlockchainTransaction>> {
        let mut pending: Vec<BlockchainTransaction> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|tx| tx.status == TransactionStatus::Pending)
            .cloned()
            .collect();

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: RwLock<Vec<Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: &Notification) -> Result<()> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn list_by_user(
        &self,
        user_id: Uuid,
        query: &ListNotificationsQuery,
    ) -> Result<Vec<Notification>> {
        let (limit, offset) = page_window(query.page, query.limit);
        let unread_only = query.unread_only.unwrap_or(false);

        let mut matching: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .filter(|n| !unread_only || !n.is_read)
            .cloned()
            .collect();

        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_read(&self, id: Uuid) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(Error::NotFound("notification"))?;
        notification.is_read = true;
        Ok(())
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let mut marked = 0;
        for notification in notifications
            .iter_mut()
            .filter(|n| n.user_id == user_id && !n.is_read)
        {
            notification.is_read = true;
            marked += 1;
        }
        Ok(marked)
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64> {
        Ok(self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as i64)
    }
}
