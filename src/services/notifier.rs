//! Notification fan-out.
//!
//! Translates order lifecycle events into persisted per-user notification
//! records. Invariant: a user's unread count always equals the number of
//! their notifications with `is_read = false`.

use std::sync::Arc;

use uuid::Uuid;

use crate::errors::Result;
use crate::notifications::{
    ListNotificationsQuery, Notification, NotificationPriority, NotificationType,
};
use crate::orders::{Order, OrderEvent, OrderStatus};
use crate::store::NotificationStore;

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Fans an event out to the affected users.
    pub async fn publish(&self, event: &OrderEvent, order: &Order) -> Result<()> {
        match event {
            OrderEvent::Created { .. } => {
                self.store
                    .create(
                        &Notification::new(
                            order.farmer_id,
                            NotificationType::Order,
                            "New Order Received",
                            format!(
                                "Order {} has been placed for {} items",
                                order.order_number,
                                order.items.len()
                            ),
                        )
                        .with_priority(NotificationPriority::High)
                        .with_action_url(format!("/orders/{}", order.id)),
                    )
                    .await?;
            }
            OrderEvent::StatusChanged { from, to, .. } => {
                let notification_type = match to {
                    OrderStatus::Shipped | OrderStatus::Delivered => NotificationType::Delivery,
                    _ => NotificationType::Order,
                };
                let message = format!(
                    "Order {} moved from {} to {}",
                    order.order_number, from, to
                );

                for user_id in [order.buyer_id, order.farmer_id] {
                    self.store
                        .create(
                            &Notification::new(
                                user_id,
                                notification_type,
                                "Order Status Updated",
                                message.clone(),
                            )
                            .with_action_url(format!("/orders/{}", order.id)),
                        )
                        .await?;
                }
            }
            OrderEvent::SettlementConfirmed { tx_id, .. } => {
                let message = format!(
                    "Payment for order {} was confirmed on-chain (transaction {})",
                    order.order_number, tx_id
                );

                for user_id in [order.buyer_id, order.farmer_id] {
                    self.store
                        .create(
                            &Notification::new(
                                user_id,
                                NotificationType::Payment,
                                "Transaction Confirmed",
                                message.clone(),
                            )
                            .with_action_url(format!("/orders/{}", order.id)),
                        )
                        .await?;
                }
            }
            OrderEvent::SettlementFailed { tx_id, .. } => {
                // Financial state is never auto-corrected beyond the confirm
                // path; the farmer decides what happens next.
                self.store
                    .create(
                        &Notification::new(
                            order.farmer_id,
                            NotificationType::Payment,
                            "Transaction Failed",
                            format!(
                                "Settlement transaction {} for order {} failed on-chain",
                                tx_id, order.order_number
                            ),
                        )
                        .with_priority(NotificationPriority::High)
                        .with_action_url(format!("/orders/{}", order.id)),
                    )
                    .await?;
            }
        }

        tracing::info!(order_id = %order.id, event = ?event, "notifications published");
        Ok(())
    }

    pub async fn list(
        &self,
        user_id: Uuid,
        query: &ListNotificationsQuery,
    ) -> Result<Vec<Notification>> {
        self.store.list_by_user(user_id, query).await
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<()> {
        self.store.mark_read(id).await
    }

    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        self.store.mark_all_read(user_id).await
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.store.count_unread(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ListNotificationsQuery;
    use crate::store::memory::MemoryNotificationStore;

    fn service() -> NotificationService {
        NotificationService::new(Arc::new(MemoryNotificationStore::new()))
    }

    async fn seed(service: &NotificationService, user_id: Uuid, count: usize) -> Vec<Uuid> {
        let mut ids = Vec::new();
        for i in 0..count {
            let notification = Notification::new(
                user_id,
                NotificationType::System,
                "Test",
                format!("message {i}"),
            );
            ids.push(notification.id);
            service.store.create(&notification).await.unwrap();
        }
        ids
    }

    #[tokio::test]
    async fn unread_count_matches_unread_listing() {
        let service = service();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ids = seed(&service, user, 5).await;
        seed(&service, other, 2).await;

        service.mark_read(ids[0]).await.unwrap();
        service.mark_read(ids[3]).await.unwrap();

        let unread = service
            .list(
                user,
                &ListNotificationsQuery {
                    unread_only: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(service.unread_count(user).await.unwrap(), 3);
        assert_eq!(unread.len(), 3);
        assert_eq!(service.unread_count(other).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let service = service();
        let user = Uuid::new_v4();
        let ids = seed(&service, user, 2).await;

        service.mark_read(ids[0]).await.unwrap();
        service.mark_read(ids[0]).await.unwrap();
        assert_eq!(service.unread_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_all_read_clears_only_that_user() {
        let service = service();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();
        let ids = seed(&service, user, 4).await;
        seed(&service, other, 3).await;

        service.mark_read(ids[1]).await.unwrap();
        let marked = service.mark_all_read(user).await.unwrap();

        assert_eq!(marked, 3);
        assert_eq!(service.unread_count(user).await.unwrap(), 0);
        assert_eq!(service.unread_count(other).await.unwrap(), 3);

        // A notification created after the bulk read legitimately stays
        // unread.
        seed(&service, user, 1).await;
        assert_eq!(service.unread_count(user).await.unwrap(), 1);
    }
}
