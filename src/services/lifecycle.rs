//! Order lifecycle service - the sole authority for mutating order status.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::ActorContext;
use crate::errors::{Error, Result};
use crate::models::ActorRole;
use crate::orders::{CreateOrderRequest, ListOrdersQuery, Order, OrderEvent, OrderStatus};
use crate::store::OrderStore;

use super::NotificationService;

/// Result of a transition request. A request for the state the order is
/// already in succeeds without touching anything.
#[derive(Debug)]
pub enum TransitionOutcome {
    Applied(Order),
    AlreadyInState(Order),
}

impl TransitionOutcome {
    pub fn into_order(self) -> Order {
        match self {
            Self::Applied(order) | Self::AlreadyInState(order) => order,
        }
    }
}

pub struct OrderLifecycleService {
    orders: Arc<dyn OrderStore>,
    notifier: Arc<NotificationService>,
}

impl OrderLifecycleService {
    pub fn new(orders: Arc<dyn OrderStore>, notifier: Arc<NotificationService>) -> Self {
        Self { orders, notifier }
    }

    /// Places a new order for `buyer_id` and notifies the farmer.
    pub async fn create_order(&self, buyer_id: Uuid, request: CreateOrderRequest) -> Result<Order> {
        let order = Order::new(buyer_id, request);
        self.orders.insert(&order).await?;

        self.notifier
            .publish(
                &OrderEvent::Created {
                    order_id: order.id,
                    buyer_id: order.buyer_id,
                    farmer_id: order.farmer_id,
                },
                &order,
            )
            .await?;

        tracing::info!(order_id = %order.id, order_number = %order.order_number, "order created");
        Ok(order)
    }

    /// Applies a requested status change after validating it against the
    /// transition graph and the actor's authority.
    ///
    /// Concurrent requests on the same order are linearized by the store's
    /// version check: the loser observes either `AlreadyInState` (when it
    /// requested the state that already won) or `Conflict`.
    pub async fn request_transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: ActorContext,
    ) -> Result<TransitionOutcome> {
        let order = self.orders.get(order_id).await?;
        self.check_ownership(&order, actor)?;

        if order.status == target {
            tracing::debug!(order_id = %order_id, status = %target, "transition already applied");
            return Ok(TransitionOutcome::AlreadyInState(order));
        }

        if !order.status.requestable_by(target, actor.role) {
            return Err(Error::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let mut updated = order;
        let previous = updated.status;
        updated.status = target;
        if target == OrderStatus::Delivered && updated.delivery_date.is_none() {
            updated.delivery_date = Some(chrono::Utc::now());
        }
        updated.touch();

        let stored = self.orders.save(&updated).await?;

        self.notifier
            .publish(
                &OrderEvent::StatusChanged {
                    order_id: stored.id,
                    from: previous,
                    to: target,
                },
                &stored,
            )
            .await?;

        tracing::info!(
            order_id = %order_id,
            from = %previous,
            to = %target,
            actor = actor.role.as_str(),
            "order status updated"
        );
        Ok(TransitionOutcome::Applied(stored))
    }

    /// The single legal next status for progression UIs. Pure with respect to
    /// the order's current status; terminal orders have none.
    pub async fn next_status(&self, order_id: Uuid) -> Result<Option<OrderStatus>> {
        let order = self.orders.get(order_id).await?;
        Ok(order.status.next_status())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.get(order_id).await
    }

    pub async fn list_orders(&self, query: &ListOrdersQuery) -> Result<Vec<Order>> {
        self.orders.list(query).await
    }

    /// Buyers and farmers may only act on their own orders.
    fn check_ownership(&self, order: &Order, actor: ActorContext) -> Result<()> {
        let owned = match actor.role {
            ActorRole::Buyer => order.buyer_id == actor.user_id,
            ActorRole::Farmer => order.farmer_id == actor.user_id,
            ActorRole::Admin | ActorRole::System => true,
        };
        if owned {
            Ok(())
        } else {
            Err(Error::Unauthorized(format!(
                "{} does not own order {}",
                actor.role.as_str(),
                order.id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::ListNotificationsQuery;
    use crate::orders::{CreateOrderItem, PaymentMethod, ShippingAddress};
    use crate::store::memory::{MemoryNotificationStore, MemoryOrderStore};

    struct Fixture {
        service: Arc<OrderLifecycleService>,
        notifier: Arc<NotificationService>,
        buyer: ActorContext,
        farmer: ActorContext,
    }

    fn fixture() -> Fixture {
        let buyer_id = Uuid::new_v4();
        let farmer_id = Uuid::new_v4();
        let notifier = Arc::new(NotificationService::new(Arc::new(
            MemoryNotificationStore::new(),
        )));
        let service = Arc::new(OrderLifecycleService::new(
            Arc::new(MemoryOrderStore::new()),
            notifier.clone(),
        ));

        Fixture {
            service,
            notifier,
            buyer: ActorContext {
                user_id: buyer_id,
                role: ActorRole::Buyer,
            },
            farmer: ActorContext {
                user_id: farmer_id,
                role: ActorRole::Farmer,
            },
        }
    }

    fn request(farmer_id: Uuid) -> CreateOrderRequest {
        CreateOrderRequest {
            farmer_id,
            items: vec![CreateOrderItem {
                product_id: Uuid::new_v4(),
                product_name: "Alphonso Mangoes".to_string(),
                quantity: 3,
                unit_price: 12000,
            }],
            payment_method: PaymentMethod::Upi,
            shipping_address: ShippingAddress {
                street: "44 Ridge Road".to_string(),
                city: "Nashik".to_string(),
                state: "MH".to_string(),
                zip: "422001".to_string(),
                country: "IN".to_string(),
            },
        }
    }

    async fn place_order(fx: &Fixture) -> Order {
        fx.service
            .create_order(fx.buyer.user_id, request(fx.farmer.user_id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn creating_an_order_notifies_the_farmer() {
        let fx = fixture();
        let order = place_order(&fx).await;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, 36000);
        assert_eq!(fx.notifier.unread_count(fx.farmer.user_id).await.unwrap(), 1);
        assert_eq!(fx.notifier.unread_count(fx.buyer.user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn buyer_cancels_pending_order() {
        let fx = fixture();
        let order = place_order(&fx).await;

        let outcome = fx
            .service
            .request_transition(order.id, OrderStatus::Cancelled, fx.buyer)
            .await
            .unwrap();

        let cancelled = outcome.into_order();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(fx.service.next_status(order.id).await.unwrap(), None);

        // Terminal: nothing leaves cancelled.
        let err = fx
            .service
            .request_transition(order.id, OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn buyer_cannot_cancel_shipped_order() {
        let fx = fixture();
        let order = place_order(&fx).await;

        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Shipped,
        ] {
            fx.service
                .request_transition(order.id, status, fx.farmer)
                .await
                .unwrap();
        }

        let err = fx
            .service
            .request_transition(order.id, OrderStatus::Cancelled, fx.buyer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: OrderStatus::Shipped,
                to: OrderStatus::Cancelled,
            }
        ));
    }

    #[tokio::test]
    async fn skipping_a_status_is_rejected() {
        let fx = fixture();
        let order = place_order(&fx).await;

        let err = fx
            .service
            .request_transition(order.id, OrderStatus::Shipped, fx.farmer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let current = fx.service.get_order(order.id).await.unwrap();
        assert_eq!(current.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn same_state_request_is_a_noop_success() {
        let fx = fixture();
        let order = place_order(&fx).await;

        fx.service
            .request_transition(order.id, OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap();
        let before = fx.service.get_order(order.id).await.unwrap();

        let outcome = fx
            .service
            .request_transition(order.id, OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap();

        assert!(matches!(outcome, TransitionOutcome::AlreadyInState(_)));
        let after = fx.service.get_order(order.id).await.unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn transition_notifies_buyer_and_farmer() {
        let fx = fixture();
        let order = place_order(&fx).await;

        fx.service
            .request_transition(order.id, OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap();

        // Farmer: order-created + status-changed; buyer: status-changed only.
        assert_eq!(fx.notifier.unread_count(fx.farmer.user_id).await.unwrap(), 2);
        assert_eq!(fx.notifier.unread_count(fx.buyer.user_id).await.unwrap(), 1);

        let buyer_inbox = fx
            .notifier
            .list(fx.buyer.user_id, &ListNotificationsQuery::default())
            .await
            .unwrap();
        assert!(buyer_inbox[0].message.contains("pending"));
        assert!(buyer_inbox[0].message.contains("confirmed"));
    }

    #[tokio::test]
    async fn delivery_stamps_the_delivery_date() {
        let fx = fixture();
        let order = place_order(&fx).await;
        assert!(order.delivery_date.is_none());

        for status in [
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
        ] {
            fx.service
                .request_transition(order.id, status, fx.farmer)
                .await
                .unwrap();
        }

        let delivered = fx.service.get_order(order.id).await.unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(delivered.delivery_date.is_some());
    }

    #[tokio::test]
    async fn strangers_cannot_touch_the_order() {
        let fx = fixture();
        let order = place_order(&fx).await;

        let other_buyer = ActorContext {
            user_id: Uuid::new_v4(),
            role: ActorRole::Buyer,
        };
        let err = fx
            .service
            .request_transition(order.id, OrderStatus::Cancelled, other_buyer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn racing_transitions_store_the_status_exactly_once() {
        let fx = fixture();
        let order = place_order(&fx).await;
        fx.service
            .request_transition(order.id, OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            fx.service
                .request_transition(order.id, OrderStatus::Preparing, fx.farmer),
            fx.service
                .request_transition(order.id, OrderStatus::Preparing, fx.farmer),
        );

        let results = [a, b];
        let applied = results
            .iter()
            .filter(|r| matches!(r, Ok(TransitionOutcome::Applied(_))))
            .count();
        let benign = results
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Ok(TransitionOutcome::AlreadyInState(_)) | Err(Error::Conflict(_))
                )
            })
            .count();

        assert_eq!(applied, 1, "exactly one request must win");
        assert_eq!(benign, 1, "the loser observes a no-op or a conflict");

        let stored = fx.service.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Preparing);
    }

    #[tokio::test]
    async fn missing_order_reports_not_found() {
        let fx = fixture();
        let err = fx
            .service
            .request_transition(Uuid::new_v4(), OrderStatus::Confirmed, fx.farmer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound("order")));
    }
}
