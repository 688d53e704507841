//! Blockchain confirmation tracker.
//!
//! Advances settlement state independently of the order-status graph.
//! Verification is idempotent: polling, webhooks, and manual retries may all
//! call `verify` for the same transaction without double-applying anything.

use std::sync::Arc;

use uuid::Uuid;

use crate::auth::ActorContext;
use crate::errors::{Error, Result};
use crate::models::ActorRole;
use crate::oracle::SettlementOracle;
use crate::orders::{Order, OrderEvent, PaymentStatus, SettlementStatus};
use crate::settlement::{BlockchainTransaction, RecordSubmissionRequest, TransactionStatus};
use crate::store::{OrderStore, TransactionStore};

use super::NotificationService;

/// How often a settlement-side order update retries when a status transition
/// races it. The mutation is re-derived from a fresh read each attempt.
const MAX_SAVE_ATTEMPTS: usize = 3;

pub struct SettlementService {
    orders: Arc<dyn OrderStore>,
    transactions: Arc<dyn TransactionStore>,
    oracle: Arc<dyn SettlementOracle>,
    notifier: Arc<NotificationService>,
}

impl SettlementService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        transactions: Arc<dyn TransactionStore>,
        oracle: Arc<dyn SettlementOracle>,
        notifier: Arc<NotificationService>,
    ) -> Self {
        Self {
            orders,
            transactions,
            oracle,
            notifier,
        }
    }

    /// Records a settlement submission for an order. Rejected while an active
    /// (pending or confirmed) attempt exists; a failed attempt may be
    /// superseded.
    pub async fn record_submission(
        &self,
        order_id: Uuid,
        actor: ActorContext,
        request: RecordSubmissionRequest,
    ) -> Result<BlockchainTransaction> {
        let order = self.orders.get(order_id).await?;

        match actor.role {
            ActorRole::Buyer if order.buyer_id != actor.user_id => {
                return Err(Error::Unauthorized(format!(
                    "buyer does not own order {order_id}"
                )))
            }
            ActorRole::Farmer => {
                return Err(Error::Unauthorized(
                    "farmers cannot submit settlement transactions".to_string(),
                ))
            }
            _ => {}
        }

        if let Some(active) = self.transactions.active_for_order(order_id).await? {
            return Err(Error::Conflict(format!(
                "order {} already has an active settlement transaction {}",
                order_id, active.tx_id
            )));
        }

        let transaction =
            BlockchainTransaction::new(order_id, request.tx_id.clone(), request.hash.clone());
        self.transactions.insert(&transaction).await?;

        self.update_order(order_id, |order| {
            order.blockchain_tx_id = Some(request.tx_id.clone());
            order.blockchain_hash = Some(request.hash.clone());
            order.blockchain_status = SettlementStatus::Pending;
        })
        .await?;

        tracing::info!(order_id = %order_id, tx_id = %transaction.tx_id, "settlement submission recorded");
        Ok(transaction)
    }

    /// Checks the transaction against the settlement oracle and applies the
    /// observed state at most once.
    ///
    /// An already-terminal transaction short-circuits without touching the
    /// oracle. An oracle failure leaves all stored state untouched and is
    /// retryable.
    pub async fn verify(&self, tx_id: &str) -> Result<BlockchainTransaction> {
        let transaction = self.transactions.get_by_tx_id(tx_id).await?;

        if transaction.status.is_terminal() {
            tracing::debug!(tx_id = %tx_id, status = %transaction.status, "transaction already resolved");
            return Ok(transaction);
        }

        let receipt = self.oracle.query_transaction(tx_id).await?;

        match receipt.status {
            TransactionStatus::Pending => Ok(transaction),
            TransactionStatus::Confirmed => {
                let applied = self
                    .transactions
                    .mark_confirmed_if_pending(tx_id, receipt.block_number, receipt.gas_used)
                    .await?;

                if applied {
                    let order = self
                        .update_order(transaction.order_id, |order| {
                            order.blockchain_status = SettlementStatus::Verified;
                            if Self::should_mark_paid(order) {
                                order.payment_status = PaymentStatus::Paid;
                            }
                        })
                        .await?;

                    self.notifier
                        .publish(
                            &OrderEvent::SettlementConfirmed {
                                order_id: order.id,
                                tx_id: tx_id.to_string(),
                            },
                            &order,
                        )
                        .await?;

                    tracing::info!(
                        tx_id = %tx_id,
                        order_id = %order.id,
                        block_number = ?receipt.block_number,
                        "settlement transaction confirmed"
                    );
                }

                self.transactions.get_by_tx_id(tx_id).await
            }
            TransactionStatus::Failed => {
                let applied = self.transactions.mark_failed_if_pending(tx_id).await?;

                if applied {
                    // The order is not cancelled here; a failed settlement is
                    // surfaced for a human decision.
                    let order = self
                        .update_order(transaction.order_id, |order| {
                            order.blockchain_status = SettlementStatus::Failed;
                        })
                        .await?;

                    self.notifier
                        .publish(
                            &OrderEvent::SettlementFailed {
                                order_id: order.id,
                                tx_id: tx_id.to_string(),
                            },
                            &order,
                        )
                        .await?;

                    tracing::warn!(tx_id = %tx_id, order_id = %order.id, "settlement transaction failed");
                }

                self.transactions.get_by_tx_id(tx_id).await
            }
        }
    }

    /// Whether a confirmed settlement promotes the payment to `paid`: only
    /// for on-chain methods, and never over a manual refund/failure override.
    fn should_mark_paid(order: &Order) -> bool {
        order.payment_method.settles_on_chain()
            && !matches!(
                order.payment_status,
                PaymentStatus::Refunded | PaymentStatus::Failed
            )
    }

    async fn update_order<F>(&self, order_id: Uuid, mutate: F) -> Result<Order>
    where
        F: Fn(&mut Order),
    {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut order = self.orders.get(order_id).await?;
            mutate(&mut order);
            order.touch();

            match self.orders.save(&order).await {
                Ok(stored) => return Ok(stored),
                Err(Error::Conflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(Error::Conflict(format!(
            "order {order_id} kept changing while applying settlement state"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::oracle::{OracleError, TxReceipt};
    use crate::orders::{
        CreateOrderItem, CreateOrderRequest, OrderStatus, PaymentMethod, ShippingAddress,
    };
    use crate::store::memory::{
        MemoryNotificationStore, MemoryOrderStore, MemoryTransactionStore,
    };

    type OracleResult = std::result::Result<TxReceipt, OracleError>;

    /// Oracle that serves a scripted receipt once and counts calls; after the
    /// script is consumed it reports the transaction as still pending.
    struct ScriptedOracle {
        receipt: Mutex<Option<OracleResult>>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn confirming(block_number: i64) -> Self {
            Self::with(Ok(TxReceipt {
                status: TransactionStatus::Confirmed,
                block_number: Some(block_number),
                gas_used: Some(21000),
            }))
        }

        fn with(receipt: OracleResult) -> Self {
            Self {
                receipt: Mutex::new(Some(receipt)),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SettlementOracle for ScriptedOracle {
        async fn query_transaction(&self, _tx_id: &str) -> OracleResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.receipt
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Ok(TxReceipt {
                    status: TransactionStatus::Pending,
                    block_number: None,
                    gas_used: None,
                }))
        }
    }

    struct Fixture {
        orders: Arc<MemoryOrderStore>,
        service: SettlementService,
        notifier: Arc<NotificationService>,
        order: Order,
    }

    async fn fixture(oracle: Arc<ScriptedOracle>, method: PaymentMethod) -> Fixture {
        let orders = Arc::new(MemoryOrderStore::new());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let notifier = Arc::new(NotificationService::new(Arc::new(
            MemoryNotificationStore::new(),
        )));
        let service = SettlementService::new(
            orders.clone(),
            transactions,
            oracle,
            notifier.clone(),
        );

        let order = Order::new(
            Uuid::new_v4(),
            CreateOrderRequest {
                farmer_id: Uuid::new_v4(),
                items: vec![CreateOrderItem {
                    product_id: Uuid::new_v4(),
                    product_name: "Turmeric".to_string(),
                    quantity: 5,
                    unit_price: 900,
                }],
                payment_method: method,
                shipping_address: ShippingAddress {
                    street: "2 Farm Gate".to_string(),
                    city: "Salem".to_string(),
                    state: "TN".to_string(),
                    zip: "636001".to_string(),
                    country: "IN".to_string(),
                },
            },
        );
        orders.insert(&order).await.unwrap();

        Fixture {
            orders,
            service,
            notifier,
            order,
        }
    }

    fn system_actor() -> ActorContext {
        ActorContext {
            user_id: Uuid::new_v4(),
            role: ActorRole::System,
        }
    }

    fn submission() -> RecordSubmissionRequest {
        RecordSubmissionRequest {
            tx_id: "tx-100".to_string(),
            hash: "0xfeed".to_string(),
        }
    }

    #[tokio::test]
    async fn confirmed_settlement_marks_upi_order_paid() {
        let oracle = Arc::new(ScriptedOracle::confirming(4821));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();
        let verified = fx.service.verify("tx-100").await.unwrap();

        assert_eq!(verified.status, TransactionStatus::Confirmed);
        assert_eq!(verified.block_number, Some(4821));

        let order = fx.orders.get(fx.order.id).await.unwrap();
        assert_eq!(order.blockchain_status, SettlementStatus::Verified);
        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.blockchain_tx_id.as_deref(), Some("tx-100"));

        // One notification each for buyer and farmer.
        assert_eq!(fx.notifier.unread_count(order.buyer_id).await.unwrap(), 1);
        assert_eq!(fx.notifier.unread_count(order.farmer_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn second_verify_is_a_noop_without_an_oracle_call() {
        let oracle = Arc::new(ScriptedOracle::confirming(77));
        let fx = fixture(oracle.clone(), PaymentMethod::Wallet).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();

        fx.service.verify("tx-100").await.unwrap();
        let second = fx.service.verify("tx-100").await.unwrap();

        assert_eq!(second.status, TransactionStatus::Confirmed);
        assert_eq!(oracle.calls(), 1, "terminal transactions skip the oracle");

        let order = fx.orders.get(fx.order.id).await.unwrap();
        // Still exactly one confirmation notification per user.
        assert_eq!(fx.notifier.unread_count(order.buyer_id).await.unwrap(), 1);
        assert_eq!(fx.notifier.unread_count(order.farmer_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cod_orders_are_never_promoted_to_paid() {
        let oracle = Arc::new(ScriptedOracle::confirming(9));
        let fx = fixture(oracle, PaymentMethod::Cod).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();
        fx.service.verify("tx-100").await.unwrap();

        let order = fx.orders.get(fx.order.id).await.unwrap();
        assert_eq!(order.blockchain_status, SettlementStatus::Verified);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn refunded_override_survives_confirmation() {
        let oracle = Arc::new(ScriptedOracle::confirming(12));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();

        // Manual override lands before the chain confirms.
        let mut order = fx.orders.get(fx.order.id).await.unwrap();
        order.payment_status = PaymentStatus::Refunded;
        fx.orders.save(&order).await.unwrap();

        fx.service.verify("tx-100").await.unwrap();

        let order = fx.orders.get(fx.order.id).await.unwrap();
        assert_eq!(order.blockchain_status, SettlementStatus::Verified);
        assert_eq!(order.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn oracle_outage_leaves_state_untouched() {
        let oracle = Arc::new(ScriptedOracle::with(Err(OracleError::Transport(
            "connection timed out".to_string(),
        ))));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();

        let err = fx.service.verify("tx-100").await.unwrap_err();
        assert!(matches!(err, Error::OracleUnavailable(_)));

        let order = fx.orders.get(fx.order.id).await.unwrap();
        assert_eq!(order.blockchain_status, SettlementStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(fx.notifier.unread_count(order.buyer_id).await.unwrap(), 0);

        // The retry succeeds once the oracle recovers.
        let retried = fx.service.verify("tx-100").await.unwrap();
        assert_eq!(retried.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn failed_settlement_notifies_farmer_and_keeps_order_open() {
        let oracle = Arc::new(ScriptedOracle::with(Ok(TxReceipt {
            status: TransactionStatus::Failed,
            block_number: None,
            gas_used: None,
        })));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();
        let verified = fx.service.verify("tx-100").await.unwrap();

        assert_eq!(verified.status, TransactionStatus::Failed);

        let order = fx.orders.get(fx.order.id).await.unwrap();
        assert_eq!(order.blockchain_status, SettlementStatus::Failed);
        assert_eq!(order.status, OrderStatus::Pending, "order is not cancelled");
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(fx.notifier.unread_count(order.farmer_id).await.unwrap(), 1);
        assert_eq!(fx.notifier.unread_count(order.buyer_id).await.unwrap(), 0);

        // A failed attempt may be superseded by a fresh submission.
        fx.service
            .record_submission(
                fx.order.id,
                system_actor(),
                RecordSubmissionRequest {
                    tx_id: "tx-101".to_string(),
                    hash: "0xbeef".to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected_while_active() {
        let oracle = Arc::new(ScriptedOracle::confirming(1));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        fx.service
            .record_submission(fx.order.id, system_actor(), submission())
            .await
            .unwrap();

        let err = fx
            .service
            .record_submission(
                fx.order.id,
                system_actor(),
                RecordSubmissionRequest {
                    tx_id: "tx-200".to_string(),
                    hash: "0xdead".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn farmer_cannot_record_submissions() {
        let oracle = Arc::new(ScriptedOracle::confirming(1));
        let fx = fixture(oracle, PaymentMethod::Upi).await;

        let farmer = ActorContext {
            user_id: fx.order.farmer_id,
            role: ActorRole::Farmer,
        };
        let err = fx
            .service
            .record_submission(fx.order.id, farmer, submission())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }
}
