//! Background confirmation watcher.
//!
//! Repeatedly re-verifies pending settlement transactions against the oracle.
//! Each cycle is just a batch of `verify` calls; all idempotence guarantees
//! live in the settlement service, so overlapping delivery paths (webhook,
//! manual retry, this loop) stay safe.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::errors::{Error, Result};
use crate::services::SettlementService;
use crate::settlement::TransactionStatus;
use crate::store::TransactionStore;

#[derive(Debug)]
pub enum StartError {
    Disabled,
}

pub struct ConfirmationWatcher {
    transactions: Arc<dyn TransactionStore>,
    settlement: Arc<SettlementService>,
    poll_interval: Duration,
    batch_size: i64,
}

impl ConfirmationWatcher {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        settlement: Arc<SettlementService>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            transactions,
            settlement,
            poll_interval,
            batch_size,
        }
    }

    pub async fn start(self) -> std::result::Result<(), StartError> {
        if self.poll_interval.is_zero() {
            return Err(StartError::Disabled);
        }

        info!("settlement confirmation watcher started");

        loop {
            if let Err(err) = self.poll_once().await {
                error!(error = %err, "confirmation poll cycle failed");
            }

            sleep(self.poll_interval).await;
        }
    }

    async fn poll_once(&self) -> Result<()> {
        let pending = self.transactions.list_pending(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(());
        }

        for transaction in &pending {
            match self.settlement.verify(&transaction.tx_id).await {
                Ok(updated) if updated.status != TransactionStatus::Pending => {
                    info!(tx_id = %updated.tx_id, status = %updated.status, "settlement transaction resolved");
                }
                Ok(_) => {}
                Err(Error::OracleUnavailable(detail)) => {
                    // Transient; the transaction stays pending and the next
                    // cycle retries it.
                    warn!(tx_id = %transaction.tx_id, detail = %detail, "oracle unavailable");
                }
                Err(err) => {
                    error!(tx_id = %transaction.tx_id, error = %err, "verification failed");
                }
            }
        }

        debug!(checked = pending.len(), "confirmation poll cycle complete");
        Ok(())
    }
}
