//! Settlement transaction models.
//!
//! One `BlockchainTransaction` record exists per settlement attempt; an order
//! has at most one active (non-failed) attempt at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// On-chain transaction status. `confirmed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A settlement attempt submitted to the chain for one order.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BlockchainTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tx_id: String,
    pub hash: String,
    pub status: TransactionStatus,
    pub block_number: Option<i64>,
    pub gas_used: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockchainTransaction {
    pub fn new(order_id: Uuid, tx_id: String, hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            tx_id,
            hash,
            status: TransactionStatus::Pending,
            block_number: None,
            gas_used: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request DTO for recording a settlement submission against an order.
#[derive(Debug, Deserialize, Validate)]
pub struct RecordSubmissionRequest {
    #[validate(length(min = 1))]
    pub tx_id: String,
    #[validate(length(min = 1))]
    pub hash: String,
}

/// Webhook payload from the settlement watcher/explorer. The carried status
/// is advisory only; verification always goes back to the oracle.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub tx_id: String,
    pub status: Option<TransactionStatus>,
}
