//! Settlement oracle client.
//!
//! The chain itself is an external collaborator; this module only knows how
//! to ask it about a transaction. Any transport or decoding failure is
//! reported as an `OracleError` and must never be turned into a state write.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::settlement::TransactionStatus;

/// What the chain currently knows about a settlement transaction.
#[derive(Debug, Clone, Copy)]
pub struct TxReceipt {
    pub status: TransactionStatus,
    pub block_number: Option<i64>,
    pub gas_used: Option<i64>,
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Transport(String),
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

/// External settlement source queried during verification.
#[async_trait]
pub trait SettlementOracle: Send + Sync {
    async fn query_transaction(&self, tx_id: &str) -> Result<TxReceipt, OracleError>;
}

/// JSON-RPC oracle client for a chain node or explorer endpoint.
pub struct RpcOracle {
    rpc_url: String,
    http: reqwest::Client,
}

impl RpcOracle {
    pub fn new(rpc_url: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { rpc_url, http }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, reqwest::Error> {
        self.http
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": "agrovault-settlement",
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

#[async_trait]
impl SettlementOracle for RpcOracle {
    async fn query_transaction(&self, tx_id: &str) -> Result<TxReceipt, OracleError> {
        let response = self
            .rpc_call("getTransaction", json!({ "hash": tx_id }))
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))?;

        let status = response
            .pointer("/result/status")
            .and_then(|value| value.as_str())
            .ok_or_else(|| OracleError::Malformed("missing transaction status".to_string()))?;

        let status = match status {
            "SUCCESS" => TransactionStatus::Confirmed,
            "FAILED" => TransactionStatus::Failed,
            // The chain may simply not have seen the transaction yet.
            "PENDING" | "NOT_FOUND" => TransactionStatus::Pending,
            other => {
                return Err(OracleError::Malformed(format!(
                    "unknown transaction status {other:?}"
                )))
            }
        };

        let block_number = response
            .pointer("/result/ledger")
            .or_else(|| response.pointer("/result/blockNumber"))
            .and_then(|value| value.as_i64());

        let gas_used = response
            .pointer("/result/gasUsed")
            .or_else(|| response.pointer("/result/feeCharged"))
            .and_then(|value| value.as_i64());

        Ok(TxReceipt {
            status,
            block_number,
            gas_used,
        })
    }
}
