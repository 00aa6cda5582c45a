//! Waiting for sent transactions to be mined.

use std::time::Duration;

use alloy::{
    primitives::{Address, TxHash},
    rpc::types::Log,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    backend::ContractBackend,
    event::{DecodedEvent, EventSchema},
    BindingError, PendingTransaction,
};

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub hash: TxHash,
    pub success: bool,
    pub block_number: Option<u64>,
    /// Set for contract creations.
    pub contract_address: Option<Address>,
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Decodes the logs of `schema` in this receipt, optionally only those
    /// emitted by `emitter`.
    pub fn events(
        &self,
        schema: &EventSchema,
        emitter: Option<Address>,
    ) -> Result<Vec<DecodedEvent>, BindingError> {
        self.logs
            .iter()
            .filter(|log| emitter.map_or(true, |address| log.address() == address))
            .filter(|log| schema.is_anonymous() || log.topics().first() == Some(&schema.selector()))
            .map(|log| schema.decode_log(log))
            .collect()
    }
}

impl PendingTransaction {
    /// Polls for the receipt every `poll_interval`, starting immediately.
    /// A reverted transaction is a [`BindingError::TransactionFailed`].
    pub async fn wait(
        &self,
        backend: &dyn ContractBackend,
        poll_interval: Duration,
    ) -> Result<Receipt, BindingError> {
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        loop {
            ticker.tick().await;
            match backend.transaction_receipt(self.hash).await? {
                Some(receipt) if receipt.success => {
                    debug!(hash = %self.hash, block = ?receipt.block_number, "Transaction mined");
                    return Ok(receipt);
                }
                Some(_) => return Err(BindingError::TransactionFailed(self.hash)),
                None => debug!(hash = %self.hash, "Transaction not mined yet"),
            }
        }
    }
}
