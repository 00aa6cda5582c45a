//! The chain access a bound contract needs, and its implementation on top of
//! an alloy provider.

use std::{future::Future, marker::PhantomData, time::Duration};

use alloy::{
    eips::BlockId,
    network::Ethereum,
    primitives::{Address, Bytes, TxHash},
    providers::Provider,
    rpc::types::{Filter, FilterBlockOption, Log, TransactionRequest},
    transports::Transport,
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    subscription::{LogStream, QuitSignal, Subscription},
    BindingError, Receipt,
};

/// Default number of blocks requested per `eth_getLogs` call.
pub const DEFAULT_BLOCKS_BATCH_SIZE: u64 = 500;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LOG_BUFFER: usize = 256;

/// Chain operations used by contract bindings.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContractBackend: Send + Sync {
    /// Returns the code deployed at `address`.
    async fn code_at(&self, address: Address, block: BlockId) -> Result<Bytes, BindingError>;

    /// Executes a read-only message call.
    async fn call_contract(
        &self,
        tx: TransactionRequest,
        block: BlockId,
    ) -> Result<Bytes, BindingError>;

    /// Returns the next nonce for `account`, counting pending transactions.
    async fn pending_nonce(&self, account: Address) -> Result<u64, BindingError>;

    async fn suggest_gas_price(&self) -> Result<u128, BindingError>;

    async fn estimate_gas(&self, tx: TransactionRequest) -> Result<u64, BindingError>;

    /// Hands a fully populated transaction to the node for signing and
    /// broadcast.
    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, BindingError>;

    /// Returns the receipt of a mined transaction, `None` while it is pending.
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, BindingError>;

    async fn block_number(&self) -> Result<u64, BindingError>;

    /// Runs a historical log query.
    async fn filter_logs(&self, filter: Filter) -> Result<Vec<Log>, BindingError>;

    /// Starts a live log feed for `filter`.
    async fn watch_logs(&self, filter: Filter) -> Result<LogStream, BindingError>;
}

/// [`ContractBackend`] backed by an alloy [`Provider`].
pub struct AlloyBackend<P, T> {
    provider: P,
    poll_interval: Duration,
    log_buffer: usize,
    blocks_batch_size: u64,
    _transport: PhantomData<fn() -> T>,
}

impl<P, T> AlloyBackend<P, T>
where
    P: Provider<T, Ethereum>,
    T: Transport + Clone,
{
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
            log_buffer: DEFAULT_LOG_BUFFER,
            blocks_batch_size: DEFAULT_BLOCKS_BATCH_SIZE,
            _transport: PhantomData,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_log_buffer(mut self, size: usize) -> Self {
        self.log_buffer = size.max(1);
        self
    }

    pub fn with_blocks_batch_size(mut self, size: u64) -> Self {
        self.blocks_batch_size = size.max(1);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

/// Splits the inclusive range `from..=to` into consecutive chunks of at most
/// `batch` blocks.
pub(crate) fn block_batches(from: u64, to: u64, batch: u64) -> Vec<(u64, u64)> {
    let batch = batch.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(batch - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Runs `fetch` over consecutive block ranges covering `from..=to` and
/// concatenates the results in order. Stops at the first error.
pub(crate) async fn fetch_in_batches<F, Fut>(
    from: u64,
    to: u64,
    batch: u64,
    mut fetch: F,
) -> Result<Vec<Log>, BindingError>
where
    F: FnMut(u64, u64) -> Fut,
    Fut: Future<Output = Result<Vec<Log>, BindingError>>,
{
    let mut logs = Vec::new();
    for (start, end) in block_batches(from, to, batch) {
        debug!("Fetching logs for blocks {} to {}", start, end);
        logs.extend(fetch(start, end).await?);
    }
    Ok(logs)
}

/// Delivers `backfill` and then every batch from `live` into `tx` until quit
/// is signalled or the receiver goes away. The live stream ending is an
/// error: a filter poller never finishes on its own.
pub(crate) async fn forward_logs<S>(
    backfill: Vec<Log>,
    mut live: S,
    tx: mpsc::Sender<Log>,
    mut quit: QuitSignal,
) -> Result<(), BindingError>
where
    S: Stream<Item = Vec<Log>> + Unpin,
{
    for log in backfill {
        tokio::select! {
            sent = tx.send(log) => if sent.is_err() { return Ok(()) },
            _ = &mut quit => return Ok(()),
        }
    }

    loop {
        tokio::select! {
            _ = &mut quit => {
                debug!("Log watcher unsubscribed");
                return Ok(());
            }
            batch = live.next() => {
                let Some(batch) = batch else {
                    warn!("Log poller stopped");
                    return Err(BindingError::SubscriptionClosed(
                        "log filter poller stopped".to_string(),
                    ));
                };
                for log in batch {
                    tokio::select! {
                        sent = tx.send(log) => if sent.is_err() { return Ok(()) },
                        _ = &mut quit => return Ok(()),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<P, T> ContractBackend for AlloyBackend<P, T>
where
    P: Provider<T, Ethereum> + Send + Sync,
    T: Transport + Clone,
{
    async fn code_at(&self, address: Address, block: BlockId) -> Result<Bytes, BindingError> {
        self.provider
            .get_code_at(address)
            .block_id(block)
            .await
            .map_err(BindingError::backend)
    }

    async fn call_contract(
        &self,
        tx: TransactionRequest,
        block: BlockId,
    ) -> Result<Bytes, BindingError> {
        self.provider
            .call(&tx)
            .block(block)
            .await
            .map_err(BindingError::backend)
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, BindingError> {
        self.provider
            .get_transaction_count(account)
            .block_id(BlockId::pending())
            .await
            .map_err(BindingError::backend)
    }

    async fn suggest_gas_price(&self) -> Result<u128, BindingError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(BindingError::backend)
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> Result<u64, BindingError> {
        self.provider
            .estimate_gas(&tx)
            .await
            .map_err(BindingError::backend)
    }

    async fn send_transaction(&self, tx: TransactionRequest) -> Result<TxHash, BindingError> {
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(BindingError::backend)?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, BindingError> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(BindingError::backend)?;

        Ok(receipt.map(|receipt| Receipt {
            hash: receipt.transaction_hash,
            success: receipt.inner.status(),
            block_number: receipt.block_number,
            contract_address: receipt.contract_address,
            logs: receipt.inner.logs().to_vec(),
        }))
    }

    async fn block_number(&self) -> Result<u64, BindingError> {
        self.provider
            .get_block_number()
            .await
            .map_err(BindingError::backend)
    }

    async fn filter_logs(&self, filter: Filter) -> Result<Vec<Log>, BindingError> {
        let Some(from) = filter.get_from_block() else {
            return self
                .provider
                .get_logs(&filter)
                .await
                .map_err(BindingError::backend);
        };
        let to = match filter.get_to_block() {
            Some(to) => to,
            None => self.block_number().await?,
        };

        fetch_in_batches(from, to, self.blocks_batch_size, |start, end| {
            let batch = filter.clone().from_block(start).to_block(end);
            async move {
                self.provider
                    .get_logs(&batch)
                    .await
                    .map_err(BindingError::backend)
            }
        })
        .await
    }

    async fn watch_logs(&self, filter: Filter) -> Result<LogStream, BindingError> {
        // Install the live filter first so nothing mined during the backfill
        // is missed. It only reports logs from new blocks.
        let mut live = filter.clone();
        live.block_option = FilterBlockOption::default();
        let poller = self
            .provider
            .watch_logs(&live)
            .await
            .map_err(BindingError::backend)?
            .with_poll_interval(self.poll_interval);

        let backfill = if filter.get_from_block().is_some() {
            self.filter_logs(filter.clone()).await?
        } else {
            Vec::new()
        };

        let (tx, rx) = mpsc::channel(self.log_buffer);
        info!(
            "Watching logs with a {:?} poll interval ({} historical)",
            self.poll_interval,
            backfill.len()
        );

        let sub = Subscription::new(move |quit| {
            forward_logs(backfill, Box::pin(poller.into_stream()), tx, quit)
        });

        Ok(LogStream::new(rx, sub))
    }
}
