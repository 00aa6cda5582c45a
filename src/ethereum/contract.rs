use std::sync::Arc;

use alloy::{
    dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt},
    json_abi::{Function, JsonAbi},
    network::TransactionBuilder,
    primitives::{Address, Bytes},
    rpc::types::{Filter, Log, TransactionRequest},
    sol_types::SolEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    backend::ContractBackend,
    event::{DecodedEvent, EventSchema, SolEventDecoder},
    iterator::EventIterator,
    subscription::{LogStream, Subscription},
    BindingError, CallOpts, FilterOpts, PendingTransaction, Receipt, TransactOpts, WatchOpts,
};

/// A contract ABI bound to an address on some backend.
#[derive(Clone)]
pub struct BoundContract {
    address: Address,
    abi: Arc<JsonAbi>,
    backend: Arc<dyn ContractBackend>,
}

impl std::fmt::Debug for BoundContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundContract")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl BoundContract {
    pub fn new(address: Address, abi: Arc<JsonAbi>, backend: Arc<dyn ContractBackend>) -> Self {
        Self {
            address,
            abi,
            backend,
        }
    }

    /// Binds an ABI given as a JSON array.
    pub fn from_json(
        address: Address,
        abi_json: &str,
        backend: Arc<dyn ContractBackend>,
    ) -> Result<Self, BindingError> {
        let abi: JsonAbi = serde_json::from_str(abi_json)?;
        Ok(Self::new(address, Arc::new(abi), backend))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// Looks up a method by name, or by full signature such as
    /// `transfer(address,uint256)` to pick one overload.
    pub fn function(&self, method: &str) -> Result<&Function, BindingError> {
        let found = if method.contains('(') {
            self.abi.functions().find(|f| f.signature() == method)
        } else {
            self.abi.function(method).and_then(|overloads| overloads.first())
        };
        found.ok_or_else(|| BindingError::UnknownMethod(method.to_string()))
    }

    /// Like [`BoundContract::function`], for events.
    pub fn event_schema(&self, event: &str) -> Result<EventSchema, BindingError> {
        let descriptor = if event.contains('(') {
            self.abi.events().find(|e| e.signature() == event)
        } else {
            self.abi.event(event).and_then(|overloads| overloads.first())
        };
        let descriptor = descriptor.ok_or_else(|| BindingError::UnknownEvent(event.to_string()))?;
        EventSchema::from_event(descriptor)
    }

    /// Invokes a constant method and unpacks its outputs.
    pub async fn call(
        &self,
        opts: &CallOpts,
        method: &str,
        params: &[DynSolValue],
    ) -> Result<Vec<DynSolValue>, BindingError> {
        let function = self.function(method)?;
        let input = encode_input(function, params)?;

        let mut tx = TransactionRequest::default()
            .with_to(self.address)
            .with_input(input);
        if let Some(from) = opts.from {
            tx = tx.with_from(from);
        }

        let block = opts.block_id();
        debug!(contract = %self.address, method, ?block, "Calling contract");
        let output = self.backend.call_contract(tx, block).await?;

        if output.is_empty() {
            // An empty answer usually means there is nothing at the address.
            let code = self.backend.code_at(self.address, block).await?;
            if code.is_empty() {
                return Err(BindingError::NoCode);
            }
        }

        function
            .abi_decode_output(&output, true)
            .map_err(|e| BindingError::DecodeOutput {
                name: method.to_string(),
                reason: e.to_string(),
            })
    }

    /// Invokes a paid method.
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        method: &str,
        params: &[DynSolValue],
    ) -> Result<PendingTransaction, BindingError> {
        let function = self.function(method)?;
        let input = encode_input(function, params)?;
        send(self.backend.as_ref(), opts, Some(self.address), input).await
    }

    /// Sends plain value to the contract, invoking its fallback function.
    pub async fn transfer(&self, opts: &TransactOpts) -> Result<PendingTransaction, BindingError> {
        send(self.backend.as_ref(), opts, Some(self.address), Bytes::new()).await
    }

    fn event_filter(
        &self,
        schema: &EventSchema,
        rules: &[Vec<DynSolValue>],
    ) -> Result<Filter, BindingError> {
        let topics = schema.topic_filter(rules)?;
        let mut filter = Filter::new().address(self.address);

        let offset = if schema.is_anonymous() {
            0
        } else {
            filter = filter.event_signature(schema.selector());
            1
        };
        if offset + topics.len() > filter.topics.len() {
            return Err(BindingError::TooManyTopicRules {
                event: schema.name().to_string(),
                indexed: filter.topics.len() - offset,
                rules: topics.len(),
            });
        }
        for (i, values) in topics.into_iter().enumerate() {
            filter.topics[offset + i] = values.into();
        }
        Ok(filter)
    }

    /// Retrieves past `event` logs matching `rules`, one list of accepted
    /// values per indexed field. Empty lists match anything.
    pub async fn filter_logs(
        &self,
        opts: &FilterOpts,
        event: &str,
        rules: &[Vec<DynSolValue>],
    ) -> Result<EventIterator, BindingError> {
        let schema = self.event_schema(event)?;
        let filter = range(self.event_filter(&schema, rules)?, opts);

        debug!(contract = %self.address, event, start = opts.start, end = ?opts.end, "Filtering logs");
        let logs = self.backend.filter_logs(filter).await?;
        Ok(EventIterator::new(schema, LogStream::from_logs(logs)))
    }

    /// Like [`BoundContract::filter_logs`], decoding into the `sol!` type `E`.
    pub async fn filter_events<E: SolEvent>(
        &self,
        opts: &FilterOpts,
    ) -> Result<EventIterator<SolEventDecoder<E>>, BindingError> {
        let schema = self
            .abi
            .events()
            .find(|e| e.selector() == E::SIGNATURE_HASH)
            .ok_or_else(|| BindingError::UnknownEvent(E::SIGNATURE.to_string()))
            .and_then(EventSchema::from_event)?;
        let filter = range(self.event_filter(&schema, &[])?, opts);

        let logs = self.backend.filter_logs(filter).await?;
        Ok(EventIterator::new(
            SolEventDecoder::new(),
            LogStream::from_logs(logs),
        ))
    }

    /// Subscribes to future `event` logs matching `rules`.
    pub async fn watch_logs(
        &self,
        opts: &WatchOpts,
        event: &str,
        rules: &[Vec<DynSolValue>],
    ) -> Result<EventIterator, BindingError> {
        let schema = self.event_schema(event)?;
        let stream = self.watch_stream(&schema, opts, rules).await?;
        Ok(EventIterator::new(schema, stream))
    }

    async fn watch_stream(
        &self,
        schema: &EventSchema,
        opts: &WatchOpts,
        rules: &[Vec<DynSolValue>],
    ) -> Result<LogStream, BindingError> {
        let mut filter = self.event_filter(schema, rules)?;
        if let Some(start) = opts.start {
            filter = filter.from_block(start);
        }
        info!(contract = %self.address, event = schema.name(), "Subscribing to logs");
        self.backend.watch_logs(filter).await
    }

    /// Subscribes to future `event` logs and pushes them, decoded, into
    /// `sink`. The returned subscription fails on the first undecodable log.
    pub async fn watch_events(
        &self,
        opts: &WatchOpts,
        event: &str,
        rules: &[Vec<DynSolValue>],
        sink: mpsc::Sender<DecodedEvent>,
    ) -> Result<Subscription, BindingError> {
        let schema = self.event_schema(event)?;
        let LogStream { mut logs, mut sub } = self.watch_stream(&schema, opts, rules).await?;

        Ok(Subscription::new(move |mut quit| async move {
            loop {
                tokio::select! {
                    _ = &mut quit => {
                        sub.unsubscribe();
                        return Ok(());
                    }
                    log = logs.recv() => {
                        let Some(log) = log else {
                            return sub.err().await;
                        };
                        let event = schema.decode_log(&log)?;
                        tokio::select! {
                            sent = sink.send(event) => if sent.is_err() {
                                sub.unsubscribe();
                                return Ok(());
                            },
                            _ = &mut quit => {
                                sub.unsubscribe();
                                return Ok(());
                            }
                        }
                    }
                    result = sub.err() => {
                        result?;
                        while let Ok(log) = logs.try_recv() {
                            let event = schema.decode_log(&log)?;
                            if sink.send(event).await.is_err() {
                                break;
                            }
                        }
                        return Ok(());
                    }
                }
            }
        }))
    }

    /// Unpacks a raw log of `event` emitted by this contract.
    pub fn unpack_log(&self, event: &str, log: &Log) -> Result<DecodedEvent, BindingError> {
        self.event_schema(event)?.decode_log(log)
    }

    /// Decodes the logs this contract emitted in a mined transaction. Logs
    /// whose topic0 matches no event of the ABI are skipped.
    pub fn receipt_events(&self, receipt: &Receipt) -> Result<Vec<DecodedEvent>, BindingError> {
        let mut events = Vec::new();
        for log in receipt.logs.iter().filter(|log| log.address() == self.address) {
            let Some(topic) = log.topics().first() else {
                continue;
            };
            let Some(descriptor) = self
                .abi
                .events()
                .find(|e| !e.anonymous && e.selector() == *topic)
            else {
                debug!(topic = %topic, "Skipping log of an unknown event");
                continue;
            };
            events.push(EventSchema::from_event(descriptor)?.decode_log(log)?);
        }
        Ok(events)
    }
}

fn range(filter: Filter, opts: &FilterOpts) -> Filter {
    let filter = filter.from_block(opts.start);
    match opts.end {
        Some(end) => filter.to_block(end),
        None => filter,
    }
}

fn encode_input(function: &Function, params: &[DynSolValue]) -> Result<Bytes, BindingError> {
    function
        .abi_encode_input(params)
        .map(Bytes::from)
        .map_err(|e| BindingError::Encode {
            name: function.name.clone(),
            reason: e.to_string(),
        })
}

/// Fills in whatever `opts` leaves unset and submits the transaction. A
/// missing `to` creates a contract from `input`.
async fn send(
    backend: &dyn ContractBackend,
    opts: &TransactOpts,
    to: Option<Address>,
    input: Bytes,
) -> Result<PendingTransaction, BindingError> {
    let value = opts.value.unwrap_or_default();
    let nonce = match opts.nonce {
        Some(nonce) => nonce,
        None => backend.pending_nonce(opts.from).await?,
    };
    let gas_price = match opts.gas_price {
        Some(price) => price,
        None => backend.suggest_gas_price().await?,
    };

    let mut tx = TransactionRequest::default()
        .with_from(opts.from)
        .with_value(value)
        .with_gas_price(gas_price);
    tx = match to {
        Some(to) => tx.with_to(to).with_input(input),
        None => tx.with_deploy_code(input),
    };

    let gas_limit = match opts.gas_limit {
        Some(limit) => limit,
        None => {
            if let Some(to) = to {
                let code = backend.code_at(to, alloy::eips::BlockId::pending()).await?;
                if code.is_empty() {
                    return Err(BindingError::NoCode);
                }
            }
            backend.estimate_gas(tx.clone()).await?
        }
    };

    let tx = tx.with_nonce(nonce).with_gas_limit(gas_limit);
    let hash = backend.send_transaction(tx).await?;
    info!(%hash, from = %opts.from, ?to, nonce, gas_limit, gas_price, "Transaction sent");

    Ok(PendingTransaction {
        hash,
        from: opts.from,
        to,
        nonce,
        value,
        gas_limit,
        gas_price,
    })
}

/// Deploys a contract: `bytecode` followed by the encoded constructor
/// arguments. Returns the address the contract will live at.
pub async fn deploy_contract(
    opts: &TransactOpts,
    abi: Arc<JsonAbi>,
    bytecode: Bytes,
    params: &[DynSolValue],
    backend: Arc<dyn ContractBackend>,
) -> Result<(Address, PendingTransaction, BoundContract), BindingError> {
    let input = match abi.constructor() {
        Some(constructor) => {
            let args = constructor
                .abi_encode_input(params)
                .map_err(|e| BindingError::Encode {
                    name: "constructor".to_string(),
                    reason: e.to_string(),
                })?;
            let mut input = bytecode.to_vec();
            input.extend_from_slice(&args);
            Bytes::from(input)
        }
        None if params.is_empty() => bytecode,
        None => {
            return Err(BindingError::Encode {
                name: "constructor".to_string(),
                reason: format!("contract takes no arguments, got {}", params.len()),
            })
        }
    };

    let pending = send(backend.as_ref(), opts, None, input).await?;
    let address = opts.from.create(pending.nonce);
    info!(%address, hash = %pending.hash, "Contract deployment sent");

    Ok((address, pending, BoundContract::new(address, abi, backend)))
}
