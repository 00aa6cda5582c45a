//! Command handlers behind the `sonm-bindings` binary. Results are printed as
//! JSON on stdout; diagnostics go through `tracing`.

use std::{future::Future, io::Write, path::PathBuf, sync::Arc, time::Duration};

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    contracts::SonmContract,
    ethereum::{
        abi::{AbiResolver, AbiSource},
        codec::{dyn_sol_values_to_json, json_to_dyn_sol_value, json_to_params},
        provider::ProviderManager,
        utils, BoundContract, CallOpts, ContractBackend, DecodedEvent, EventIterator, EventSchema,
        FilterOpts, PendingTransaction, TransactOpts, WatchOpts,
    },
};

/// Which contract a command talks to.
#[derive(Debug, Clone, Default)]
pub struct Target {
    /// SONM contract name; selects the embedded ABI and, without an explicit
    /// address, the address configured for the network.
    pub contract: Option<String>,
    pub address: Option<String>,
    /// ABI document overriding every other source.
    pub abi_file: Option<PathBuf>,
}

/// Transaction overrides from the command line.
#[derive(Debug, Clone, Default)]
pub struct TxArgs {
    pub from: Option<String>,
    pub value: Option<String>,
    pub nonce: Option<u64>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    /// Wait for the transaction to be mined and report its receipt.
    pub wait: bool,
}

pub struct Commands {
    providers: ProviderManager,
    abi_resolver: AbiResolver,
    network: Option<String>,
}

impl Commands {
    pub fn new(providers: ProviderManager, network: Option<String>) -> Self {
        Self::with_abi_source(providers, network, AbiSource::default())
    }

    pub fn with_abi_source(
        providers: ProviderManager,
        network: Option<String>,
        abi_source: AbiSource,
    ) -> Self {
        Self {
            providers,
            abi_resolver: AbiResolver::new(abi_source),
            network,
        }
    }

    fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    fn backend(&self) -> Result<Arc<dyn ContractBackend>> {
        if let Some(network) = self.network() {
            utils::validate_network(network, &self.providers.get_available_networks())?;
        }
        self.providers.get_backend(self.network())
    }

    fn ensure_writes_allowed(&self) -> Result<()> {
        if !self.providers.config().security.allow_write_operations {
            return Err(anyhow!(
                "Write operations are disabled. Pass --allow-writes or set security.allow_write_operations"
            ));
        }
        Ok(())
    }

    fn address_of(&self, target: &Target) -> Result<Address> {
        if let Some(address) = &target.address {
            return utils::validate_address(address);
        }

        let name = target
            .contract
            .as_deref()
            .ok_or_else(|| anyhow!("Specify a contract with --contract NAME or --address ADDR"))?;
        let network = self.providers.get_network_config(self.network())?;
        configured_address(&network.contracts, name)
    }

    /// Resolves the target into a bound contract on the selected network.
    pub async fn bind(&mut self, target: &Target) -> Result<BoundContract> {
        let address = self.address_of(target)?;
        let address_str = format!("{:?}", address);
        // ABIs are cached per network, so the fallback must match the backend's.
        let network = self
            .network
            .clone()
            .unwrap_or_else(|| self.providers.config().default_network.clone());
        let network = Some(network.as_str());

        let abi = if let Some(path) = &target.abi_file {
            self.abi_resolver
                .add_abi_file(&address_str, network, path)
                .await?
        } else if let Some(name) = &target.contract {
            let contract: SonmContract = name.parse().map_err(|e: String| anyhow!(e))?;
            debug!("Bound {} at {}", contract, address_str);
            return Ok(contract.bind(address, self.backend()?)?);
        } else {
            self.abi_resolver
                .get_abi(&address_str, network)
                .await
                .map_err(|e| anyhow!(utils::interpret_abi_error(&e.to_string(), &address_str)))?
        };

        debug!("Bound contract at {}", address_str);
        Ok(BoundContract::new(address, Arc::new(abi), self.backend()?))
    }

    pub async fn call(
        &mut self,
        target: &Target,
        method: &str,
        params: &Value,
        opts: &CallOpts,
    ) -> Result<Value> {
        utils::validate_identifier(method)?;
        let contract = self.bind(target).await?;
        let function = contract.function(method)?;
        let args = json_to_params(&function.inputs, method, params)?;

        let outputs = contract
            .call(opts, method, &args)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        Ok(dyn_sol_values_to_json(&outputs))
    }

    async fn transact_opts(&self, args: &TxArgs) -> Result<TransactOpts> {
        let from = match &args.from {
            Some(from) => utils::validate_address(from)?,
            None => self.providers.signer_address().ok_or_else(|| {
                anyhow!(
                    "No sender account. Pass --from or set {}",
                    self.providers.config().security.private_key_env
                )
            })?,
        };

        let gas = &self.providers.get_network_config(self.network())?.gas;
        let gas_price = match args.gas_price {
            Some(price) => Some(price),
            None => match gas.max_gas_price {
                Some(max) => {
                    let suggested = self.backend()?.suggest_gas_price().await?;
                    Some(capped_gas_price(suggested, u128::from(max)))
                }
                None => None,
            },
        };

        Ok(TransactOpts {
            from,
            nonce: args.nonce,
            value: args.value.as_deref().map(utils::parse_wei).transpose()?,
            gas_price,
            gas_limit: args.gas_limit.or(gas.default_gas_limit),
        })
    }

    pub async fn send(
        &mut self,
        target: &Target,
        method: &str,
        params: &Value,
        args: &TxArgs,
    ) -> Result<Value> {
        self.ensure_writes_allowed()?;
        utils::validate_identifier(method)?;
        let contract = self.bind(target).await?;
        let function = contract.function(method)?;
        let inputs = json_to_params(&function.inputs, method, params)?;
        let opts = self.transact_opts(args).await?;

        let pending = contract
            .transact(&opts, method, &inputs)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        self.report(pending, &contract, args.wait).await
    }

    pub async fn transfer(&mut self, target: &Target, args: &TxArgs) -> Result<Value> {
        self.ensure_writes_allowed()?;
        let contract = self.bind(target).await?;
        let opts = self.transact_opts(args).await?;
        if opts.value.unwrap_or_default() == U256::ZERO {
            warn!("Transferring zero value to {:?}", contract.address());
        }

        let pending = contract
            .transfer(&opts)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        self.report(pending, &contract, args.wait).await
    }

    pub async fn deploy(&mut self, contract: &str, params: &Value, args: &TxArgs) -> Result<Value> {
        self.ensure_writes_allowed()?;
        let contract: SonmContract = contract.parse().map_err(|e: String| anyhow!(e))?;
        let abi = contract.abi()?;
        let inputs = match abi.constructor() {
            Some(constructor) => json_to_params(&constructor.inputs, "constructor", params)?,
            None => Vec::new(),
        };
        let opts = self.transact_opts(args).await?;

        let (address, pending, deployed) = contract
            .deploy(&opts, &inputs, self.backend()?)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        info!("{} will be deployed at {:?}", contract, address);

        let mut result = self.report(pending, &deployed, args.wait).await?;
        if let Value::Object(fields) = &mut result {
            fields.insert("contract".to_string(), json!(contract.name()));
            fields.insert("address".to_string(), json!(format!("{:?}", address)));
        }
        Ok(result)
    }

    /// Describes a sent transaction, waiting for its receipt when asked.
    async fn report(
        &self,
        pending: PendingTransaction,
        contract: &BoundContract,
        wait: bool,
    ) -> Result<Value> {
        if !wait {
            return Ok(json!({ "transaction": pending }));
        }
        let backend = self.backend()?;
        let poll_interval = self.providers.config().logs.poll_interval();
        confirm(backend.as_ref(), poll_interval, pending, contract).await
    }

    /// Prints past events, one JSON document per line. Returns how many were
    /// printed.
    pub async fn events(
        &mut self,
        target: &Target,
        event: &str,
        opts: &FilterOpts,
        topics: &Value,
        out: &mut impl Write,
    ) -> Result<usize> {
        utils::validate_identifier(event)?;
        let contract = self.bind(target).await?;
        let rules = topic_rules(&contract.event_schema(event)?, topics)?;

        let events = contract
            .filter_logs(opts, event, &rules)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        print_events(events, out).await
    }

    /// Follows new events until `shutdown` resolves.
    pub async fn watch(
        &mut self,
        target: &Target,
        event: &str,
        opts: &WatchOpts,
        topics: &Value,
        out: &mut impl Write,
        shutdown: impl Future<Output = ()>,
    ) -> Result<usize> {
        utils::validate_identifier(event)?;
        let head = self
            .providers
            .validate_network_connection(self.network())
            .await?;
        info!("Connected at block {}", head);

        let contract = self.bind(target).await?;
        let rules = topic_rules(&contract.event_schema(event)?, topics)?;
        let events = contract
            .watch_logs(opts, event, &rules)
            .await
            .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
        follow_events(events, out, shutdown).await
    }
}

/// Waits for `pending` to be mined and decodes the events `contract`
/// emitted in it.
async fn confirm(
    backend: &dyn ContractBackend,
    poll_interval: Duration,
    pending: PendingTransaction,
    contract: &BoundContract,
) -> Result<Value> {
    info!("Waiting for {} to be mined", pending.hash);
    let receipt = pending
        .wait(backend, poll_interval)
        .await
        .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?;
    let events: Vec<Value> = contract
        .receipt_events(&receipt)
        .map_err(|e| anyhow!(utils::interpret_binding_error(&e)))?
        .iter()
        .map(DecodedEvent::to_json)
        .collect();

    Ok(json!({
        "transaction": pending,
        "receipt": {
            "block_number": receipt.block_number,
            "contract_address": receipt.contract_address,
            "events": events,
        },
    }))
}

/// Looks up a SONM contract in a network's `contracts` table, ignoring case.
pub fn configured_address(
    contracts: &std::collections::HashMap<String, String>,
    name: &str,
) -> Result<Address> {
    let address = contracts
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, address)| address)
        .ok_or_else(|| {
            anyhow!(
                "No address configured for '{}' on this network. Pass --address",
                name
            )
        })?;
    utils::validate_address(address).with_context(|| format!("Configured address of '{}'", name))
}

fn capped_gas_price(suggested: u128, max: u128) -> u128 {
    if suggested > max {
        warn!(
            "Suggested gas price {} exceeds the configured maximum, using {}",
            suggested, max
        );
        max
    } else {
        suggested
    }
}

/// Converts JSON topic rules into filter values for the indexed fields of
/// `schema`. Each entry is a value, a list of alternatives, or `null` for
/// "any".
pub fn topic_rules(schema: &EventSchema, topics: &Value) -> Result<Vec<Vec<DynSolValue>>> {
    let entries = match topics {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => return Err(anyhow!("Topic rules must be a JSON array, got: {}", other)),
    };

    let fields: Vec<_> = schema.indexed_fields().collect();
    if entries.len() > fields.len() {
        return Err(anyhow!(
            "Event '{}' has {} indexed fields, got {} topic rules",
            schema.name(),
            fields.len(),
            entries.len()
        ));
    }

    entries
        .iter()
        .zip(fields)
        .map(|(entry, field)| {
            let values: Vec<&Value> = match entry {
                Value::Null => Vec::new(),
                Value::Array(options) => options.iter().collect(),
                single => vec![single],
            };
            values
                .into_iter()
                .map(|value| {
                    json_to_dyn_sol_value(value, &field.ty)
                        .map_err(|e| anyhow!("Invalid topic for '{}': {}", field.name, e))
                })
                .collect()
        })
        .collect()
}

/// Machine-readable listing of the embedded contracts.
pub fn list_contracts() -> Result<Value> {
    SonmContract::ALL
        .iter()
        .map(|contract| {
            let abi = contract.abi()?;
            let functions: Vec<Value> = abi
                .functions()
                .map(|f| {
                    json!({
                        "signature": f.signature(),
                        "selector": format!("{}", f.selector()),
                    })
                })
                .collect();
            let events: Vec<Value> = abi
                .events()
                .map(|e| {
                    json!({
                        "signature": e.signature(),
                        "topic": format!("{:?}", e.selector()),
                    })
                })
                .collect();
            let constructor: Vec<String> = abi
                .constructor()
                .map(|c| {
                    c.inputs
                        .iter()
                        .map(|p| format!("{} {}", p.ty, p.name))
                        .collect()
                })
                .unwrap_or_default();

            Ok(json!({
                "name": contract.name(),
                "constructor": constructor,
                "functions": functions,
                "events": events,
            }))
        })
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

async fn print_events(mut events: EventIterator, out: &mut impl Write) -> Result<usize> {
    let mut count = 0;
    while events.advance().await {
        if let Some(event) = events.event() {
            writeln!(out, "{}", event.to_json())?;
            count += 1;
        }
    }
    events.close();

    match events.error() {
        Some(err) => Err(anyhow!(
            "Event stream stopped after {} events: {}",
            count,
            utils::interpret_binding_error(err)
        )),
        None => Ok(count),
    }
}

async fn follow_events(
    mut events: EventIterator,
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> Result<usize> {
    tokio::pin!(shutdown);
    let mut count = 0;

    loop {
        tokio::select! {
            more = events.advance() => {
                if !more {
                    break;
                }
                if let Some(event) = events.event() {
                    writeln!(out, "{}", event.to_json())?;
                    out.flush()?;
                    count += 1;
                }
            }
            _ = &mut shutdown => {
                info!("Stopping, draining delivered events");
                events.close();
                return print_events(events, out).await.map(|drained| count + drained);
            }
        }
    }

    match events.error() {
        Some(err) => Err(anyhow!(
            "Event stream stopped after {} events: {}",
            count,
            utils::interpret_binding_error(err)
        )),
        None => Ok(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::{
        backend::MockContractBackend,
        event::tests::{deposit_log, deposit_schema, DEPOSIT_ABI},
        receipt::tests::{pending, receipt},
        LogStream, Subscription,
    };
    use alloy::primitives::B256;
    use tempfile::tempdir;
    use std::collections::HashMap;
    use tokio::sync::{mpsc, oneshot};

    fn deposit_contract(backend: MockContractBackend) -> BoundContract {
        BoundContract::from_json(Address::repeat_byte(0xaa), DEPOSIT_ABI, Arc::new(backend))
            .unwrap()
    }

    #[test]
    fn test_list_contracts() {
        let listing = list_contracts().unwrap();
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), SonmContract::ALL.len());

        let blacklist = entries.iter().find(|c| c["name"] == "Blacklist").unwrap();
        assert!(blacklist["functions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f["signature"] == "Check(address,address)" && f["selector"] == "0x968f600c"));
    }

    #[test]
    fn test_configured_address() {
        let mut contracts = HashMap::new();
        contracts.insert(
            "SNMMasterchain".to_string(),
            "0x983f6d60db79ea8ca4eb9968c6aff8cfa04b3c63".to_string(),
        );
        contracts.insert("Blacklist".to_string(), "0x12".to_string());

        assert!(configured_address(&contracts, "snmmasterchain").is_ok());
        assert!(configured_address(&contracts, "Blacklist").is_err());
        assert!(configured_address(&contracts, "Gatekeeper").is_err());
    }

    #[test]
    fn test_topic_rules() {
        let schema = deposit_schema();
        let who = "0x0101010101010101010101010101010101010101";

        assert!(topic_rules(&schema, &Value::Null).unwrap().is_empty());
        assert_eq!(
            topic_rules(&schema, &json!([who])).unwrap(),
            vec![vec![DynSolValue::Address(Address::repeat_byte(1))]]
        );
        assert_eq!(
            topic_rules(&schema, &json!([[who, who]])).unwrap()[0].len(),
            2
        );
        assert_eq!(topic_rules(&schema, &json!([null])).unwrap(), vec![vec![]]);
        assert!(topic_rules(&schema, &json!([who, who])).is_err());
        assert!(topic_rules(&schema, &json!(["nope"])).is_err());
        assert!(topic_rules(&schema, &json!({"who": who})).is_err());
    }

    #[test]
    fn test_gas_price_cap() {
        assert_eq!(capped_gas_price(10, 20), 10);
        assert_eq!(capped_gas_price(30, 20), 20);
    }

    #[tokio::test]
    async fn test_print_events_writes_json_lines() {
        let schema = deposit_schema();
        let logs: Vec<_> = (0..3)
            .map(|i| deposit_log(&schema, Address::repeat_byte(1), 100 + i, i))
            .collect();
        let mut backend = MockContractBackend::new();
        backend
            .expect_filter_logs()
            .returning(move |_| Ok(logs.clone()));

        let events = deposit_contract(backend)
            .filter_logs(&FilterOpts::default(), "Deposit", &[])
            .await
            .unwrap();
        let mut out = Vec::new();
        assert_eq!(print_events(events, &mut out).await.unwrap(), 3);

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["event"], "Deposit");
        assert_eq!(lines[2]["fields"]["amount"], "102");
    }

    #[tokio::test]
    async fn test_follow_events_drains_on_shutdown() {
        let schema = deposit_schema();
        let (log_tx, log_rx) = mpsc::channel(8);
        for i in 0..2 {
            log_tx
                .send(deposit_log(&schema, Address::repeat_byte(2), i, i))
                .await
                .unwrap();
        }

        let mut backend = MockContractBackend::new();
        let stream = std::sync::Mutex::new(Some((log_rx, log_tx)));
        backend.expect_watch_logs().returning(move |_| {
            let (rx, tx) = stream.lock().unwrap().take().unwrap();
            let sub = Subscription::new(move |quit| async move {
                let _keep = tx;
                let _ = quit.await;
                Ok(())
            });
            Ok(LogStream::new(rx, sub))
        });

        let events = deposit_contract(backend)
            .watch_logs(&WatchOpts::default(), "Deposit", &[])
            .await
            .unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = stop_rx.await;
        };

        let mut out = Vec::new();
        let follow = follow_events(events, &mut out, shutdown);
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stop_tx.send(()).unwrap();
        };
        let (count, _) = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(follow, stopper)
        })
        .await
        .unwrap();

        assert_eq!(count.unwrap(), 2);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_bind_by_address_uses_default_network_cache() {
        let cache = tempdir().unwrap();
        let address = "0x1111111111111111111111111111111111111111";
        std::fs::write(
            cache.path().join(format!("local_{}.json", address)),
            SonmContract::Blacklist.abi_json(),
        )
        .unwrap();

        let mut config = crate::config::Config::default();
        config.default_network = "local".to_string();
        config.security.private_key_env = "SONM_BINDINGS_TEST_UNSET_KEY".to_string();
        let providers = ProviderManager::new(config).unwrap();
        let source = AbiSource {
            etherscan_api_key: None,
            cache_dir: cache.path().to_path_buf(),
        };
        let mut app = Commands::with_abi_source(providers, None, source);

        let target = Target {
            address: Some(address.to_string()),
            ..Default::default()
        };
        let contract = app.bind(&target).await.unwrap();
        assert_eq!(contract.address(), Address::repeat_byte(0x11));
        assert!(contract.function("Check").is_ok());
    }

    #[tokio::test]
    async fn test_confirm_reports_receipt_events() {
        let schema = deposit_schema();
        let hash = B256::repeat_byte(0x42);
        let log = deposit_log(&schema, Address::repeat_byte(3), 77, 12);

        let mut backend = MockContractBackend::new();
        backend
            .expect_transaction_receipt()
            .times(1)
            .returning(move |h| Ok(Some(receipt(h, true, vec![log.clone()]))));

        let contract = deposit_contract(MockContractBackend::new());
        let result = confirm(&backend, Duration::from_millis(1), pending(hash), &contract)
            .await
            .unwrap();

        assert_eq!(result["transaction"]["hash"], format!("{}", hash));
        assert_eq!(result["receipt"]["block_number"], 12);
        let events = result["receipt"]["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event"], "Deposit");
        assert_eq!(events[0]["fields"]["amount"], "77");
    }

    #[tokio::test]
    async fn test_confirm_reports_reverted_transaction() {
        let mut backend = MockContractBackend::new();
        backend
            .expect_transaction_receipt()
            .returning(|h| Ok(Some(receipt(h, false, Vec::new()))));

        let contract = deposit_contract(MockContractBackend::new());
        let err = confirm(
            &backend,
            Duration::from_millis(1),
            pending(B256::repeat_byte(7)),
            &contract,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed"));
    }
}
