use anyhow::{anyhow, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use serde_json::Value;
use sonm_bindings::{
    commands::{self, Commands, Target, TxArgs},
    config::Config,
    ethereum::{provider::ProviderManager, utils, CallOpts, FilterOpts, WatchOpts},
};
use std::path::PathBuf;
use tracing::{error, info};

fn tx_args() -> [Arg; 6] {
    [
        Arg::new("from")
            .long("from")
            .value_name("ADDRESS")
            .help("Sender account (defaults to the configured signing key)"),
        Arg::new("value")
            .long("value")
            .value_name("WEI")
            .help("Ether to send, in wei (decimal or 0x hex)"),
        Arg::new("nonce")
            .long("nonce")
            .value_name("N")
            .value_parser(value_parser!(u64)),
        Arg::new("gas-limit")
            .long("gas-limit")
            .value_name("GAS")
            .value_parser(value_parser!(u64))
            .help("Gas limit (estimated when omitted)"),
        Arg::new("gas-price")
            .long("gas-price")
            .value_name("WEI")
            .value_parser(value_parser!(u128))
            .help("Gas price in wei (suggested by the node when omitted)"),
        Arg::new("wait")
            .long("wait")
            .help("Wait until mined and print the receipt with decoded events")
            .action(clap::ArgAction::SetTrue),
    ]
}

fn params_arg() -> Arg {
    Arg::new("params")
        .value_name("JSON")
        .default_value("[]")
        .help("Arguments as a JSON array or an object keyed by parameter name")
}

fn topics_arg() -> Arg {
    Arg::new("topics")
        .long("topics")
        .value_name("JSON")
        .help("Indexed field filters, e.g. '[\"0x...\", null]'")
}

fn cli() -> Command {
    Command::new("sonm-bindings")
        .version("0.1.0")
        .about("Call, transact with and follow the events of SONM smart contracts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, local)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL for the selected network"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .global(true)
                .help("Allow write operations (transactions and deployments)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("contract")
                .short('C')
                .long("contract")
                .value_name("NAME")
                .global(true)
                .help("SONM contract name, e.g. SNMMasterchain"),
        )
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("ADDRESS")
                .global(true)
                .help("Contract address (overrides the configured one)"),
        )
        .arg(
            Arg::new("abi")
                .long("abi")
                .value_name("FILE")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("ABI JSON file for contracts outside the SONM set"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(Command::new("contracts").about("List the embedded SONM contracts"))
        .subcommand(
            Command::new("call")
                .about("Call a constant method")
                .arg(Arg::new("method").required(true))
                .arg(params_arg())
                .arg(
                    Arg::new("from")
                        .long("from")
                        .value_name("ADDRESS")
                        .help("Caller used as msg.sender"),
                )
                .arg(
                    Arg::new("block")
                        .long("block")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .conflicts_with("pending"),
                )
                .arg(
                    Arg::new("pending")
                        .long("pending")
                        .help("Query the pending state")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("send")
                .about("Send a transaction invoking a method")
                .arg(Arg::new("method").required(true))
                .arg(params_arg())
                .args(tx_args()),
        )
        .subcommand(
            Command::new("transfer")
                .about("Send plain ether to the contract's fallback function")
                .args(tx_args()),
        )
        .subcommand(
            Command::new("deploy")
                .about("Deploy a new instance of a SONM contract")
                .arg(Arg::new("name").required(true).value_name("CONTRACT"))
                .arg(params_arg())
                .args(tx_args()),
        )
        .subcommand(
            Command::new("events")
                .about("Print past events, one JSON document per line")
                .arg(Arg::new("event").required(true))
                .arg(
                    Arg::new("from-block")
                        .long("from-block")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("to-block")
                        .long("to-block")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .help("Last block to scan (the chain head when omitted)"),
                )
                .arg(topics_arg()),
        )
        .subcommand(
            Command::new("watch")
                .about("Follow new events until interrupted")
                .arg(Arg::new("event").required(true))
                .arg(
                    Arg::new("from-block")
                        .long("from-block")
                        .value_name("N")
                        .value_parser(value_parser!(u64))
                        .help("Replay events from this block before following"),
                )
                .arg(topics_arg()),
        )
}

fn parse_json(matches: &ArgMatches, id: &str) -> Result<Value> {
    match matches.get_one::<String>(id) {
        Some(raw) => {
            serde_json::from_str(raw).map_err(|e| anyhow!("Invalid JSON for {}: {}", id, e))
        }
        None => Ok(Value::Null),
    }
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .unwrap_or_default()
}

fn target(matches: &ArgMatches) -> Target {
    Target {
        contract: matches.get_one::<String>("contract").cloned(),
        address: matches.get_one::<String>("address").cloned(),
        abi_file: matches.get_one::<PathBuf>("abi").cloned(),
    }
}

fn transaction(matches: &ArgMatches) -> TxArgs {
    TxArgs {
        from: matches.get_one::<String>("from").cloned(),
        value: matches.get_one::<String>("value").cloned(),
        nonce: matches.get_one::<u64>("nonce").copied(),
        gas_limit: matches.get_one::<u64>("gas-limit").copied(),
        gas_price: matches.get_one::<u128>("gas-price").copied(),
        wait: matches.get_flag("wait"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(matches: ArgMatches, config: Config, network: Option<String>) -> Result<()> {
    let Some((name, sub)) = matches.subcommand() else {
        return print_json(&commands::list_contracts()?);
    };

    if name == "contracts" {
        return print_json(&commands::list_contracts()?);
    }

    let providers = ProviderManager::new(config)?;
    let mut app = Commands::new(providers, network);
    let target = target(sub);

    match name {
        "call" => {
            let opts = CallOpts {
                pending: sub.get_flag("pending"),
                from: sub
                    .get_one::<String>("from")
                    .map(|a| utils::validate_address(a))
                    .transpose()?,
                block_number: sub.get_one::<u64>("block").copied(),
            };
            let method = required(sub, "method");
            let result = app
                .call(&target, method, &parse_json(sub, "params")?, &opts)
                .await?;
            print_json(&result)
        }
        "send" => {
            let method = required(sub, "method");
            let pending = app
                .send(&target, method, &parse_json(sub, "params")?, &transaction(sub))
                .await?;
            print_json(&pending)
        }
        "transfer" => print_json(&app.transfer(&target, &transaction(sub)).await?),
        "deploy" => {
            let contract = required(sub, "name");
            let deployed = app
                .deploy(contract, &parse_json(sub, "params")?, &transaction(sub))
                .await?;
            print_json(&deployed)
        }
        "events" => {
            let opts = FilterOpts {
                start: sub.get_one::<u64>("from-block").copied().unwrap_or_default(),
                end: sub.get_one::<u64>("to-block").copied(),
            };
            let event = required(sub, "event");
            let mut stdout = std::io::stdout().lock();
            let count = app
                .events(&target, event, &opts, &parse_json(sub, "topics")?, &mut stdout)
                .await?;
            info!("Printed {} {} events", count, event);
            Ok(())
        }
        "watch" => {
            let opts = WatchOpts {
                start: sub.get_one::<u64>("from-block").copied(),
            };
            let event = required(sub, "event");
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl-C: {}", e);
                    std::future::pending::<()>().await;
                }
            };
            let mut stdout = std::io::stdout();
            let count = app
                .watch(
                    &target,
                    event,
                    &opts,
                    &parse_json(sub, "topics")?,
                    &mut stdout,
                    shutdown,
                )
                .await?;
            info!("Printed {} {} events", count, event);
            Ok(())
        }
        other => Err(anyhow!("Unknown command: {}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    // Handle special commands first
    if matches.get_flag("generate-config") {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    // Load configuration, falling back to the default location
    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .or_else(|| Config::default_config_path().ok().filter(|p| p.exists()));
    let mut config = Config::load_or_default(config_path).await;

    let network = matches.get_one::<String>("network").cloned();
    if let Some(network) = &network {
        let mut known: Vec<String> = config.networks.keys().cloned().collect();
        known.sort();
        utils::validate_network(network, &known)?;
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    info!("Network: {}", config.default_network);
    info!(
        "Write operations allowed: {}",
        config.security.allow_write_operations
    );

    if let Err(e) = run(matches, config, network).await {
        error!("{:#}", e);
        return Err(e);
    }

    Ok(())
}
