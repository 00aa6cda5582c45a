use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::ethereum::backend::{
    DEFAULT_BLOCKS_BATCH_SIZE, DEFAULT_LOG_BUFFER, DEFAULT_POLL_INTERVAL,
};

const GWEI: u64 = 1_000_000_000;
const ALCHEMY_PLACEHOLDERS: [&str; 2] = ["YOUR_API_KEY_HERE", "demo"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default_network: String,
    pub networks: HashMap<String, NetworkConfig>,
    pub security: SecurityConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub gas: GasConfig,
    /// Deployed SONM contracts on this network, by contract name.
    #[serde(default)]
    pub contracts: HashMap<String, String>,
}

impl NetworkConfig {
    fn alchemy(slug: &str, chain_id: u64, explorer: &str, max_gas_gwei: u64) -> Self {
        Self {
            rpc_url: format!("https://{}.g.alchemy.com/v2/demo", slug),
            chain_id,
            explorer_url: Some(explorer.to_string()),
            gas: GasConfig {
                default_gas_limit: None,
                max_gas_price: Some(max_gas_gwei * GWEI),
            },
            contracts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    /// Used instead of estimating when set.
    pub default_gas_limit: Option<u64>,
    /// Upper bound applied to the node's gas price suggestion, in wei.
    pub max_gas_price: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub allow_write_operations: bool,
    /// Environment variable holding the hex private key used for signing.
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allow_write_operations: false,
            private_key_env: default_private_key_env(),
        }
    }
}

fn default_private_key_env() -> String {
    "SONM_PRIVATE_KEY".to_string()
}

/// Tuning for log queries and subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub poll_interval_ms: u64,
    pub buffer_size: usize,
    pub blocks_batch_size: u64,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            buffer_size: DEFAULT_LOG_BUFFER,
            blocks_batch_size: DEFAULT_BLOCKS_BATCH_SIZE,
        }
    }
}

impl LogsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        let networks = HashMap::from([
            (
                "ethereum".to_string(),
                NetworkConfig::alchemy("eth-mainnet", 1, "https://etherscan.io", 50),
            ),
            (
                "sepolia".to_string(),
                NetworkConfig::alchemy(
                    "eth-sepolia",
                    11155111,
                    "https://sepolia.etherscan.io",
                    20,
                ),
            ),
            (
                "local".to_string(),
                NetworkConfig {
                    rpc_url: "http://127.0.0.1:8545".to_string(),
                    chain_id: 31337,
                    explorer_url: None,
                    gas: GasConfig::default(),
                    contracts: HashMap::new(),
                },
            ),
        ]);

        Self {
            default_network: "ethereum".to_string(),
            networks,
            security: SecurityConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

impl Config {
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read config file {}", path.display()))?;

        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let serialized = toml::to_string_pretty(self).context("Cannot serialize config")?;

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Cannot create config directory {}", dir.display()))?;
        }

        fs::write(path, serialized)
            .await
            .with_context(|| format!("Cannot write config file {}", path.display()))
    }

    /// Reads `path` when given; a missing or broken file falls back to the
    /// built-in networks with a warning.
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            None => Self::default(),
            Some(path) => Self::load_from_file(&path).await.unwrap_or_else(|e| {
                tracing::warn!("{:#}. Falling back to the default configuration", e);
                Self::default()
            }),
        };

        config.substitute_api_key(std::env::var("ALCHEMY_API_KEY").ok().as_deref());
        config
    }

    pub fn network(&self, name: Option<&str>) -> Result<&NetworkConfig> {
        let name = name.unwrap_or(&self.default_network);
        self.networks.get(name).ok_or_else(|| {
            let mut known: Vec<&String> = self.networks.keys().collect();
            known.sort();
            anyhow!(
                "Network '{}' not configured. Available networks: {:?}",
                name,
                known
            )
        })
    }

    /// Puts the Alchemy key in place of the placeholder key of Alchemy URLs.
    fn substitute_api_key(&mut self, api_key: Option<&str>) {
        for (name, network) in &mut self.networks {
            let Some((base, key)) = network.rpc_url.rsplit_once('/') else {
                continue;
            };
            if !base.contains("alchemy.com") || !ALCHEMY_PLACEHOLDERS.contains(&key) {
                continue;
            }

            match api_key {
                Some(api_key) => {
                    network.rpc_url = format!("{}/{}", base, api_key);
                    tracing::debug!("Using ALCHEMY_API_KEY for network {}", name);
                }
                None => tracing::warn!(
                    "Network {} uses a placeholder Alchemy endpoint; set ALCHEMY_API_KEY",
                    name
                ),
            }
        }
    }

    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("sonm-bindings").join("config.toml"))
            .ok_or_else(|| anyhow!("Could not determine config directory"))
    }

    pub fn generate_sample() -> String {
        r#"# sonm-bindings configuration

# Network used when --network is not given
default_network = "ethereum"

[networks.ethereum]
rpc_url = "https://eth-mainnet.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 1
explorer_url = "https://etherscan.io"

[networks.ethereum.gas]
max_gas_price = 50_000_000_000 # wei

# SONM contract addresses, looked up by --contract NAME
[networks.ethereum.contracts]
SNMMasterchain = "0x983f6d60db79ea8ca4eb9968c6aff8cfa04b3c63"

[networks.sepolia]
rpc_url = "https://eth-sepolia.g.alchemy.com/v2/YOUR_API_KEY_HERE"
chain_id = 11155111
explorer_url = "https://sepolia.etherscan.io"

[networks.sepolia.gas]
max_gas_price = 20_000_000_000 # wei

[networks.local]
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[networks.local.gas]
default_gas_limit = 3_000_000

[security]
# send, transfer and deploy are refused unless this is true or --allow-writes is passed
allow_write_operations = false
# Environment variable holding the hex private key used to sign transactions
private_key_env = "SONM_PRIVATE_KEY"

[logs]
poll_interval_ms = 1000
buffer_size = 256
blocks_batch_size = 500

# Also read from the environment:
# ALCHEMY_API_KEY    replaces YOUR_API_KEY_HERE in Alchemy URLs
# ETHERSCAN_API_KEY  used when fetching ABIs of unknown contracts
"#
        .to_string()
    }
}
