use crate::config::{Config, LogsConfig, NetworkConfig};
use crate::ethereum::backend::{AlloyBackend, ContractBackend};
use alloy::{
    network::EthereumWallet,
    primitives::Address,
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// Owns one contract backend per configured network.
pub struct ProviderManager {
    backends: HashMap<String, Arc<dyn ContractBackend>>,
    signer: Option<Address>,
    config: Config,
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("networks", &self.backends.keys().collect::<Vec<_>>())
            .field("signer", &self.signer)
            .finish()
    }
}

impl ProviderManager {
    pub fn new(config: Config) -> Result<Self> {
        let signer = Self::load_signer(&config.security.private_key_env)?;
        let signer_address = signer.as_ref().map(|s| s.address());
        if let Some(address) = signer_address {
            tracing::info!("Signing transactions as {:?}", address);
        }

        let mut backends = HashMap::new();
        for (network_name, network_config) in &config.networks {
            let backend = Self::create_backend(network_config, &config.logs, signer.clone())?;
            backends.insert(network_name.clone(), backend);
        }

        Ok(Self {
            backends,
            signer: signer_address,
            config,
        })
    }

    fn load_signer(env_var: &str) -> Result<Option<PrivateKeySigner>> {
        let Ok(private_key) = std::env::var(env_var) else {
            return Ok(None);
        };
        let private_key = private_key.trim();
        let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);

        PrivateKeySigner::from_str(private_key)
            .map(Some)
            .map_err(|e| anyhow!("Invalid private key in {}: {}", env_var, e))
    }

    fn create_backend(
        network_config: &NetworkConfig,
        logs: &LogsConfig,
        signer: Option<PrivateKeySigner>,
    ) -> Result<Arc<dyn ContractBackend>> {
        let url = network_config
            .rpc_url
            .parse()
            .map_err(|e| anyhow!("Invalid RPC URL '{}': {}", network_config.rpc_url, e))?;

        // Without a local key the node is asked to sign (eth_sendTransaction).
        let backend: Arc<dyn ContractBackend> = match signer {
            Some(signer) => {
                let provider = ProviderBuilder::new()
                    .with_recommended_fillers()
                    .wallet(EthereumWallet::from(signer))
                    .on_http(url);
                Arc::new(Self::configure(
                    AlloyBackend::<_, Http<Client>>::new(provider),
                    logs,
                ))
            }
            None => {
                let provider = ProviderBuilder::new().on_http(url);
                Arc::new(Self::configure(
                    AlloyBackend::<_, Http<Client>>::new(provider),
                    logs,
                ))
            }
        };

        Ok(backend)
    }

    fn configure<P, T>(backend: AlloyBackend<P, T>, logs: &LogsConfig) -> AlloyBackend<P, T>
    where
        P: alloy::providers::Provider<T>,
        T: alloy::transports::Transport + Clone,
    {
        backend
            .with_poll_interval(logs.poll_interval())
            .with_log_buffer(logs.buffer_size)
            .with_blocks_batch_size(logs.blocks_batch_size)
    }

    pub fn get_backend(&self, network: Option<&str>) -> Result<Arc<dyn ContractBackend>> {
        let network_name = network.unwrap_or(&self.config.default_network);
        self.backends
            .get(network_name)
            .cloned()
            .ok_or_else(|| anyhow!("Network '{}' not found", network_name))
    }

    pub fn get_network_config(&self, network: Option<&str>) -> Result<&NetworkConfig> {
        self.config.network(network)
    }

    pub fn get_available_networks(&self) -> Vec<String> {
        self.config.networks.keys().cloned().collect()
    }

    /// Address of the local signing key, if one is configured.
    pub fn signer_address(&self) -> Option<Address> {
        self.signer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validates network connectivity with detailed error information
    pub async fn validate_network_connection(&self, network: Option<&str>) -> Result<u64> {
        let network_name = network.unwrap_or(&self.config.default_network);
        let backend = self
            .get_backend(network)
            .map_err(|e| anyhow!("Network '{}' is not configured: {}", network_name, e))?;

        backend.block_number().await.map_err(|e| {
            anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                network_name,
                crate::ethereum::utils::interpret_rpc_error(&e.to_string())
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_per_network() {
        let mut config = Config::default();
        config.security.private_key_env = "SONM_BINDINGS_TEST_UNSET_KEY".to_string();
        let manager = ProviderManager::new(config).unwrap();

        assert!(manager.signer_address().is_none());
        assert!(manager.get_backend(None).is_ok());
        assert!(manager.get_backend(Some("local")).is_ok());
        assert!(manager.get_backend(Some("polygon")).is_err());

        let mut networks = manager.get_available_networks();
        networks.sort();
        assert_eq!(networks, vec!["ethereum", "local", "sepolia"]);
    }

    #[test]
    fn test_signer_from_environment() {
        // Well-known development key (first anvil account).
        let env_var = "SONM_BINDINGS_TEST_SIGNER_KEY";
        std::env::set_var(
            env_var,
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        );
        let mut config = Config::default();
        config.security.private_key_env = env_var.to_string();

        let manager = ProviderManager::new(config).unwrap();
        assert_eq!(
            manager.signer_address(),
            Some(alloy::primitives::address!(
                "f39fd6e51aad88f6f4ce6ab8827279cfffb92266"
            ))
        );
        std::env::remove_var(env_var);
    }

    #[test]
    fn test_invalid_rpc_url() {
        let mut config = Config::default();
        config.security.private_key_env = "SONM_BINDINGS_TEST_UNSET_KEY".to_string();
        config
            .networks
            .get_mut("local")
            .unwrap()
            .rpc_url = "not a url".to_string();
        assert!(ProviderManager::new(config).is_err());
    }
}
