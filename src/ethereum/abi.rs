use alloy::json_abi::JsonAbi;
use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Where ABIs of contracts outside the embedded set come from.
#[derive(Debug, Clone)]
pub struct AbiSource {
    pub etherscan_api_key: Option<String>,
    pub cache_dir: PathBuf,
}

impl Default for AbiSource {
    fn default() -> Self {
        Self {
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok(),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sonm-bindings")
                .join("abi-cache"),
        }
    }
}

/// Parses an ABI document: either a bare JSON array or a build artifact
/// carrying the array under `"abi"`.
pub fn parse_abi_document(content: &str) -> Result<JsonAbi> {
    let value: Value = serde_json::from_str(content).context("ABI is not valid JSON")?;

    let abi = match value {
        Value::Array(_) => value,
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| anyhow!("ABI artifact has no \"abi\" field"))?,
        other => bail!("Expected an ABI array, got: {}", other),
    };

    serde_json::from_value(abi).context("Invalid ABI")
}

/// Reads an ABI document from disk.
pub async fn load_abi_file(path: impl AsRef<Path>) -> Result<JsonAbi> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Cannot read ABI file {}", path.display()))?;
    parse_abi_document(&content).with_context(|| format!("ABI file {}", path.display()))
}

fn cache_key(address: &str, network: Option<&str>) -> String {
    format!(
        "{}_{}",
        network.unwrap_or("ethereum"),
        address.to_lowercase()
    )
}

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    status: String,
    message: String,
    result: String,
}

/// Resolves contract ABIs from memory, the disk cache or Etherscan, in that
/// order.
#[derive(Debug)]
pub struct AbiResolver {
    client: Client,
    source: AbiSource,
    resolved: HashMap<String, JsonAbi>,
}

impl AbiResolver {
    pub fn new(source: AbiSource) -> Self {
        Self {
            client: Client::new(),
            source,
            resolved: HashMap::new(),
        }
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.source.cache_dir.join(format!("{}.json", key))
    }

    pub async fn get_abi(&mut self, address: &str, network: Option<&str>) -> Result<JsonAbi> {
        let key = cache_key(address, network);
        if let Some(abi) = self.resolved.get(&key) {
            return Ok(abi.clone());
        }

        let abi = match self.read_cache(&key).await {
            Some(abi) => {
                debug!("Loaded ABI of {} from {}", address, self.source.cache_dir.display());
                abi
            }
            None => {
                info!("Fetching ABI of {} from Etherscan", address);
                let abi = self.fetch_from_etherscan(address, network).await?;
                if let Err(e) = self.write_cache(&key, &abi).await {
                    warn!("Cannot cache ABI of {}: {:#}", address, e);
                }
                abi
            }
        };

        self.resolved.insert(key, abi.clone());
        Ok(abi)
    }

    fn etherscan_url(network: Option<&str>) -> Result<&'static str> {
        match network.unwrap_or("ethereum") {
            "mainnet" | "ethereum" => Ok("https://api.etherscan.io"),
            "sepolia" => Ok("https://api-sepolia.etherscan.io"),
            other => Err(anyhow!("Unsupported network for Etherscan: {}", other)),
        }
    }

    async fn fetch_from_etherscan(&self, address: &str, network: Option<&str>) -> Result<JsonAbi> {
        let url = format!("{}/api", Self::etherscan_url(network)?);
        let mut query = vec![
            ("module", "contract"),
            ("action", "getabi"),
            ("address", address),
        ];
        if let Some(api_key) = &self.source.etherscan_api_key {
            query.push(("apikey", api_key.as_str()));
        }

        let response: EtherscanResponse = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Etherscan request failed")?
            .json()
            .await
            .context("Unexpected Etherscan response")?;

        if response.status != "1" {
            // `result` carries the detail, e.g. "Contract source code not verified".
            bail!("Etherscan: {} ({})", response.message, response.result);
        }

        parse_abi_document(&response.result)
    }

    async fn read_cache(&self, key: &str) -> Option<JsonAbi> {
        let path = self.cache_path(key);
        if !path.exists() {
            return None;
        }
        match load_abi_file(&path).await {
            Ok(abi) => Some(abi),
            Err(e) => {
                warn!("Ignoring cached ABI: {:#}", e);
                None
            }
        }
    }

    async fn write_cache(&self, key: &str, abi: &JsonAbi) -> Result<()> {
        fs::create_dir_all(&self.source.cache_dir)
            .await
            .context("Cannot create ABI cache directory")?;

        let path = self.cache_path(key);
        fs::write(&path, serde_json::to_string_pretty(abi)?)
            .await
            .with_context(|| format!("Cannot write {}", path.display()))
    }

    /// Registers an ABI for an address without consulting any source.
    pub fn add_manual_abi(&mut self, address: &str, network: Option<&str>, abi: JsonAbi) {
        debug!("Registered ABI for {}", address);
        self.resolved.insert(cache_key(address, network), abi);
    }

    /// Registers the ABI stored in `path` for an address.
    pub async fn add_abi_file(
        &mut self,
        address: &str,
        network: Option<&str>,
        path: impl AsRef<Path>,
    ) -> Result<JsonAbi> {
        let abi = load_abi_file(path).await?;
        self.add_manual_abi(address, network, abi.clone());
        Ok(abi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SonmContract;
    use tempfile::tempdir;

    const BLACKLIST: &str = "0x8125721c2413d99a33e351e1f6bb4e56b6b633fd";

    fn resolver(dir: &Path) -> AbiResolver {
        AbiResolver::new(AbiSource {
            etherscan_api_key: None,
            cache_dir: dir.to_path_buf(),
        })
    }

    #[test]
    fn test_parse_plain_and_artifact() {
        let plain = parse_abi_document(SonmContract::Blacklist.abi_json()).unwrap();
        assert!(plain.function("Check").is_some());

        let artifact = format!(
            r#"{{"contractName": "Blacklist", "abi": {}, "bytecode": "0x"}}"#,
            SonmContract::Blacklist.abi_json()
        );
        let wrapped = parse_abi_document(&artifact).unwrap();
        assert_eq!(wrapped, plain);

        assert!(parse_abi_document(r#"{"bytecode": "0x"}"#).is_err());
        assert!(parse_abi_document("42").is_err());
        assert!(parse_abi_document("not json").is_err());
    }

    #[tokio::test]
    async fn test_manual_abi_addition() {
        let temp_dir = tempdir().unwrap();
        let mut resolver = resolver(temp_dir.path());
        let abi = SonmContract::SnmMasterchain.abi().unwrap();

        resolver.add_manual_abi("0xABC", Some("local"), abi.clone());

        assert!(resolver.resolved.contains_key(&cache_key("0xabc", Some("local"))));
        assert!(!resolver.resolved.contains_key(&cache_key("0xabc", Some("sepolia"))));
        let retrieved = resolver.get_abi("0xAbC", Some("local")).await.unwrap();
        assert_eq!(retrieved, abi);
    }

    #[tokio::test]
    async fn test_disk_cache_round_trip() {
        let temp_dir = tempdir().unwrap();
        let abi = SonmContract::Blacklist.abi().unwrap();

        let writer = resolver(temp_dir.path());
        let key = cache_key(BLACKLIST, Some("ethereum"));
        writer.write_cache(&key, &abi).await.unwrap();

        // A fresh resolver finds it on disk without going to the network.
        let mut reader = resolver(temp_dir.path());
        assert!(reader.cache_path(&key).exists());
        assert_eq!(reader.get_abi(BLACKLIST, None).await.unwrap(), abi);
        assert!(reader.resolved.contains_key(&key));
    }

    #[tokio::test]
    async fn test_abi_file_registration() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("Gatekeeper.json");
        fs::write(&path, SonmContract::Gatekeeper.abi_json())
            .await
            .unwrap();

        let mut resolver = resolver(&temp_dir.path().join("cache"));
        let abi = resolver
            .add_abi_file("0x01", Some("local"), &path)
            .await
            .unwrap();
        assert!(abi.event("PayoutTx").is_some());
        assert!(resolver.resolved.contains_key(&cache_key("0x01", Some("local"))));

        assert!(load_abi_file(temp_dir.path().join("missing.json"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unsupported_etherscan_network() {
        let temp_dir = tempdir().unwrap();
        let mut resolver = resolver(temp_dir.path());
        let err = resolver.get_abi(BLACKLIST, Some("local")).await.unwrap_err();
        assert!(err.to_string().contains("Unsupported network"));
    }
}
