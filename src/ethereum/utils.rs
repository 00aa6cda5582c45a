use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};
use std::str::FromStr;

use super::BindingError;

/// Parses a `0x`-prefixed, 40 hex digit account address.
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    let Some(hex_part) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return Err(anyhow!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        ));
    };

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address: '{}'. Expected 0x followed by 40 hexadecimal characters",
            address
        ));
    }

    Address::from_str(address)
        .map_err(|e| anyhow!("Invalid Ethereum address: '{}'. Error: {}", address, e))
}

pub fn validate_network(network: &str, available_networks: &[String]) -> Result<()> {
    if network.is_empty() {
        return Err(anyhow!("Network name cannot be empty"));
    }

    if !available_networks.iter().any(|n| n == network) {
        let mut known = available_networks.to_vec();
        known.sort();
        return Err(anyhow!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            known.join(", ")
        ));
    }

    Ok(())
}

/// Checks that `name` is a Solidity identifier, optionally followed by a
/// parameter type list as in `transfer(address,uint256)`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let name = match name.split_once('(') {
        Some((base, types)) => {
            let valid_types = types.strip_suffix(')').is_some_and(|types| {
                types
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "[](),".contains(c))
            });
            if !valid_types {
                return Err(anyhow!(
                    "Invalid signature: '{}'. Expected name(type,...) without spaces",
                    name
                ));
            }
            base
        }
        None => name,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(anyhow!("Method or event name cannot be empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_' || c == '$') => {
            return Err(anyhow!(
                "Invalid name: '{}'. Names must start with a letter, '_' or '$'",
                name
            ))
        }
        Some(_) => {}
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(anyhow!(
            "Invalid name: '{}'. Names can only contain letters, digits, '_' and '$'",
            name
        ));
    }

    Ok(())
}

/// Parses a wei amount given in decimal or as `0x` hex.
pub fn parse_wei(value: &str) -> Result<U256> {
    let value = value.trim();
    if value.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => U256::from_str_radix(hex, 16)
            .map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value)),
        None => U256::from_str_radix(value, 10).map_err(|_| {
            anyhow!(
                "Invalid numeric value: '{}'. Use decimal wei or '0x' prefixed hex",
                value
            )
        }),
    }
}

const RPC_HINTS: &[(&str, &str)] = &[
    (
        "execution reverted",
        "The contract reverted execution. Its requirements were not met or the caller is not allowed to do this.",
    ),
    (
        "insufficient funds",
        "Insufficient funds to cover value and gas costs.",
    ),
    (
        "gas required exceeds allowance",
        "Gas limit too low. Try increasing the gas limit for this transaction.",
    ),
    (
        "nonce too low",
        "Nonce too low. Another transaction was already mined with this nonce.",
    ),
    (
        "replacement transaction underpriced",
        "Gas price too low to replace a pending transaction.",
    ),
    (
        "unknown account",
        "The node does not manage the sending account. Configure a private key to sign locally.",
    ),
    (
        "filter not found",
        "The node dropped the log filter. Start the subscription again.",
    ),
    (
        "connection refused",
        "Cannot connect to the RPC endpoint. Check the RPC URL configuration.",
    ),
    (
        "timeout",
        "The request timed out. The RPC endpoint may be overloaded or unreachable.",
    ),
    (
        "rate limit",
        "Too many requests to the RPC endpoint. Try again in a few moments.",
    ),
    (
        "method not found",
        "The RPC endpoint does not support this method.",
    ),
];

/// Turns a node or transport error message into a hint for the user.
pub fn interpret_rpc_error(error: &str) -> String {
    let lowered = error.to_lowercase();
    RPC_HINTS
        .iter()
        .find(|(needle, _)| lowered.contains(needle))
        .map(|(_, hint)| format!("{} ({})", hint, error))
        .unwrap_or_else(|| format!("RPC error: {}", error))
}

/// Describes a binding failure for command line output.
pub fn interpret_binding_error(error: &BindingError) -> String {
    match error {
        BindingError::Backend(source) => interpret_rpc_error(&source.to_string()),
        BindingError::NoCode => {
            "No contract code at the target address. Check the address and the selected network."
                .to_string()
        }
        BindingError::TransactionFailed(hash) => {
            format!("Transaction {} failed: it was mined but reverted", hash)
        }
        other => other.to_string(),
    }
}

pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("not verified") || error.contains("404") {
        format!(
            "The contract at {} is not verified on Etherscan. Pass its ABI with --abi or pick a SONM contract by name.",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "Too many requests to the Etherscan API. Try again later or set ETHERSCAN_API_KEY."
            .to_string()
    } else if error.contains("Unsupported network") {
        format!(
            "No ABI source for {} on this network. Pass its ABI with --abi.",
            contract_address
        )
    } else {
        format!("ABI resolution error: {}", error)
    }
}
