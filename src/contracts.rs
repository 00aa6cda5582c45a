//! The SONM contracts shipped with the crate: ABI and creation bytecode for
//! each, embedded at compile time.

use std::{fmt, str::FromStr, sync::Arc};

use alloy::{
    dyn_abi::DynSolValue,
    json_abi::JsonAbi,
    primitives::{Address, Bytes},
};

use crate::ethereum::{
    deploy_contract, BindingError, BoundContract, ContractBackend, PendingTransaction,
    TransactOpts,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SonmContract {
    AutoPayout,
    Blacklist,
    DevicesStorage,
    Gatekeeper,
    SnmMasterchain,
    SimpleGatekeeperWithLimitLive,
    TestnetFaucet,
}

impl SonmContract {
    pub const ALL: [SonmContract; 7] = [
        SonmContract::AutoPayout,
        SonmContract::Blacklist,
        SonmContract::DevicesStorage,
        SonmContract::Gatekeeper,
        SonmContract::SnmMasterchain,
        SonmContract::SimpleGatekeeperWithLimitLive,
        SonmContract::TestnetFaucet,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SonmContract::AutoPayout => "AutoPayout",
            SonmContract::Blacklist => "Blacklist",
            SonmContract::DevicesStorage => "DevicesStorage",
            SonmContract::Gatekeeper => "Gatekeeper",
            SonmContract::SnmMasterchain => "SNMMasterchain",
            SonmContract::SimpleGatekeeperWithLimitLive => "SimpleGatekeeperWithLimitLive",
            SonmContract::TestnetFaucet => "TestnetFaucet",
        }
    }

    pub fn abi_json(self) -> &'static str {
        match self {
            SonmContract::AutoPayout => include_str!("../abi/AutoPayout.abi.json"),
            SonmContract::Blacklist => include_str!("../abi/Blacklist.abi.json"),
            SonmContract::DevicesStorage => include_str!("../abi/DevicesStorage.abi.json"),
            SonmContract::Gatekeeper => include_str!("../abi/Gatekeeper.abi.json"),
            SonmContract::SnmMasterchain => include_str!("../abi/SNMMasterchain.abi.json"),
            SonmContract::SimpleGatekeeperWithLimitLive => {
                include_str!("../abi/SimpleGatekeeperWithLimitLive.abi.json")
            }
            SonmContract::TestnetFaucet => include_str!("../abi/TestnetFaucet.abi.json"),
        }
    }

    /// Creation bytecode, `0x`-prefixed hex.
    pub fn bytecode_hex(self) -> &'static str {
        match self {
            SonmContract::AutoPayout => include_str!("../abi/AutoPayout.bin"),
            SonmContract::Blacklist => include_str!("../abi/Blacklist.bin"),
            SonmContract::DevicesStorage => include_str!("../abi/DevicesStorage.bin"),
            SonmContract::Gatekeeper => include_str!("../abi/Gatekeeper.bin"),
            SonmContract::SnmMasterchain => include_str!("../abi/SNMMasterchain.bin"),
            SonmContract::SimpleGatekeeperWithLimitLive => {
                include_str!("../abi/SimpleGatekeeperWithLimitLive.bin")
            }
            SonmContract::TestnetFaucet => include_str!("../abi/TestnetFaucet.bin"),
        }
    }

    pub fn abi(self) -> Result<JsonAbi, BindingError> {
        Ok(serde_json::from_str(self.abi_json())?)
    }

    pub fn bytecode(self) -> Result<Bytes, BindingError> {
        let hex_str = self.bytecode_hex().trim();
        Ok(hex::decode(hex_str.trim_start_matches("0x"))?.into())
    }

    /// Binds an instance deployed at `address`.
    pub fn bind(
        self,
        address: Address,
        backend: Arc<dyn ContractBackend>,
    ) -> Result<BoundContract, BindingError> {
        Ok(BoundContract::new(address, Arc::new(self.abi()?), backend))
    }

    /// Deploys a new instance with the given constructor arguments.
    pub async fn deploy(
        self,
        opts: &TransactOpts,
        params: &[DynSolValue],
        backend: Arc<dyn ContractBackend>,
    ) -> Result<(Address, PendingTransaction, BoundContract), BindingError> {
        deploy_contract(
            opts,
            Arc::new(self.abi()?),
            self.bytecode()?,
            params,
            backend,
        )
        .await
    }
}

impl fmt::Display for SonmContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SonmContract {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SonmContract::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let known: Vec<&str> = SonmContract::ALL.iter().map(|c| c.name()).collect();
                format!("Unknown contract '{}'. Known contracts: {}", s, known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::backend::MockContractBackend;
    use alloy::primitives::{address, b256, U256};

    #[test]
    fn test_embedded_artifacts_parse() {
        for contract in SonmContract::ALL {
            let abi = contract.abi().unwrap();
            assert!(abi.constructor().is_some(), "{} has no constructor", contract);
            assert!(abi.events().count() > 0, "{} has no events", contract);

            let code = contract.bytecode().unwrap();
            assert_eq!(code[0], 0x60, "{} bytecode", contract);
            assert!(code.len() > 100);
        }
        assert!(SonmContract::TestnetFaucet.abi().unwrap().fallback.is_some());
    }

    #[test]
    fn test_event_topics() {
        let known = [
            (
                SonmContract::SnmMasterchain,
                "Transfer",
                b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"),
            ),
            (
                SonmContract::SnmMasterchain,
                "Approval",
                b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925"),
            ),
            (
                SonmContract::Blacklist,
                "AddedToBlacklist",
                b256!("708802ac7da0a63d9f6b2df693b53345ad263e42d74c245110e1ec1e03a1567e"),
            ),
            (
                SonmContract::Blacklist,
                "RemovedFromBlacklist",
                b256!("576a9aef294e1b4baf3617fde4cbc80ba5344d5eb508222f29e558981704a457"),
            ),
            (
                SonmContract::SimpleGatekeeperWithLimitLive,
                "PayinTx",
                b256!("14312725abbc46ad798bc078b2663e1fcbace97be0247cd177176f3b4df2538e"),
            ),
            (
                SonmContract::SimpleGatekeeperWithLimitLive,
                "PayoutTx",
                b256!("731af16374848c2c73a6154fd410cb421138e7db45c5a904e5a475c756faa8d9"),
            ),
            (
                SonmContract::SimpleGatekeeperWithLimitLive,
                "CommitTx",
                b256!("65546c3bc3a77ffc91667da85018004299542e28a511328cfb4b3f86974902ee"),
            ),
            (
                SonmContract::Gatekeeper,
                "PayoutTx",
                b256!("731af16374848c2c73a6154fd410cb421138e7db45c5a904e5a475c756faa8d9"),
            ),
            (
                SonmContract::AutoPayout,
                "Suicide",
                b256!("a1ea9b09ea114021983e9ecf71cf2ffddfd80f5cb4f925e5bf24f9bdb5e55fde"),
            ),
            (
                SonmContract::Blacklist,
                "OwnershipTransferred",
                b256!("8be0079c531659141344cd1fd0a4f28419497f9722a3daafe3b4186f6b6457e0"),
            ),
            (
                SonmContract::TestnetFaucet,
                "OwnershipRenounced",
                b256!("f8df31144d9c2f0f6b59d69b8b98abd5459d07f2742c4df920b25aae33c64820"),
            ),
        ];

        for (contract, event, topic) in known {
            let abi = contract.abi().unwrap();
            let descriptor = &abi.event(event).unwrap()[0];
            assert_eq!(descriptor.selector(), topic, "{}.{}", contract, event);
        }
    }

    #[test]
    fn test_function_selectors() {
        let blacklist = SonmContract::Blacklist.abi().unwrap();
        assert_eq!(
            blacklist.function("Check").unwrap()[0].selector(),
            [0x96, 0x8f, 0x60, 0x0c]
        );
        let token = SonmContract::SnmMasterchain.abi().unwrap();
        assert_eq!(
            token.function("balanceOf").unwrap()[0].selector(),
            [0x70, 0xa0, 0x82, 0x31]
        );
    }

    #[test]
    fn test_contract_names() {
        for contract in SonmContract::ALL {
            assert_eq!(contract.name().parse::<SonmContract>().unwrap(), contract);
            assert_eq!(contract.to_string(), contract.name());
        }
        assert_eq!(
            "snmmasterchain".parse::<SonmContract>().unwrap(),
            SonmContract::SnmMasterchain
        );
        assert!("Market".parse::<SonmContract>().is_err());
    }

    #[tokio::test]
    async fn test_deploy_gatekeeper() {
        let from = address!("2000000000000000000000000000000000000002");
        let token = Address::repeat_byte(0x55);
        let expected_len = SonmContract::Gatekeeper.bytecode().unwrap().len() + 32;

        let mut backend = MockContractBackend::new();
        backend.expect_pending_nonce().returning(|_| Ok(1));
        backend.expect_suggest_gas_price().returning(|| Ok(20));
        backend.expect_estimate_gas().returning(|_| Ok(1_500_000));
        backend
            .expect_send_transaction()
            .withf(move |tx| {
                let input = tx.input.input().cloned().unwrap_or_default();
                input.len() == expected_len && input[input.len() - 20..] == token[..]
            })
            .returning(|_| Ok(Default::default()));

        let (address, pending, _) = SonmContract::Gatekeeper
            .deploy(
                &TransactOpts::new(from),
                &[DynSolValue::Address(token)],
                Arc::new(backend),
            )
            .await
            .unwrap();
        assert_eq!(address, from.create(1));
        assert_eq!(pending.value, U256::ZERO);

        let err = SonmContract::Gatekeeper
            .deploy(&TransactOpts::new(from), &[], Arc::new(MockContractBackend::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BindingError::Encode { .. }));
    }
}
