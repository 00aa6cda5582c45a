pub mod abi;
pub mod backend;
pub mod codec;
pub mod contract;
pub mod error;
pub mod event;
pub mod iterator;
pub mod provider;
pub mod receipt;
pub mod subscription;
pub mod utils;

pub use backend::{AlloyBackend, ContractBackend};
pub use contract::{deploy_contract, BoundContract};
pub use error::BindingError;
pub use event::{DecodedEvent, EventField, EventSchema, LogDecoder, SolEventDecoder, TypedEvent};
pub use iterator::EventIterator;
pub use receipt::Receipt;
pub use subscription::{LogStream, Subscription};

use alloy::{
    eips::BlockId,
    primitives::{Address, TxHash, U256},
};
use serde::{Deserialize, Serialize};

/// Options for read-only contract calls.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    /// Query against the pending state instead of a mined block.
    pub pending: bool,
    /// Caller identity used for `msg.sender`.
    pub from: Option<Address>,
    /// Block to query; latest when unset.
    pub block_number: Option<u64>,
}

impl CallOpts {
    pub fn block_id(&self) -> BlockId {
        if self.pending {
            BlockId::pending()
        } else if let Some(number) = self.block_number {
            BlockId::number(number)
        } else {
            BlockId::latest()
        }
    }
}

/// Options for state-mutating transactions. Unset fields are filled from the
/// backend before sending.
#[derive(Debug, Clone, Default)]
pub struct TransactOpts {
    pub from: Address,
    pub nonce: Option<u64>,
    pub value: Option<U256>,
    pub gas_price: Option<u128>,
    pub gas_limit: Option<u64>,
}

impl TransactOpts {
    pub fn new(from: Address) -> Self {
        Self {
            from,
            ..Default::default()
        }
    }
}

/// Block range for historical log queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOpts {
    pub start: u64,
    /// Last block of the range; the chain head when unset.
    pub end: Option<u64>,
}

/// Options for live log subscriptions.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOpts {
    pub start: Option<u64>,
}

/// A transaction handed to the backend, not yet known to be mined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub hash: TxHash,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
}
