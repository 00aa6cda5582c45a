use thiserror::Error;

/// Errors produced by contract bindings, event decoding and log subscriptions.
#[derive(Error, Debug)]
pub enum BindingError {
    /// The ABI document could not be parsed.
    #[error("Failed to parse contract ABI: {0}")]
    AbiParse(#[from] serde_json::Error),

    /// The requested method is not part of the contract ABI.
    #[error("Method '{0}' not found in contract ABI")]
    UnknownMethod(String),

    /// The requested event is not part of the contract ABI.
    #[error("Event '{0}' not found in contract ABI")]
    UnknownEvent(String),

    /// An ABI type string could not be resolved.
    #[error("Invalid ABI type '{ty}': {reason}")]
    InvalidType { ty: String, reason: String },

    /// Arguments did not match the declared inputs.
    #[error("Failed to encode arguments for '{name}': {reason}")]
    Encode { name: String, reason: String },

    /// Returned data did not match the declared outputs.
    #[error("Failed to decode output of '{name}': {reason}")]
    DecodeOutput { name: String, reason: String },

    /// A log did not match the event schema it was decoded against.
    #[error("Failed to decode '{event}' log: {reason}")]
    DecodeLog { event: String, reason: String },

    /// A filter value cannot be turned into a topic.
    #[error("Indexed field '{field}' of type '{ty}' cannot be used as a topic filter")]
    UnsupportedTopic { field: String, ty: String },

    /// More filter rules than the event has indexed fields.
    #[error("Event '{event}' has {indexed} indexed fields, got {rules} topic rules")]
    TooManyTopicRules {
        event: String,
        indexed: usize,
        rules: usize,
    },

    /// There is no contract code at the target address.
    #[error("No contract code at given address")]
    NoCode,

    /// The contract bytecode is not valid hex.
    #[error("Invalid contract bytecode: {0}")]
    Bytecode(#[from] hex::FromHexError),

    /// The transaction was mined but reverted.
    #[error("Transaction {0} failed")]
    TransactionFailed(alloy::primitives::TxHash),

    /// The upstream log feed stopped delivering.
    #[error("Log subscription closed: {0}")]
    SubscriptionClosed(String),

    /// An error reported by the node or the transport.
    #[error("Backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BindingError {
    pub(crate) fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }

    pub(crate) fn decode_log(event: &str, reason: impl ToString) -> Self {
        Self::DecodeLog {
            event: event.to_string(),
            reason: reason.to_string(),
        }
    }
}
