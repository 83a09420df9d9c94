//! Error types for node RPC calls.

use {
    serde::{Deserialize, Serialize},
    thiserror::Error,
};

/// JSON-RPC error codes used by zcashd (inherited from bitcoind).
pub mod codes {
    pub const RPC_MISC_ERROR: i64 = -1;
    pub const RPC_TYPE_ERROR: i64 = -3;
    pub const RPC_WALLET_ERROR: i64 = -4;
    pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
    pub const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
    pub const RPC_INVALID_PARAMETER: i64 = -8;
    pub const RPC_WALLET_DISABLED: i64 = -18;
    pub const RPC_CLIENT_NODE_ALREADY_ADDED: i64 = -23;
    pub const RPC_CLIENT_NODE_NOT_ADDED: i64 = -24;
    pub const RPC_VERIFY_REJECTED: i64 = -26;
    pub const RPC_IN_WARMUP: i64 = -28;
    pub const RPC_CLIENT_NODE_NOT_CONNECTED: i64 = -29;
    pub const RPC_CLIENT_INVALID_IP_OR_SUBNET: i64 = -30;
    pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
    pub const RPC_INTERNAL_ERROR: i64 = -32603;
}

/// Broad category of a provider rejection, derived from its code and
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    InsufficientFunds,
    InvalidAmount,
    InvalidParameter,
    InvalidAddress,
    FileExists,
    Wallet,
    AlreadyAdded,
    NotAdded,
    NotConnected,
    InvalidSubnet,
    Warmup,
    MethodNotFound,
    Other,
}

/// A command the node understood and refused.
///
/// Scenarios assert on these instead of treating them as harness failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.message.contains(needle)
    }

    pub fn kind(&self) -> ProviderErrorKind {
        use self::codes::*;

        if self.message.contains("overwrite existing file") {
            return ProviderErrorKind::FileExists;
        }
        match self.code {
            RPC_WALLET_INSUFFICIENT_FUNDS => ProviderErrorKind::InsufficientFunds,
            RPC_WALLET_ERROR if self.message.contains("Insufficient") => {
                ProviderErrorKind::InsufficientFunds
            }
            RPC_WALLET_ERROR | RPC_WALLET_DISABLED => ProviderErrorKind::Wallet,
            RPC_TYPE_ERROR => ProviderErrorKind::InvalidAmount,
            RPC_INVALID_PARAMETER => ProviderErrorKind::InvalidParameter,
            RPC_INVALID_ADDRESS_OR_KEY => ProviderErrorKind::InvalidAddress,
            RPC_CLIENT_NODE_ALREADY_ADDED => ProviderErrorKind::AlreadyAdded,
            RPC_CLIENT_NODE_NOT_ADDED => ProviderErrorKind::NotAdded,
            RPC_CLIENT_NODE_NOT_CONNECTED => ProviderErrorKind::NotConnected,
            RPC_CLIENT_INVALID_IP_OR_SUBNET => ProviderErrorKind::InvalidSubnet,
            RPC_IN_WARMUP => ProviderErrorKind::Warmup,
            RPC_METHOD_NOT_FOUND => ProviderErrorKind::MethodNotFound,
            _ => ProviderErrorKind::Other,
        }
    }
}

/// Failure of a single RPC call.
#[derive(Error, Debug)]
pub enum RpcError {
    /// The node answered with an error object.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The request never produced a JSON-RPC reply (refused connection,
    /// timeout, dropped socket, authentication failure).
    #[error("transport failure calling {method}: {reason}")]
    Transport { method: String, reason: String },

    /// The reply did not match the schema expected for the command.
    #[error("unexpected response to {method}: {reason}")]
    Schema { method: String, reason: String },
}

impl RpcError {
    pub fn transport(method: &str, reason: impl ToString) -> Self {
        Self::Transport {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn schema(method: &str, reason: impl ToString) -> Self {
        Self::Schema {
            method: method.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn provider(&self) -> Option<&ProviderError> {
        match self {
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_provider(self) -> Option<ProviderError> {
        match self {
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// The node is up but still loading (`-28`).
    pub fn is_warmup(&self) -> bool {
        self.provider()
            .is_some_and(|err| err.kind() == ProviderErrorKind::Warmup)
    }
}

/// Convenience result type for RPC calls.
pub type Result<T> = std::result::Result<T, RpcError>;
