//! RPC access to a single zcashd node.
//!
//! [`NodeRpc`] is the seam the harness talks through: one required method,
//! [`NodeRpc::call`], plus typed wrappers for every command the harness
//! consumes. [`HttpRpcClient`] implements it over JSON-RPC 1.0 with basic
//! auth, the way `zcashd` serves it.

pub mod client;
pub mod error;
pub mod http;

pub use {
    client::{decode, NodeRpc},
    error::{codes, ProviderError, ProviderErrorKind, Result, RpcError},
    http::HttpRpcClient,
};
