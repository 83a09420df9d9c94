//! Error types for the regtest harness.
//!
//! Every variant carries the node index and, where it applies, the command
//! and the expected and observed values, so a failed scenario can be
//! diagnosed from the error alone.

use {
    std::{path::PathBuf, time::Duration},
    thiserror::Error,
    zqa_rpc_client::{ProviderError, RpcError},
    zqa_rpc_types::{Amount, OpId, OperationStatus},
};

/// Errors surfaced to a scenario by the harness.
#[derive(Error, Debug)]
pub enum HarnessError {
    // ── Process lifecycle ───────────────────────────────────────────────
    #[error("node{node}: RPC not ready after {waited:?} ({attempts} probes)")]
    StartupTimeout {
        node: usize,
        waited: Duration,
        attempts: u32,
    },

    #[error("node{node}: still running {waited:?} after stop; killed")]
    ShutdownTimeout { node: usize, waited: Duration },

    #[error("node{node}: process exited during startup")]
    ProcessExited { node: usize },

    #[error("node{node}: must be stopped to {action}")]
    NotStopped { node: usize, action: &'static str },

    #[error("node{node}: not running")]
    NotRunning { node: usize },

    #[error("node{node}: already running")]
    AlreadyRunning { node: usize },

    #[error("unknown node {node} (cluster has {count} nodes)")]
    UnknownNode { node: usize, count: usize },

    #[error("failed to launch node{node} with {binary:?}: {source}")]
    Spawn {
        node: usize,
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Waiting ─────────────────────────────────────────────────────────
    #[error("{observable} did not converge within {waited:?}; divergent nodes {divergent:?}: {detail}")]
    ConvergenceTimeout {
        observable: &'static str,
        divergent: Vec<usize>,
        waited: Duration,
        detail: String,
    },

    #[error("node{node}: {expectation} not observed within {waited:?}")]
    SettleTimeout {
        node: usize,
        expectation: String,
        waited: Duration,
    },

    #[error("convergence needs at least one node")]
    EmptyNodeSet,

    // ── Async operations ────────────────────────────────────────────────
    #[error("node{node}: operation {op} not terminal after {waited:?} ({attempts} polls)")]
    OperationTimeout {
        node: usize,
        op: OpId,
        waited: Duration,
        attempts: u32,
    },

    #[error("node{node}: operation {op} ended {actual}, expected {expected}{}", detail_suffix(.detail))]
    UnexpectedOperationStatus {
        node: usize,
        op: OpId,
        expected: OperationStatus,
        actual: OperationStatus,
        detail: Option<String>,
    },

    #[error("node{node}: operation {op} failed with {actual:?}, expected it to mention {expected:?}")]
    ErrorMismatch {
        node: usize,
        op: OpId,
        expected: String,
        actual: String,
    },

    #[error("node{node}: operation {op} was already resolved as {status}")]
    OperationAlreadyResolved {
        node: usize,
        op: OpId,
        status: OperationStatus,
    },

    #[error("node{node}: malformed result for operation {op}: {reason}")]
    MalformedOperation {
        node: usize,
        op: OpId,
        reason: String,
    },

    // ── Invariants ──────────────────────────────────────────────────────
    #[error("node{node}: {query} balance is {actual}, expected {expected}")]
    BalanceMismatch {
        node: usize,
        query: String,
        expected: Amount,
        actual: Amount,
    },

    #[error("node{node}: {pool} pool holds {actual}, expected {expected}")]
    PoolMismatch {
        node: usize,
        pool: String,
        expected: Amount,
        actual: Amount,
    },

    #[error("node{node}: {pool} pool value unavailable: {reason}")]
    PoolUnavailable {
        node: usize,
        pool: String,
        reason: String,
    },

    #[error("tracked balances sum to {actual}, expected {expected}")]
    ConservationMismatch { expected: Amount, actual: Amount },

    #[error("ledger overflow while {context}")]
    LedgerOverflow { context: String },

    // ── Topology ────────────────────────────────────────────────────────
    #[error("node{node}: bans {actual:?} differ from expected {expected:?}")]
    BanMismatch {
        node: usize,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("invalid ban pattern {pattern:?}: {reason}")]
    InvalidBanPattern { pattern: String, reason: String },

    // ── Plumbing ────────────────────────────────────────────────────────
    #[error("node{node}: {command} failed: {source}")]
    Rpc {
        node: usize,
        command: &'static str,
        #[source]
        source: RpcError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|detail| format!(" ({detail})"))
        .unwrap_or_default()
}

impl HarnessError {
    pub fn rpc(node: usize, command: &'static str, source: RpcError) -> Self {
        Self::Rpc {
            node,
            command,
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The provider rejection behind an RPC failure, if that is what this
    /// is. Scenarios use it to assert on expected rejections.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::Rpc { source, .. } => source.provider(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::StartupTimeout { .. }
                | Self::ShutdownTimeout { .. }
                | Self::ConvergenceTimeout { .. }
                | Self::SettleTimeout { .. }
                | Self::OperationTimeout { .. }
        )
    }
}

/// Convenience result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
