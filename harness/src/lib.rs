//! Orchestration for multi-node zcashd regtest scenarios.
//!
//! A scenario starts a [`Cluster`] of nodes, wires them with the
//! [`TopologyController`], waits on the [`ConvergenceBarrier`] instead of
//! sleeping, resolves asynchronous wallet operations through the
//! [`AsyncOperationPoller`] and checks balances and pool totals with the
//! [`InvariantVerifier`]. Every wait is bounded; every failure is a typed
//! [`HarnessError`] naming the node and command involved.

pub mod async_op;
pub mod ban;
pub mod cluster;
pub mod config;
pub mod convergence;
pub mod daemon;
pub mod error;
pub mod invariants;
pub mod node;
pub mod poll;
pub mod process;
pub mod topology;


pub use {
    async_op::{AsyncOperationPoller, OperationOutcome},
    ban::{BanChange, BanList, BanPattern},
    cluster::Cluster,
    config::HarnessConfig,
    convergence::{ConvergenceBarrier, ConvergenceTarget},
    daemon::DaemonLauncher,
    error::{HarnessError, Result},
    invariants::{BalanceQuery, InvariantModel, InvariantVerifier, TotalField, SPROUT_POOL},
    node::{Node, NodeProcess, NodeSpec, NodeState},
    poll::{poll_until, PollOutcome, PollSchedule},
    process::{EraseScope, Launcher, ProcessController},
    topology::{Topology, TopologyController},
};
