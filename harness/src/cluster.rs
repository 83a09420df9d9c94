//! A set of regtest nodes driven as one unit.
//!
//! [`Cluster`] owns the data directories, the node handles and the
//! controllers, and offers the operations scenarios are written in terms
//! of. It is driven from a single thread; every wait is bounded by the
//! timeouts in [`HarnessConfig`].

use {
    crate::{
        async_op::{AsyncOperationPoller, OperationOutcome},
        ban::{BanChange, BanPattern},
        config::HarnessConfig,
        convergence::ConvergenceBarrier,
        error::{HarnessError, Result},
        invariants::{BalanceQuery, InvariantVerifier},
        node::{Node, NodeState},
        process::{EraseScope, Launcher, ProcessController},
        topology::TopologyController,
    },
    log::{info, warn},
    serde_json::Value,
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
    tempfile::TempDir,
    zqa_rpc_types::{Amount, BanMode, OpId, OperationError, OperationStatus, TxId},
};

/// Nodes on each side of [`Cluster::split_network`].
const SPLIT_HALVES: [&[usize]; 2] = [&[0, 1], &[2, 3]];

fn node_at<R>(nodes: &[Node<R>], index: usize) -> Result<&Node<R>> {
    nodes.get(index).ok_or(HarnessError::UnknownNode {
        node: index,
        count: nodes.len(),
    })
}

fn node_at_mut<R>(nodes: &mut [Node<R>], index: usize) -> Result<&mut Node<R>> {
    let count = nodes.len();
    nodes
        .get_mut(index)
        .ok_or(HarnessError::UnknownNode { node: index, count })
}

fn owned_flags(flags: &[&str]) -> Vec<String> {
    flags.iter().map(ToString::to_string).collect()
}

pub struct Cluster<L: Launcher> {
    controller: ProcessController<L>,
    nodes: Vec<Node<L::Rpc>>,
    topology: TopologyController,
    barrier: ConvergenceBarrier,
    poller: AsyncOperationPoller,
    verifier: InvariantVerifier,
    split: bool,
    root: Option<TempDir>,
}

impl<L: Launcher> Cluster<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let root = tempfile::Builder::new()
            .prefix("zqa-")
            .tempdir()
            .map_err(|err| HarnessError::io("creating cluster directory", err))?;
        info!("cluster root {}", root.path().display());
        Ok(Self {
            topology: TopologyController::new(&config),
            barrier: ConvergenceBarrier::new(&config),
            poller: AsyncOperationPoller::new(&config),
            verifier: InvariantVerifier::new(),
            controller: ProcessController::new(launcher, config),
            nodes: Vec::new(),
            split: false,
            root: Some(root),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        self.controller.config()
    }

    pub fn launcher(&self) -> &L {
        self.controller.launcher()
    }

    pub fn root(&self) -> &Path {
        self.root
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new("."))
    }

    /// Data directory of node `index`, whether or not it was started.
    pub fn datadir(&self, index: usize) -> PathBuf {
        self.root().join(format!("node{index}"))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Starts `count` new nodes. `extra_args[i]`, when present, are the
    /// flags of the i-th new node.
    pub fn start_nodes(&mut self, count: usize, extra_args: &[&[&str]]) -> Result<()> {
        let first = self.nodes.len();
        for offset in 0..count {
            let flags = extra_args.get(offset).copied().unwrap_or_default();
            self.start_node(first.saturating_add(offset), flags)?;
        }
        Ok(())
    }

    /// Starts node `index` with `flags`. The index is either the next new
    /// node or an existing stopped node, which keeps its data directory.
    pub fn start_node(&mut self, index: usize, flags: &[&str]) -> Result<()> {
        let flags = owned_flags(flags);
        if index == self.nodes.len() {
            let datadir = self.datadir(index);
            let node = self.controller.start(index, &datadir, &flags)?;
            self.topology.register(&node);
            self.nodes.push(node);
            return Ok(());
        }
        let node = node_at_mut(&mut self.nodes, index)?;
        if node.state() != NodeState::Stopped {
            return Err(HarnessError::AlreadyRunning { node: index });
        }
        node.spec.flags = flags;
        self.controller.relaunch(node)
    }

    pub fn node(&self, index: usize) -> Result<&Node<L::Rpc>> {
        node_at(&self.nodes, index)
    }

    pub fn nodes(&self) -> &[Node<L::Rpc>] {
        &self.nodes
    }

    pub fn rpc(&self, index: usize) -> Result<&L::Rpc> {
        self.node(index)?.rpc()
    }

    pub fn stop_node(&mut self, index: usize) -> Result<()> {
        self.controller.stop(node_at_mut(&mut self.nodes, index)?)?;
        self.topology.node_stopped(index);
        Ok(())
    }

    /// Stops every running node. All nodes are attempted; the first error
    /// is returned.
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for index in 0..self.nodes.len() {
            if self.nodes[index].state() == NodeState::Stopped {
                continue;
            }
            if let Err(err) = self.stop_node(index) {
                warn!("node{index}: {err}");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn kill_node(&mut self, index: usize) -> Result<()> {
        self.controller.kill(node_at_mut(&mut self.nodes, index)?)?;
        self.topology.node_stopped(index);
        Ok(())
    }

    pub fn restart_node(&mut self, index: usize) -> Result<()> {
        self.topology.node_stopped(index);
        self.controller.restart(node_at_mut(&mut self.nodes, index)?)
    }

    pub fn restart_node_with(&mut self, index: usize, flags: &[&str]) -> Result<()> {
        self.topology.node_stopped(index);
        self.controller
            .restart_with_flags(node_at_mut(&mut self.nodes, index)?, &owned_flags(flags))
    }

    pub fn erase_wallet_state(&self, index: usize, scope: EraseScope) -> Result<Vec<PathBuf>> {
        self.controller
            .erase_wallet_state(self.node(index)?, scope)
    }

    pub fn restore_wallet(&self, index: usize, backup: &Path) -> Result<()> {
        self.controller.restore_wallet(self.node(index)?, backup)
    }

    // ── Topology ────────────────────────────────────────────────────────

    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    /// Outbound link from `a` to `b`.
    pub fn connect(&mut self, a: usize, b: usize) -> Result<()> {
        let (from, to) = (node_at(&self.nodes, a)?, node_at(&self.nodes, b)?);
        self.topology.connect(from, to, false)
    }

    pub fn connect_bi(&mut self, a: usize, b: usize) -> Result<()> {
        let (from, to) = (node_at(&self.nodes, a)?, node_at(&self.nodes, b)?);
        self.topology.connect(from, to, true)
    }

    /// Drops whichever links exist between `a` and `b`.
    pub fn disconnect(&mut self, a: usize, b: usize) -> Result<()> {
        for (from, to) in [(a, b), (b, a)] {
            if !self.topology.topology().has_link(from, to) {
                continue;
            }
            let addr = self.topology.address_of(to)?.to_string();
            self.topology
                .disconnect_by_address(node_at(&self.nodes, from)?, &addr)?;
        }
        Ok(())
    }

    pub fn disconnect_by_address(&mut self, index: usize, addr: &str) -> Result<()> {
        self.topology
            .disconnect_by_address(node_at(&self.nodes, index)?, addr)
    }

    /// Links every node to the next one, both ways, and syncs.
    pub fn connect_chain(&mut self) -> Result<()> {
        for index in 1..self.nodes.len() {
            self.connect_bi(index.saturating_sub(1), index)?;
        }
        self.sync_all()
    }

    /// Cuts the 0-1-2-3 chain between nodes 1 and 2.
    pub fn split_network(&mut self) -> Result<()> {
        for &left in SPLIT_HALVES[0] {
            for &right in SPLIT_HALVES[1] {
                if left < self.nodes.len() && right < self.nodes.len() {
                    self.disconnect(left, right)?;
                }
            }
        }
        self.split = true;
        info!("network split into {:?}", SPLIT_HALVES);
        self.sync_all()
    }

    pub fn join_network(&mut self) -> Result<()> {
        self.connect_bi(1, 2)?;
        self.split = false;
        info!("network joined");
        self.sync_all()
    }

    pub fn is_split(&self) -> bool {
        self.split
    }

    pub fn ban(&mut self, index: usize, pattern: &str, mode: BanMode) -> Result<BanChange> {
        self.topology
            .ban(node_at(&self.nodes, index)?, pattern, mode)
    }

    pub fn clear_bans(&mut self, index: usize) -> Result<()> {
        self.topology.clear_bans(node_at(&self.nodes, index)?)
    }

    pub fn list_bans(&self, index: usize) -> Result<Vec<BanPattern>> {
        self.topology.list_bans(self.node(index)?)
    }

    pub fn verify_bans(&self, index: usize) -> Result<()> {
        self.topology.verify_bans(self.node(index)?)
    }

    pub fn peers_of(&self, index: usize) -> Result<BTreeSet<String>> {
        self.topology.peers_of(self.node(index)?)
    }

    pub fn await_peer_count(&self, index: usize, count: usize) -> Result<()> {
        self.topology.await_peer_count(self.node(index)?, count)
    }

    // ── Convergence ─────────────────────────────────────────────────────

    pub fn barrier(&self) -> &ConvergenceBarrier {
        &self.barrier
    }

    fn running_among(&self, indices: impl IntoIterator<Item = usize>) -> Vec<&Node<L::Rpc>> {
        indices
            .into_iter()
            .filter_map(|index| self.nodes.get(index))
            .filter(|node| node.is_running())
            .collect()
    }

    /// Running nodes grouped by the side of the split they are on.
    fn sync_groups(&self) -> Vec<Vec<&Node<L::Rpc>>> {
        let groups: Vec<Vec<_>> = if self.split {
            SPLIT_HALVES
                .iter()
                .map(|half| self.running_among(half.iter().copied()))
                .collect()
        } else {
            vec![self.running_among(0..self.nodes.len())]
        };
        groups
            .into_iter()
            .filter(|group| !group.is_empty())
            .collect()
    }

    pub fn sync_blocks(&self) -> Result<()> {
        for group in self.sync_groups() {
            self.barrier.await_blocks_converged(&group, None)?;
        }
        Ok(())
    }

    pub fn sync_mempools(&self) -> Result<()> {
        for group in self.sync_groups() {
            self.barrier.await_mempool_converged(&group, None)?;
        }
        Ok(())
    }

    pub fn sync_all(&self) -> Result<()> {
        for group in self.sync_groups() {
            self.barrier.await_all(&group, None)?;
        }
        Ok(())
    }

    /// Block convergence over an explicit subset of nodes.
    pub fn sync_blocks_among(&self, indices: &[usize]) -> Result<()> {
        let nodes = indices
            .iter()
            .map(|&index| self.node(index))
            .collect::<Result<Vec<_>>>()?;
        self.barrier.await_blocks_converged(&nodes, None).map(drop)
    }

    // ── Async operations ────────────────────────────────────────────────

    pub fn poller(&self) -> &AsyncOperationPoller {
        &self.poller
    }

    pub fn await_operation(
        &mut self,
        index: usize,
        op: &OpId,
        expected: OperationStatus,
        expected_error: Option<&str>,
    ) -> Result<OperationOutcome> {
        let node = node_at(&self.nodes, index)?;
        self.poller
            .await_result(node, op, None, expected, expected_error)
    }

    pub fn await_success(&mut self, index: usize, op: &OpId) -> Result<Value> {
        let node = node_at(&self.nodes, index)?;
        self.poller.await_success(node, op, None)
    }

    pub fn await_txid(&mut self, index: usize, op: &OpId) -> Result<TxId> {
        let node = node_at(&self.nodes, index)?;
        self.poller.await_txid(node, op, None)
    }

    pub fn await_failure(&mut self, index: usize, op: &OpId, substring: &str) -> Result<OperationError> {
        let node = node_at(&self.nodes, index)?;
        self.poller.await_failure(node, op, substring, None)
    }

    pub fn await_many(&mut self, index: usize, ops: &[OpId]) -> Result<BTreeMap<OpId, OperationOutcome>> {
        let node = node_at(&self.nodes, index)?;
        self.poller.await_many(node, ops, None)
    }

    // ── Invariants ──────────────────────────────────────────────────────

    pub fn verifier(&self) -> &InvariantVerifier {
        &self.verifier
    }

    pub fn verifier_mut(&mut self) -> &mut InvariantVerifier {
        &mut self.verifier
    }

    pub fn balance(&self, index: usize, query: &BalanceQuery) -> Result<Amount> {
        self.verifier.observe_balance(self.node(index)?, query)
    }

    pub fn assert_balance(&self, index: usize, query: &BalanceQuery, expected: Amount) -> Result<()> {
        self.verifier
            .assert_balance(self.node(index)?, query, expected)
    }

    pub fn assert_pool_total(&self, index: usize, pool: &str, expected: Amount) -> Result<()> {
        self.verifier
            .assert_pool_total(self.node(index)?, pool, expected)
    }

    /// Conservation over every running node.
    pub fn assert_conservation(&self, query: &BalanceQuery) -> Result<()> {
        let running: Vec<_> = self.nodes.iter().filter(|node| node.is_running()).collect();
        self.verifier.assert_conservation(&running, query)
    }
}

impl<L: Launcher> Drop for Cluster<L> {
    fn drop(&mut self) {
        for node in self.nodes.iter_mut().filter(|node| node.is_running()) {
            let index = node.index();
            if let Err(err) = self.controller.stop(node) {
                warn!("node{index}: stop during teardown failed: {err}");
            }
        }
        if self.controller.config().keep_datadirs {
            if let Some(root) = self.root.take() {
                info!("keeping cluster directory {}", root.keep().display());
            }
        }
    }
}
