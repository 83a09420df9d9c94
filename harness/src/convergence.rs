//! Waiting for nodes to agree.
//!
//! Nodes relay blocks and transactions asynchronously, so scenarios
//! synchronise through [`ConvergenceBarrier`] instead of sleeping: it
//! projects each node's state onto a [`ConvergenceTarget`] and polls until
//! every node reports the same one.

use {
    crate::{
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::Node,
        poll::{poll_until, PollOutcome, PollSchedule},
    },
    log::{debug, info},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt,
        time::{Duration, Instant},
    },
    zqa_rpc_client::NodeRpc,
    zqa_rpc_types::{BlockHash, TxId},
};

/// Projection of node state compared across nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConvergenceTarget {
    BestBlock { height: u64, hash: BlockHash },
    Mempool(BTreeSet<TxId>),
}

impl fmt::Display for ConvergenceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BestBlock { height, hash } => write!(f, "{height}/{hash}"),
            Self::Mempool(txids) => write!(f, "{} txs", txids.len()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observable {
    Blocks,
    Mempool,
}

impl Observable {
    fn name(self) -> &'static str {
        match self {
            Self::Blocks => "best block",
            Self::Mempool => "mempool",
        }
    }
}

pub struct ConvergenceBarrier {
    interval: Duration,
    default_timeout: Duration,
}

impl ConvergenceBarrier {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            interval: config.poll_interval,
            default_timeout: config.convergence_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn best_block<R: NodeRpc>(node: &Node<R>) -> Result<ConvergenceTarget> {
        let info = node
            .rpc()?
            .getblockchaininfo()
            .map_err(|err| HarnessError::rpc(node.index(), "getblockchaininfo", err))?;
        Ok(ConvergenceTarget::BestBlock {
            height: info.blocks,
            hash: info.bestblockhash,
        })
    }

    pub fn mempool<R: NodeRpc>(node: &Node<R>) -> Result<ConvergenceTarget> {
        let txids = node
            .rpc()?
            .getrawmempool()
            .map_err(|err| HarnessError::rpc(node.index(), "getrawmempool", err))?;
        Ok(ConvergenceTarget::Mempool(txids.into_iter().collect()))
    }

    /// Waits until every node reports the same best block height and hash.
    pub fn await_blocks_converged<R: NodeRpc>(
        &self,
        nodes: &[&Node<R>],
        timeout: Option<Duration>,
    ) -> Result<ConvergenceTarget> {
        let deadline = self.deadline(timeout);
        self.await_converged(nodes, Observable::Blocks, deadline)
    }

    /// Waits until every node holds the same set of mempool transactions.
    pub fn await_mempool_converged<R: NodeRpc>(
        &self,
        nodes: &[&Node<R>],
        timeout: Option<Duration>,
    ) -> Result<ConvergenceTarget> {
        let deadline = self.deadline(timeout);
        self.await_converged(nodes, Observable::Mempool, deadline)
    }

    /// Blocks then mempools, both under one deadline.
    pub fn await_all<R: NodeRpc>(&self, nodes: &[&Node<R>], timeout: Option<Duration>) -> Result<()> {
        let deadline = self.deadline(timeout);
        self.await_converged(nodes, Observable::Blocks, deadline)?;
        self.await_converged(nodes, Observable::Mempool, deadline)?;
        Ok(())
    }

    fn deadline(&self, timeout: Option<Duration>) -> Instant {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let now = Instant::now();
        now.checked_add(timeout).unwrap_or(now)
    }

    fn await_converged<R: NodeRpc>(
        &self,
        nodes: &[&Node<R>],
        observable: Observable,
        deadline: Instant,
    ) -> Result<ConvergenceTarget> {
        if nodes.is_empty() {
            return Err(HarnessError::EmptyNodeSet);
        }
        let mut last = Vec::new();
        let outcome = poll_until(PollSchedule::until(self.interval, deadline), |attempt| {
            last = nodes
                .iter()
                .map(|node| {
                    let target = match observable {
                        Observable::Blocks => Self::best_block(node)?,
                        Observable::Mempool => Self::mempool(node)?,
                    };
                    Ok((node.index(), target))
                })
                .collect::<Result<Vec<_>>>()?;
            let converged = last.windows(2).all(|pair| pair[0].1 == pair[1].1);
            debug!(
                "{} poll {attempt}: {}",
                observable.name(),
                if converged { "converged" } else { "diverged" }
            );
            Ok::<_, HarnessError>(converged.then(|| last[0].1.clone()))
        })?;

        match outcome {
            PollOutcome::Ready(target) => {
                info!("{} converged at {target} across {} nodes", observable.name(), nodes.len());
                Ok(target)
            }
            PollOutcome::TimedOut { waited, .. } => Err(HarnessError::ConvergenceTimeout {
                observable: observable.name(),
                divergent: divergent_nodes(&last),
                waited,
                detail: last
                    .iter()
                    .map(|(node, target)| format!("node{node}={target}"))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }
}

/// Nodes whose observation differs from the most common one. Ties go to
/// the greatest observation, which for best blocks is the highest tip.
pub fn divergent_nodes(observations: &[(usize, ConvergenceTarget)]) -> Vec<usize> {
    let mut counts: BTreeMap<&ConvergenceTarget, usize> = BTreeMap::new();
    for (_, target) in observations {
        let count = counts.entry(target).or_default();
        *count = count.saturating_add(1);
    }
    // `max_by_key` keeps the last maximum, and the map iterates in
    // ascending order, so ties resolve to the greatest target.
    let Some((mode, _)) = counts.into_iter().max_by_key(|(_, count)| *count) else {
        return Vec::new();
    };
    observations
        .iter()
        .filter(|(_, target)| target != mode)
        .map(|(node, _)| *node)
        .collect()
}
