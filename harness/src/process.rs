//! Node process lifecycle: start, stop, restart and on-disk state surgery.

use {
    crate::{
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::{Node, NodeProcess, NodeSpec, NodeState},
        poll::{poll_until, PollOutcome, PollSchedule},
    },
    log::{debug, info, warn},
    std::{
        fs, io,
        path::{Path, PathBuf},
    },
    zqa_rpc_client::NodeRpc,
};

/// How a node binary is laid out on disk, spawned and reached.
///
/// [`crate::daemon::DaemonLauncher`] drives a real `zcashd`; tests can
/// substitute anything that behaves like a node behind [`NodeRpc`].
pub trait Launcher {
    type Rpc: NodeRpc;

    /// Creates the data directory and any configuration the node reads at
    /// startup. Called before every launch; must be idempotent.
    fn prepare(&self, spec: &NodeSpec) -> Result<()>;

    fn spawn(&self, spec: &NodeSpec) -> Result<Box<dyn NodeProcess>>;

    /// RPC handle for the node described by `spec`. The node need not be
    /// accepting connections yet.
    fn connect(&self, spec: &NodeSpec) -> Result<Self::Rpc>;
}

/// Which persisted state [`ProcessController::erase_wallet_state`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseScope {
    /// `regtest/wallet.dat`.
    Wallet,
    /// `regtest/blocks` and `regtest/chainstate`.
    ChainState,
    All,
}

pub struct ProcessController<L> {
    launcher: L,
    config: HarnessConfig,
}

impl<L: Launcher> ProcessController<L> {
    pub fn new(launcher: L, config: HarnessConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn node_spec(&self, index: usize, datadir: &Path, flags: &[String]) -> Result<NodeSpec> {
        Ok(NodeSpec {
            index,
            datadir: datadir.to_path_buf(),
            flags: flags.to_vec(),
            p2p_port: self.config.p2p_port(index)?,
            rpc_port: self.config.rpc_port(index)?,
        })
    }

    /// Launches node `index` and blocks until its RPC endpoint answers.
    pub fn start(&self, index: usize, datadir: &Path, flags: &[String]) -> Result<Node<L::Rpc>> {
        let mut node = Node::new(self.node_spec(index, datadir, flags)?);
        self.launch(&mut node)?;
        Ok(node)
    }

    /// Starts a stopped node again with its current spec.
    pub fn relaunch(&self, node: &mut Node<L::Rpc>) -> Result<()> {
        self.launch(node)
    }

    fn launch(&self, node: &mut Node<L::Rpc>) -> Result<()> {
        let index = node.index();
        if node.state != NodeState::Stopped {
            return Err(HarnessError::AlreadyRunning { node: index });
        }
        self.launcher.prepare(&node.spec)?;
        let mut process = self.launcher.spawn(&node.spec)?;
        node.state = NodeState::Starting;
        info!(
            "node{index}: starting in {} with {:?}",
            node.spec.datadir.display(),
            node.spec.flags
        );

        let rpc = match self.launcher.connect(&node.spec) {
            Ok(rpc) => rpc,
            Err(err) => {
                abort(index, process.as_mut());
                node.state = NodeState::Stopped;
                return Err(err);
            }
        };

        let schedule = PollSchedule::new(self.config.poll_interval, self.config.startup_timeout);
        let outcome = poll_until(schedule, |attempt| {
            let alive = process
                .is_alive()
                .map_err(|err| HarnessError::io(format!("node{index}: polling process"), err))?;
            if !alive {
                return Err(HarnessError::ProcessExited { node: index });
            }
            match rpc.getblockcount() {
                Ok(height) => Ok(Some(height)),
                Err(err) if err.is_transport() || err.is_warmup() => {
                    debug!("node{index}: not ready (attempt {attempt}): {err}");
                    Ok(None)
                }
                Err(err) => Err(HarnessError::rpc(index, "getblockcount", err)),
            }
        });

        match outcome {
            Ok(PollOutcome::Ready(height)) => {
                info!("node{index}: ready at height {height}");
                node.rpc = Some(rpc);
                node.process = Some(process);
                node.state = NodeState::Running;
                Ok(())
            }
            Ok(PollOutcome::TimedOut { waited, attempts }) => {
                abort(index, process.as_mut());
                node.state = NodeState::Stopped;
                Err(HarnessError::StartupTimeout {
                    node: index,
                    waited,
                    attempts,
                })
            }
            Err(err) => {
                abort(index, process.as_mut());
                node.state = NodeState::Stopped;
                Err(err)
            }
        }
    }

    /// Asks the node to shut down and waits for the process to exit. A node
    /// still alive after the shutdown timeout is killed and reported as
    /// [`HarnessError::ShutdownTimeout`].
    pub fn stop(&self, node: &mut Node<L::Rpc>) -> Result<()> {
        let index = node.index();
        if node.state == NodeState::Stopped {
            return Err(HarnessError::NotRunning { node: index });
        }
        let rpc = node.rpc.take();
        node.state = NodeState::Stopped;
        let Some(mut process) = node.process.take() else {
            return Err(HarnessError::NotRunning { node: index });
        };

        if let Some(rpc) = &rpc {
            match rpc.stop() {
                Ok(()) => {}
                Err(err) if err.is_transport() => {
                    debug!("node{index}: stop request dropped: {err}")
                }
                Err(err) => warn!("node{index}: stop request rejected: {err}"),
            }
        }

        let schedule = PollSchedule::new(self.config.poll_interval, self.config.shutdown_timeout);
        let outcome = poll_until(schedule, |_| {
            process
                .is_alive()
                .map(|alive| (!alive).then_some(()))
                .map_err(|err| HarnessError::io(format!("node{index}: polling process"), err))
        })?;
        match outcome {
            PollOutcome::Ready(()) => {
                info!("node{index}: stopped");
                Ok(())
            }
            PollOutcome::TimedOut { waited, .. } => {
                warn!("node{index}: still alive after {waited:?}, killing");
                abort(index, process.as_mut());
                Err(HarnessError::ShutdownTimeout {
                    node: index,
                    waited,
                })
            }
        }
    }

    /// Kills the process without a shutdown request, as a crash would.
    pub fn kill(&self, node: &mut Node<L::Rpc>) -> Result<()> {
        let index = node.index();
        let mut process = node
            .process
            .take()
            .ok_or(HarnessError::NotRunning { node: index })?;
        node.rpc = None;
        node.state = NodeState::Stopped;
        process
            .kill()
            .map_err(|err| HarnessError::io(format!("node{index}: killing process"), err))?;
        info!("node{index}: killed");
        Ok(())
    }

    /// Stop, then start with the same directory and flags.
    pub fn restart(&self, node: &mut Node<L::Rpc>) -> Result<()> {
        self.stop(node)?;
        self.launch(node)
    }

    /// Stop, then start with a new flag set.
    pub fn restart_with_flags(&self, node: &mut Node<L::Rpc>, flags: &[String]) -> Result<()> {
        self.stop(node)?;
        node.spec.flags = flags.to_vec();
        self.launch(node)
    }

    /// Deletes persisted wallet and/or chain state of a stopped node.
    /// Returns the paths removed.
    pub fn erase_wallet_state(&self, node: &Node<L::Rpc>, scope: EraseScope) -> Result<Vec<PathBuf>> {
        ensure_stopped(node, "erase wallet state")?;
        let spec = &node.spec;
        let targets = match scope {
            EraseScope::Wallet => vec![spec.wallet_path()],
            EraseScope::ChainState => vec![spec.blocks_dir(), spec.chainstate_dir()],
            EraseScope::All => vec![spec.wallet_path(), spec.blocks_dir(), spec.chainstate_dir()],
        };
        for path in &targets {
            remove_path(path)
                .map_err(|err| HarnessError::io(format!("removing {}", path.display()), err))?;
        }
        info!("node{}: erased {scope:?} state", spec.index);
        Ok(targets)
    }

    /// Copies `backup` over the wallet file of a stopped node.
    pub fn restore_wallet(&self, node: &Node<L::Rpc>, backup: &Path) -> Result<()> {
        ensure_stopped(node, "restore a wallet")?;
        let target = node.spec.wallet_path();
        fs::create_dir_all(node.spec.network_dir())
            .and_then(|()| fs::copy(backup, &target))
            .map_err(|err| {
                HarnessError::io(
                    format!("copying {} to {}", backup.display(), target.display()),
                    err,
                )
            })?;
        info!(
            "node{}: wallet restored from {}",
            node.spec.index,
            backup.display()
        );
        Ok(())
    }
}

fn ensure_stopped<R>(node: &Node<R>, action: &'static str) -> Result<()> {
    if node.state == NodeState::Stopped {
        Ok(())
    } else {
        Err(HarnessError::NotStopped {
            node: node.index(),
            action,
        })
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn abort(index: usize, process: &mut dyn NodeProcess) {
    if let Err(err) = process.kill() {
        warn!("node{index}: failed to kill process: {err}");
    }
}
