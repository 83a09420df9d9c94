//! A managed node: its on-disk layout, OS process and RPC handle.

use {
    crate::error::{HarnessError, Result},
    std::{
        fmt, fs, io,
        path::{Path, PathBuf},
        process::Child,
    },
};

/// Lifecycle state of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    Stopped,
    Starting,
    Running,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
        })
    }
}

/// Static description of a node: where it lives and how it is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub index: usize,
    pub datadir: PathBuf,
    /// Launch flags in order, e.g. `-walletbroadcast=0`.
    pub flags: Vec<String>,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

impl NodeSpec {
    /// Per-network directory (`<datadir>/regtest`) holding the wallet, the
    /// debug log and the chain state.
    pub fn network_dir(&self) -> PathBuf {
        self.datadir.join("regtest")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.network_dir().join("wallet.dat")
    }

    pub fn debug_log_path(&self) -> PathBuf {
        self.network_dir().join("debug.log")
    }

    pub fn blocks_dir(&self) -> PathBuf {
        self.network_dir().join("blocks")
    }

    pub fn chainstate_dir(&self) -> PathBuf {
        self.network_dir().join("chainstate")
    }

    pub fn config_path(&self) -> PathBuf {
        self.datadir.join("zcash.conf")
    }

    /// Address peers use to reach this node.
    pub fn p2p_addr(&self) -> String {
        format!("127.0.0.1:{}", self.p2p_port)
    }

    /// Whether `name` (e.g. `-disablewallet`) is set, with or without a
    /// value.
    pub fn has_flag(&self, name: &str) -> bool {
        self.flags.iter().any(|flag| flag_matches(flag, name).is_some())
    }

    /// Value of the last occurrence of `name=value`.
    pub fn flag_value(&self, name: &str) -> Option<&str> {
        self.flags
            .iter()
            .rev()
            .find_map(|flag| flag_matches(flag, name).flatten())
    }
}

fn flag_matches<'a>(flag: &'a str, name: &str) -> Option<Option<&'a str>> {
    let rest = flag.strip_prefix(name)?;
    if rest.is_empty() {
        Some(None)
    } else {
        rest.strip_prefix('=').map(Some)
    }
}

/// OS-level handle on a running node.
pub trait NodeProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Reaps the process if it has exited.
    fn is_alive(&mut self) -> io::Result<bool>;

    /// Forcefully terminates the process and waits for it.
    fn kill(&mut self) -> io::Result<()>;
}

impl NodeProcess for Child {
    fn pid(&self) -> Option<u32> {
        Some(self.id())
    }

    fn is_alive(&mut self) -> io::Result<bool> {
        Ok(self.try_wait()?.is_none())
    }

    fn kill(&mut self) -> io::Result<()> {
        match Child::kill(self) {
            Ok(()) => self.wait().map(drop),
            // Already exited and reaped.
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A node managed by the harness. The node owns its process and its RPC
/// handle; both are present exactly while the node is not stopped.
pub struct Node<R> {
    pub(crate) spec: NodeSpec,
    pub(crate) state: NodeState,
    pub(crate) rpc: Option<R>,
    pub(crate) process: Option<Box<dyn NodeProcess>>,
}

impl<R> Node<R> {
    pub(crate) fn new(spec: NodeSpec) -> Self {
        Self {
            spec,
            state: NodeState::Stopped,
            rpc: None,
            process: None,
        }
    }

    pub fn index(&self) -> usize {
        self.spec.index
    }

    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == NodeState::Running
    }

    pub fn datadir(&self) -> &Path {
        &self.spec.datadir
    }

    pub fn flags(&self) -> &[String] {
        &self.spec.flags
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|process| process.pid())
    }

    /// RPC handle of a running node.
    pub fn rpc(&self) -> Result<&R> {
        match (&self.rpc, self.state) {
            (Some(rpc), NodeState::Running) => Ok(rpc),
            _ => Err(HarnessError::NotRunning {
                node: self.spec.index,
            }),
        }
    }

    /// Contents of `regtest/debug.log`.
    pub fn debug_log(&self) -> Result<String> {
        let path = self.spec.debug_log_path();
        fs::read_to_string(&path)
            .map_err(|err| HarnessError::io(format!("reading {}", path.display()), err))
    }
}

impl<R> fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("index", &self.spec.index)
            .field("state", &self.state)
            .field("datadir", &self.spec.datadir)
            .field("flags", &self.spec.flags)
            .field("pid", &self.pid())
            .finish()
    }
}
