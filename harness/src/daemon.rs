//! Launching a real `zcashd` in regtest mode.

use {
    crate::{
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::{NodeProcess, NodeSpec},
        process::Launcher,
    },
    log::debug,
    std::{
        fs,
        process::{Command, Stdio},
    },
    zqa_rpc_client::HttpRpcClient,
};

/// Flags every node is started with, ahead of its own flags.
const BASE_FLAGS: [&str; 3] = ["-keypool=1", "-discover=0", "-rest"];

/// [`Launcher`] for the daemon binary named in [`HarnessConfig`].
pub struct DaemonLauncher {
    config: HarnessConfig,
}

impl DaemonLauncher {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    /// The `zcash.conf` written into a fresh data directory.
    pub fn config_file(&self, spec: &NodeSpec) -> String {
        format!(
            "regtest=1\n\
             showmetrics=0\n\
             rpcuser={}\n\
             rpcpassword={}\n\
             port={}\n\
             rpcport={}\n\
             listenonion=0\n",
            self.config.rpc_user, self.config.rpc_password, spec.p2p_port, spec.rpc_port,
        )
    }

    pub fn command(&self, spec: &NodeSpec) -> Command {
        let mut command = Command::new(&self.config.daemon_binary);
        command
            .arg(format!("-datadir={}", spec.datadir.display()))
            .args(BASE_FLAGS)
            .args(&spec.flags)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl Launcher for DaemonLauncher {
    type Rpc = HttpRpcClient;

    fn prepare(&self, spec: &NodeSpec) -> Result<()> {
        let io_err = |err| HarnessError::io(format!("preparing {}", spec.datadir.display()), err);
        fs::create_dir_all(&spec.datadir).map_err(io_err)?;
        let conf = spec.config_path();
        if !conf.exists() {
            fs::write(&conf, self.config_file(spec)).map_err(io_err)?;
            debug!("node{}: wrote {}", spec.index, conf.display());
        }
        Ok(())
    }

    fn spawn(&self, spec: &NodeSpec) -> Result<Box<dyn NodeProcess>> {
        let child = self
            .command(spec)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                node: spec.index,
                binary: self.config.daemon_binary.clone(),
                source,
            })?;
        Ok(Box::new(child))
    }

    fn connect(&self, spec: &NodeSpec) -> Result<HttpRpcClient> {
        HttpRpcClient::new(
            format!("http://127.0.0.1:{}", spec.rpc_port),
            &self.config.rpc_user,
            &self.config.rpc_password,
            self.config.rpc_timeout,
        )
        .map_err(|err| HarnessError::rpc(spec.index, "connect", err))
    }
}
