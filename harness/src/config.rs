//! Harness configuration.

use {
    crate::error::{HarnessError, Result},
    std::{env, path::PathBuf, time::Duration},
};

/// Timing, port and binary settings shared by every component.
///
/// All waits in the harness are bounded by one of these timeouts and poll
/// on `poll_interval`; nothing sleeps for an unbounded period.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Daemon binary launched by [`crate::daemon::DaemonLauncher`].
    /// Default: `zcashd` from `PATH`.
    pub daemon_binary: PathBuf,

    pub rpc_user: String,
    pub rpc_password: String,

    /// Node `i` listens for peers on `base_p2p_port + i + port_seed`.
    pub base_p2p_port: u16,

    /// Node `i` serves RPC on `base_rpc_port + i + port_seed`.
    pub base_rpc_port: u16,

    /// Offset keeping concurrent harness runs apart. Default: `pid % 999`.
    pub port_seed: u16,

    /// Interval between probes of every polling loop.
    pub poll_interval: Duration,

    /// How long a started node may take to answer RPC.
    pub startup_timeout: Duration,

    /// How long a stopping node may take to exit before it is killed.
    pub shutdown_timeout: Duration,

    /// Default bound for block and mempool convergence.
    pub convergence_timeout: Duration,

    /// Default bound for async wallet operations. Proof generation makes
    /// these the slowest waits in a scenario.
    pub operation_timeout: Duration,

    /// Bound on topology changes (connect, disconnect, ban) becoming
    /// visible in `getpeerinfo`.
    pub settle_window: Duration,

    /// Per-request HTTP timeout.
    pub rpc_timeout: Duration,

    /// Leave node data directories on disk when the cluster is dropped.
    pub keep_datadirs: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            daemon_binary: PathBuf::from("zcashd"),
            rpc_user: "rt".to_string(),
            rpc_password: "rt".to_string(),
            base_p2p_port: 11_000,
            base_rpc_port: 12_000,
            port_seed: default_port_seed(),
            poll_interval: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
            convergence_timeout: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(300),
            settle_window: Duration::from_secs(5),
            rpc_timeout: Duration::from_secs(30),
            keep_datadirs: false,
        }
    }
}

fn default_port_seed() -> u16 {
    u16::try_from(std::process::id() % 999).unwrap_or(0)
}

impl HarnessConfig {
    /// Short timeouts for in-process nodes that answer instantly.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            startup_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(2),
            convergence_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
            settle_window: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Defaults overridden by `ZQA_*` environment variables. Durations use
    /// humantime syntax (`250ms`, `2m`).
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(binary) = lookup("ZQA_DAEMON") {
            self.daemon_binary = PathBuf::from(binary);
        }
        if let Some(user) = lookup("ZQA_RPC_USER") {
            self.rpc_user = user;
        }
        if let Some(password) = lookup("ZQA_RPC_PASSWORD") {
            self.rpc_password = password;
        }
        if let Some(seed) = lookup("ZQA_PORT_SEED") {
            self.port_seed = seed
                .parse()
                .map_err(|err| HarnessError::Config(format!("ZQA_PORT_SEED={seed}: {err}")))?;
        }
        let durations: [(&str, &mut Duration); 7] = [
            ("ZQA_POLL_INTERVAL", &mut self.poll_interval),
            ("ZQA_STARTUP_TIMEOUT", &mut self.startup_timeout),
            ("ZQA_SHUTDOWN_TIMEOUT", &mut self.shutdown_timeout),
            ("ZQA_CONVERGENCE_TIMEOUT", &mut self.convergence_timeout),
            ("ZQA_OPERATION_TIMEOUT", &mut self.operation_timeout),
            ("ZQA_SETTLE_WINDOW", &mut self.settle_window),
            ("ZQA_RPC_TIMEOUT", &mut self.rpc_timeout),
        ];
        for (key, slot) in durations {
            if let Some(text) = lookup(key) {
                *slot = humantime::parse_duration(&text)
                    .map_err(|err| HarnessError::Config(format!("{key}={text}: {err}")))?;
            }
        }
        if let Some(keep) = lookup("ZQA_KEEP_DATADIRS") {
            self.keep_datadirs = matches!(keep.as_str(), "1" | "true" | "yes");
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(HarnessError::Config("poll interval must be non-zero".into()));
        }
        let bounded = [
            ("startup timeout", self.startup_timeout),
            ("shutdown timeout", self.shutdown_timeout),
            ("convergence timeout", self.convergence_timeout),
            ("operation timeout", self.operation_timeout),
            ("settle window", self.settle_window),
        ];
        for (name, timeout) in bounded {
            if timeout < self.poll_interval {
                return Err(HarnessError::Config(format!(
                    "{name} {} is shorter than the poll interval {}",
                    humantime::format_duration(timeout),
                    humantime::format_duration(self.poll_interval),
                )));
            }
        }
        Ok(())
    }

    pub fn p2p_port(&self, index: usize) -> Result<u16> {
        self.port(self.base_p2p_port, index)
    }

    pub fn rpc_port(&self, index: usize) -> Result<u16> {
        self.port(self.base_rpc_port, index)
    }

    fn port(&self, base: u16, index: usize) -> Result<u16> {
        u16::try_from(index)
            .ok()
            .and_then(|index| base.checked_add(index))
            .and_then(|port| port.checked_add(self.port_seed))
            .ok_or_else(|| HarnessError::Config(format!("no port left for node {index}")))
    }
}
