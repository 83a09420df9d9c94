//! Peer links and bans between managed nodes.
//!
//! [`Topology`] is the harness's model of what it asked for: the directed
//! `addnode` links it issued and, per node, the collapsed ban list.
//! [`TopologyController`] issues the commands and waits for their effect to
//! show up in `getpeerinfo`, which happens asynchronously.

use {
    crate::{
        ban::{BanChange, BanList, BanPattern},
        config::HarnessConfig,
        error::{HarnessError, Result},
        node::Node,
        poll::{poll_until, PollOutcome, PollSchedule},
    },
    log::{debug, info},
    std::collections::{BTreeMap, BTreeSet},
    zqa_rpc_client::NodeRpc,
    zqa_rpc_types::BanMode,
};

#[derive(Debug, Clone, Default)]
pub struct Topology {
    /// Outbound links `(from, to)`.
    links: BTreeSet<(usize, usize)>,
    bans: BTreeMap<usize, BanList>,
}

impl Topology {
    pub fn add_link(&mut self, from: usize, to: usize) -> bool {
        self.links.insert((from, to))
    }

    pub fn remove_link(&mut self, from: usize, to: usize) -> bool {
        self.links.remove(&(from, to))
    }

    pub fn has_link(&self, from: usize, to: usize) -> bool {
        self.links.contains(&(from, to))
    }

    /// Whether a link exists in either direction.
    pub fn is_connected(&self, a: usize, b: usize) -> bool {
        self.has_link(a, b) || self.has_link(b, a)
    }

    pub fn neighbours(&self, node: usize) -> BTreeSet<usize> {
        self.links
            .iter()
            .filter_map(|&(from, to)| {
                if from == node {
                    Some(to)
                } else if to == node {
                    Some(from)
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn links(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.links.iter().copied()
    }

    /// Drops every link touching `node` (it stopped or was isolated).
    pub fn isolate(&mut self, node: usize) {
        self.links.retain(|&(from, to)| from != node && to != node);
    }

    pub fn bans(&self, node: usize) -> Option<&BanList> {
        self.bans.get(&node)
    }

    pub fn bans_mut(&mut self, node: usize) -> &mut BanList {
        self.bans.entry(node).or_default()
    }
}

pub struct TopologyController {
    topology: Topology,
    addresses: BTreeMap<usize, String>,
    settle: PollSchedule,
}

impl TopologyController {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            topology: Topology::default(),
            addresses: BTreeMap::new(),
            settle: PollSchedule::new(config.poll_interval, config.settle_window),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Records the address peers use to reach `node`.
    pub fn register<R>(&mut self, node: &Node<R>) {
        self.addresses.insert(node.index(), node.spec().p2p_addr());
    }

    pub fn address_of(&self, node: usize) -> Result<&str> {
        self.addresses
            .get(&node)
            .map(String::as_str)
            .ok_or(HarnessError::UnknownNode {
                node,
                count: self.addresses.len(),
            })
    }

    /// Forgets the links of a node that went down. Its bans are kept:
    /// zcashd persists them in `banlist.dat`.
    pub fn node_stopped(&mut self, node: usize) {
        self.topology.isolate(node);
    }

    /// Connects `a` to `b` (and `b` to `a` when `bidirectional`) and waits
    /// until each link has completed its handshake. Links already up are
    /// left alone.
    pub fn connect<R: NodeRpc>(&mut self, a: &Node<R>, b: &Node<R>, bidirectional: bool) -> Result<()> {
        self.connect_one(a, b)?;
        if bidirectional {
            self.connect_one(b, a)?;
        }
        Ok(())
    }

    fn connect_one<R: NodeRpc>(&mut self, from: &Node<R>, to: &Node<R>) -> Result<()> {
        let (from_index, to_index) = (from.index(), to.index());
        let addr = self.address_of(to_index)?.to_string();
        if self.handshaked_with(from, &addr)? {
            debug!("node{from_index}: already connected to node{to_index}");
            self.topology.add_link(from_index, to_index);
            return Ok(());
        }
        from.rpc()?
            .addnode(&addr, "onetry")
            .map_err(|err| HarnessError::rpc(from_index, "addnode", err))?;
        self.settle_on(from_index, format!("handshake with {addr}"), || {
            self.handshaked_with(from, &addr)
        })?;
        self.topology.add_link(from_index, to_index);
        info!("node{from_index} -> node{to_index} connected");
        Ok(())
    }

    fn handshaked_with<R: NodeRpc>(&self, node: &Node<R>, addr: &str) -> Result<bool> {
        let peers = node
            .rpc()?
            .getpeerinfo()
            .map_err(|err| HarnessError::rpc(node.index(), "getpeerinfo", err))?;
        Ok(peers
            .iter()
            .any(|peer| peer.addr == addr && peer.is_handshaked()))
    }

    /// Drops `node`'s link to the peer at `addr` and waits until the peer
    /// is gone from `getpeerinfo`.
    pub fn disconnect_by_address<R: NodeRpc>(&mut self, node: &Node<R>, addr: &str) -> Result<()> {
        let index = node.index();
        node.rpc()?
            .disconnectnode(addr)
            .map_err(|err| HarnessError::rpc(index, "disconnectnode", err))?;
        self.await_peer_absent(node, addr)?;
        let targets: Vec<usize> = self
            .addresses
            .iter()
            .filter(|(_, known)| known.as_str() == addr)
            .map(|(&peer, _)| peer)
            .collect();
        for peer in targets {
            self.topology.remove_link(index, peer);
        }
        info!("node{index}: disconnected from {addr}");
        Ok(())
    }

    /// Adds or removes a ban on `node`.
    ///
    /// The model collapses bans the way the node does. When the model says
    /// the command changes nothing (pattern already covered, or not an entry
    /// on its own) a provider rejection is expected and swallowed; any other
    /// rejection is returned.
    pub fn ban<R: NodeRpc>(&mut self, node: &Node<R>, pattern: &str, mode: BanMode) -> Result<BanChange> {
        let index = node.index();
        let parsed: BanPattern = pattern.parse()?;
        let mut next = self.topology.bans(index).cloned().unwrap_or_default();
        let change = match mode {
            BanMode::Add => next.add(parsed),
            BanMode::Remove => next.remove(&parsed),
        };

        match node.rpc()?.setban(pattern, mode, None) {
            Ok(()) => {}
            Err(err) if !change.is_effective() && err.provider().is_some() => {
                debug!("node{index}: setban {pattern} {mode} rejected as expected ({change:?}): {err}");
            }
            Err(err) => return Err(HarnessError::rpc(index, "setban", err)),
        }

        if mode == BanMode::Add && change.is_effective() {
            let banned: Vec<usize> = self
                .addresses
                .iter()
                .filter(|(_, addr)| parsed.matches_addr(addr))
                .map(|(&peer, _)| peer)
                .collect();
            for peer in banned {
                self.topology.remove_link(index, peer);
                self.topology.remove_link(peer, index);
            }
        }
        *self.topology.bans_mut(index) = next;
        info!("node{index}: setban {pattern} {mode} -> {change:?}");
        Ok(change)
    }

    pub fn clear_bans<R: NodeRpc>(&mut self, node: &Node<R>) -> Result<()> {
        let index = node.index();
        node.rpc()?
            .clearbanned()
            .map_err(|err| HarnessError::rpc(index, "clearbanned", err))?;
        self.topology.bans_mut(index).clear();
        info!("node{index}: bans cleared");
        Ok(())
    }

    /// Bans as the node reports them.
    pub fn list_bans<R: NodeRpc>(&self, node: &Node<R>) -> Result<Vec<BanPattern>> {
        node.rpc()?
            .listbanned()
            .map_err(|err| HarnessError::rpc(node.index(), "listbanned", err))?
            .iter()
            .map(|entry| entry.address.parse())
            .collect()
    }

    /// Checks the node's ban list against the collapsed model.
    /// Both sides are compared as sets of patterns, so the order the node
    /// lists them in does not matter.
    pub fn verify_bans<R: NodeRpc>(&self, node: &Node<R>) -> Result<()> {
        let actual: BTreeSet<BanPattern> = self.list_bans(node)?.into_iter().collect();
        let expected: BTreeSet<BanPattern> = self
            .topology
            .bans(node.index())
            .map(|bans| bans.iter().copied().collect())
            .unwrap_or_default();
        if actual == expected {
            Ok(())
        } else {
            let strings = |set: &BTreeSet<BanPattern>| -> Vec<String> {
                set.iter().map(ToString::to_string).collect()
            };
            Err(HarnessError::BanMismatch {
                node: node.index(),
                expected: strings(&expected),
                actual: strings(&actual),
            })
        }
    }

    /// Current peer addresses of `node`.
    pub fn peers_of<R: NodeRpc>(&self, node: &Node<R>) -> Result<BTreeSet<String>> {
        Ok(node
            .rpc()?
            .getpeerinfo()
            .map_err(|err| HarnessError::rpc(node.index(), "getpeerinfo", err))?
            .into_iter()
            .map(|peer| peer.addr)
            .collect())
    }

    pub fn await_peer_present<R: NodeRpc>(&self, node: &Node<R>, addr: &str) -> Result<()> {
        self.settle_on(node.index(), format!("peer {addr} present"), || {
            Ok(self.peers_of(node)?.contains(addr))
        })
    }

    pub fn await_peer_absent<R: NodeRpc>(&self, node: &Node<R>, addr: &str) -> Result<()> {
        self.settle_on(node.index(), format!("peer {addr} absent"), || {
            Ok(!self.peers_of(node)?.contains(addr))
        })
    }

    pub fn await_peer_count<R: NodeRpc>(&self, node: &Node<R>, count: usize) -> Result<()> {
        self.settle_on(node.index(), format!("{count} peers"), || {
            Ok(self.peers_of(node)?.len() == count)
        })
    }

    fn settle_on(
        &self,
        node: usize,
        expectation: String,
        mut check: impl FnMut() -> Result<bool>,
    ) -> Result<()> {
        match poll_until(self.settle, |_| check().map(|done| done.then_some(())))? {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::TimedOut { waited, .. } => Err(HarnessError::SettleTimeout {
                node,
                expectation,
                waited,
            }),
        }
    }
}
