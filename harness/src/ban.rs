//! Ban patterns and the collapsing ban list.
//!
//! A pattern is a single address or a CIDR range. The list never holds two
//! entries where one contains the other: adding a range absorbs the entries
//! inside it, and adding anything already covered changes nothing.

use {
    crate::error::HarnessError,
    std::{
        collections::BTreeSet,
        fmt,
        net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
        str::FromStr,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BanPattern {
    network: IpAddr,
    prefix: u8,
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask_v4(prefix: u8) -> u32 {
    u32::MAX
        .checked_shl(u32::from(32u8.saturating_sub(prefix)))
        .unwrap_or(0)
}

fn mask_v6(prefix: u8) -> u128 {
    u128::MAX
        .checked_shl(u32::from(128u8.saturating_sub(prefix)))
        .unwrap_or(0)
}

fn apply_mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask_v4(prefix))),
        IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask_v6(prefix))),
    }
}

impl BanPattern {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, HarnessError> {
        if prefix > max_prefix(&addr) {
            return Err(HarnessError::InvalidBanPattern {
                pattern: format!("{addr}/{prefix}"),
                reason: format!("prefix longer than {}", max_prefix(&addr)),
            });
        }
        Ok(Self {
            network: apply_mask(addr, prefix),
            prefix,
        })
    }

    pub fn single(addr: IpAddr) -> Self {
        Self {
            network: addr,
            prefix: max_prefix(&addr),
        }
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_single(&self) -> bool {
        self.prefix == max_prefix(&self.network)
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.network.is_ipv4() == ip.is_ipv4() && apply_mask(ip, self.prefix) == self.network
    }

    /// Whether every address matched by `other` is matched by `self`.
    /// A pattern contains itself.
    pub fn contains(&self, other: &BanPattern) -> bool {
        self.prefix <= other.prefix && self.contains_ip(other.network)
    }

    /// Matches a peer address as `getpeerinfo` reports it (`ip:port`,
    /// `[ip]:port` or a bare ip).
    pub fn matches_addr(&self, addr: &str) -> bool {
        let ip = addr
            .parse::<SocketAddr>()
            .map(|socket| socket.ip())
            .or_else(|_| addr.parse::<IpAddr>());
        ip.is_ok_and(|ip| self.contains_ip(ip))
    }
}

impl fmt::Display for BanPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for BanPattern {
    type Err = HarnessError;

    /// Accepts `addr`, `addr/prefix` and `addr/netmask`, the forms
    /// `setban` and `listbanned` use.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| HarnessError::InvalidBanPattern {
            pattern: s.to_string(),
            reason: reason.to_string(),
        };
        let (addr, suffix) = match s.trim().split_once('/') {
            Some((addr, suffix)) => (addr, Some(suffix)),
            None => (s.trim(), None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid("not an IP address"))?;
        let Some(suffix) = suffix else {
            return Ok(Self::single(addr));
        };
        if let Ok(prefix) = suffix.parse::<u8>() {
            return Self::new(addr, prefix).map_err(|_| invalid("prefix out of range"));
        }
        let prefix = match (addr, suffix.parse::<IpAddr>()) {
            (IpAddr::V4(_), Ok(IpAddr::V4(mask))) => {
                let bits = u32::from(mask);
                let prefix = u8::try_from(bits.leading_ones()).unwrap_or(u8::MAX);
                (mask_v4(prefix) == bits).then_some(prefix)
            }
            (IpAddr::V6(_), Ok(IpAddr::V6(mask))) => {
                let bits = u128::from(mask);
                let prefix = u8::try_from(bits.leading_ones()).unwrap_or(u8::MAX);
                (mask_v6(prefix) == bits).then_some(prefix)
            }
            _ => None,
        };
        let prefix = prefix.ok_or_else(|| invalid("netmask is not a contiguous prefix"))?;
        Self::new(addr, prefix)
    }
}

/// Effect of a ban list mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanChange {
    /// New entry; `superseded` were inside it and are gone.
    Added { superseded: Vec<BanPattern> },
    /// Nothing changed: `by` already covers the pattern.
    AlreadyCovered { by: BanPattern },
    Removed,
    /// The pattern is not an entry but lies inside range `by`, which stays.
    CoveredByRange { by: BanPattern },
    NotPresent,
}

impl BanChange {
    /// Whether the list was modified.
    pub fn is_effective(&self) -> bool {
        matches!(self, Self::Added { .. } | Self::Removed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanList {
    entries: BTreeSet<BanPattern>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pattern: BanPattern) -> BanChange {
        if let Some(by) = self.covering(&pattern) {
            return BanChange::AlreadyCovered { by };
        }
        let superseded: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| pattern.contains(entry))
            .copied()
            .collect();
        for entry in &superseded {
            self.entries.remove(entry);
        }
        self.entries.insert(pattern);
        BanChange::Added { superseded }
    }

    /// Removes exactly `pattern`. Entries absorbed when a wider range was
    /// added do not come back when that range is removed.
    pub fn remove(&mut self, pattern: &BanPattern) -> BanChange {
        if self.entries.remove(pattern) {
            return BanChange::Removed;
        }
        match self.covering(pattern) {
            Some(by) => BanChange::CoveredByRange { by },
            None => BanChange::NotPresent,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The entry containing `pattern`, if any.
    pub fn covering(&self, pattern: &BanPattern) -> Option<BanPattern> {
        self.entries
            .iter()
            .find(|entry| entry.contains(pattern))
            .copied()
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|entry| entry.contains_ip(ip))
    }

    pub fn bans_addr(&self, addr: &str) -> bool {
        self.entries.iter().any(|entry| entry.matches_addr(addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BanPattern> {
        self.entries.iter()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

impl FromIterator<BanPattern> for BanList {
    fn from_iter<I: IntoIterator<Item = BanPattern>>(iter: I) -> Self {
        let mut list = Self::new();
        for pattern in iter {
            list.add(pattern);
        }
        list
    }
}
