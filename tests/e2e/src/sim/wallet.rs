//! Deterministic key wallet of a simulated node.
//!
//! Keys are derived from a seed and an index, so the wallet file only has
//! to remember how far the pools have been drawn. A transparent key is
//! `tm` + seed + index, its secret `tsk` + the same digits; shielded keys
//! use `zt` and `zsk`, and a shielded viewing key is `zvk` + the digits.

use {
    super::chain::Tx,
    serde::{Deserialize, Serialize},
    std::collections::BTreeSet,
};

const TADDR_PREFIX: &str = "tm";
const ZADDR_PREFIX: &str = "zt";
const TSECRET_PREFIX: &str = "tsk";
const ZSECRET_PREFIX: &str = "zsk";
const ZVIEWING_PREFIX: &str = "zvk";
const BODY_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Transparent,
    Shielded,
}

/// Classifies a string as a transparent or shielded address.
pub fn address_kind(address: &str) -> Option<AddressKind> {
    let (kind, body) = if let Some(body) = address.strip_prefix(TADDR_PREFIX) {
        (AddressKind::Transparent, body)
    } else if let Some(body) = address.strip_prefix(ZADDR_PREFIX) {
        (AddressKind::Shielded, body)
    } else {
        return None;
    };
    let well_formed = body.len() == BODY_LEN
        && body
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    well_formed.then_some(kind)
}

fn key_body(seed: u64, index: u32) -> String {
    format!("{seed:016x}{index:08x}")
}

pub fn taddr(seed: u64, index: u32) -> String {
    format!("{TADDR_PREFIX}{}", key_body(seed, index))
}

pub fn zaddr(seed: u64, index: u32) -> String {
    format!("{ZADDR_PREFIX}{}", key_body(seed, index))
}

/// Address controlled by a dumped secret.
pub fn address_of_secret(secret: &str) -> Option<String> {
    let address = if let Some(body) = secret.strip_prefix(TSECRET_PREFIX) {
        format!("{TADDR_PREFIX}{body}")
    } else if let Some(body) = secret.strip_prefix(ZSECRET_PREFIX) {
        format!("{ZADDR_PREFIX}{body}")
    } else {
        return None;
    };
    address_kind(&address).is_some().then_some(address)
}

/// Shielded address a viewing key reveals.
pub fn address_of_viewing_key(key: &str) -> Option<String> {
    let address = format!("{ZADDR_PREFIX}{}", key.strip_prefix(ZVIEWING_PREFIX)?);
    (address_kind(&address) == Some(AddressKind::Shielded)).then_some(address)
}

fn secret_of(address: &str) -> Option<String> {
    match address_kind(address)? {
        AddressKind::Transparent => Some(format!("{TSECRET_PREFIX}{}", &address[TADDR_PREFIX.len()..])),
        AddressKind::Shielded => Some(format!("{ZSECRET_PREFIX}{}", &address[ZADDR_PREFIX.len()..])),
    }
}

/// Persisted as `regtest/wallet.dat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    seed: u64,
    /// Transparent keys handed out so far.
    issued: u32,
    keypool: u32,
    z_issued: u32,
    #[serde(default)]
    imported: BTreeSet<String>,
    #[serde(default)]
    watch_only: BTreeSet<String>,
    /// Transactions this wallet created that are not yet on chain.
    #[serde(default)]
    pub pending: Vec<Tx>,
}

impl Wallet {
    pub fn new(seed: u64, keypool: u32) -> Self {
        Self {
            seed,
            issued: 0,
            keypool: keypool.max(1),
            z_issued: 0,
            imported: BTreeSet::new(),
            watch_only: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn keypool(&self) -> u32 {
        self.keypool
    }

    /// Keypool only ever grows when a node restarts with a larger `-keypool`.
    pub fn grow_keypool(&mut self, keypool: u32) {
        self.keypool = self.keypool.max(keypool);
    }

    /// Address the next coinbase pays to. Mining does not consume a key;
    /// the following [`Wallet::new_address`] hands this one out.
    pub fn coinbase_address(&self) -> String {
        taddr(self.seed, self.issued)
    }

    pub fn new_address(&mut self) -> String {
        let address = taddr(self.seed, self.issued);
        self.issued = self.issued.saturating_add(1);
        address
    }

    pub fn new_zaddr(&mut self) -> String {
        let address = zaddr(self.seed, self.z_issued);
        self.z_issued = self.z_issued.saturating_add(1);
        address
    }

    fn derived_index(&self, address: &str, prefix: &str) -> Option<u32> {
        let body = address.strip_prefix(prefix)?;
        let (seed, index) = body.split_at_checked(16)?;
        if u64::from_str_radix(seed, 16).ok()? != self.seed {
            return None;
        }
        u32::from_str_radix(index, 16).ok()
    }

    /// Whether the wallet holds the spending key for `address`.
    pub fn is_mine(&self, address: &str) -> bool {
        if self.imported.contains(address) {
            return true;
        }
        match address_kind(address) {
            Some(AddressKind::Transparent) => self
                .derived_index(address, TADDR_PREFIX)
                .is_some_and(|index| index < self.issued.saturating_add(self.keypool)),
            Some(AddressKind::Shielded) => self
                .derived_index(address, ZADDR_PREFIX)
                .is_some_and(|index| index < self.z_issued),
            None => false,
        }
    }

    pub fn is_watch_only(&self, address: &str) -> bool {
        !self.is_mine(address) && self.watch_only.contains(address)
    }

    /// Mine or watched.
    pub fn is_tracked(&self, address: &str) -> bool {
        self.is_mine(address) || self.watch_only.contains(address)
    }

    pub fn watch(&mut self, address: &str) {
        self.watch_only.insert(address.to_string());
    }

    /// Spending key of a shielded address the wallet holds.
    pub fn export_zkey(&self, address: &str) -> Option<String> {
        (address_kind(address) == Some(AddressKind::Shielded) && self.is_mine(address))
            .then(|| secret_of(address))
            .flatten()
    }

    /// Viewing key of a shielded address the wallet holds or watches.
    pub fn export_viewing_key(&self, address: &str) -> Option<String> {
        (address_kind(address) == Some(AddressKind::Shielded) && self.is_tracked(address))
            .then(|| format!("{ZVIEWING_PREFIX}{}", &address[ZADDR_PREFIX.len()..]))
    }

    /// Adds a shielded spending key. Returns the address it controls and
    /// whether the key was new.
    pub fn import_zkey(&mut self, key: &str) -> Option<(String, bool)> {
        let address = address_of_secret(key)?;
        if address_kind(&address) != Some(AddressKind::Shielded) {
            return None;
        }
        let new = !self.is_mine(&address);
        if new {
            self.imported.insert(address.clone());
        }
        Some((address, new))
    }

    /// Watches the shielded address behind a viewing key.
    pub fn import_viewing_key(&mut self, key: &str) -> Option<String> {
        let address = address_of_viewing_key(key)?;
        self.watch(&address);
        Some(address)
    }

    /// Shielded addresses held, then those only watched when asked for.
    pub fn shielded_addresses(&self, include_watchonly: bool) -> Vec<String> {
        let held = self
            .spendable_addresses()
            .into_iter()
            .filter(|address| address_kind(address) == Some(AddressKind::Shielded));
        let watched = self
            .watch_only
            .iter()
            .filter(|address| include_watchonly && self.is_watch_only(address))
            .filter(|address| address_kind(address) == Some(AddressKind::Shielded))
            .cloned();
        held.chain(watched).collect()
    }

    /// Every address the wallet can spend from: derived keys up to the end
    /// of the keypool, shielded keys handed out and imported keys.
    pub fn spendable_addresses(&self) -> Vec<String> {
        let transparent = (0..self.issued.saturating_add(self.keypool)).map(|i| taddr(self.seed, i));
        let shielded = (0..self.z_issued).map(|i| zaddr(self.seed, i));
        transparent
            .chain(shielded)
            .chain(self.imported.iter().cloned())
            .collect()
    }

    /// Text in the format of `dumpwallet`.
    pub fn dump(&self, created: &str, height: u64, tip: &str) -> String {
        let mut text = format!(
            "# Wallet dump created by zcashd simulation\n\
             # * Created on {created}\n\
             # * Best block at time of backup was {height} ({tip}),\n\n"
        );
        let (shielded, transparent): (Vec<String>, Vec<String>) = self
            .spendable_addresses()
            .into_iter()
            .partition(|address| address_kind(address) == Some(AddressKind::Shielded));
        for address in &transparent {
            if let Some(secret) = secret_of(address) {
                text.push_str(&format!("{secret} {created} label= # addr={address}\n"));
            }
        }
        text.push_str("\n# Zkeys\n\n");
        for address in &shielded {
            if let Some(secret) = secret_of(address) {
                text.push_str(&format!("{secret} {created} # zaddr={address}\n"));
            }
        }
        text.push_str("\n# End of dump\n");
        text
    }

    /// Imports the keys of a `dumpwallet` file. Returns how many were new.
    pub fn import_dump(&mut self, text: &str) -> usize {
        let mut added = 0usize;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(address) = line.split_whitespace().next().and_then(address_of_secret) else {
                continue;
            };
            if !self.is_mine(&address) {
                self.imported.insert(address);
                added = added.saturating_add(1);
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_format() {
        let address = taddr(0xabc, 7);
        assert_eq!(address, "tm0000000000000abc00000007");
        assert_eq!(address_kind(&address), Some(AddressKind::Transparent));
        assert_eq!(address_kind(&zaddr(1, 0)), Some(AddressKind::Shielded));
        assert_eq!(address_kind("tmNotHex00000000000000000"), None);
        assert_eq!(address_kind("zsmmxrKU6dqWFwUKow1iyovg3gxrgXpEivr"), None);
    }

    #[test]
    fn test_keypool_covers_future_addresses() {
        let mut wallet = Wallet::new(9, 3);
        let coinbase = wallet.coinbase_address();
        assert_eq!(wallet.new_address(), coinbase);
        assert!(wallet.is_mine(&taddr(9, 3)));
        assert!(!wallet.is_mine(&taddr(9, 4)));
        assert!(!wallet.is_mine(&taddr(10, 0)));

        let z = wallet.new_zaddr();
        assert!(wallet.is_mine(&z));
        assert!(!wallet.is_mine(&zaddr(9, 1)));
    }

    #[test]
    fn test_watch_only_is_not_mine() {
        let mut wallet = Wallet::new(1, 1);
        let foreign = taddr(2, 0);
        wallet.watch(&foreign);
        assert!(wallet.is_watch_only(&foreign));
        assert!(wallet.is_tracked(&foreign));
        assert!(!wallet.is_mine(&foreign));
    }

    #[test]
    fn test_shielded_key_export_and_import() {
        let mut owner = Wallet::new(3, 1);
        let z = owner.new_zaddr();
        assert_eq!(owner.export_zkey(&zaddr(3, 5)), None);
        let taddr_new = owner.new_address();
        assert_eq!(owner.export_zkey(&taddr_new), None);
        let spending = owner.export_zkey(&z).unwrap();
        let viewing = owner.export_viewing_key(&z).unwrap();
        assert!(viewing.starts_with("zvk"));

        let mut spender = Wallet::new(4, 1);
        assert_eq!(spender.import_zkey(&spending), Some((z.clone(), true)));
        assert_eq!(spender.import_zkey(&spending), Some((z.clone(), false)));
        assert!(spender.is_mine(&z));
        assert_eq!(spender.import_zkey(&viewing), None);

        let mut viewer = Wallet::new(5, 1);
        let own = viewer.new_zaddr();
        assert_eq!(viewer.import_viewing_key(&viewing), Some(z.clone()));
        assert!(viewer.is_watch_only(&z));
        assert_eq!(viewer.export_zkey(&z), None);
        assert_eq!(viewer.export_viewing_key(&z), Some(viewing));
        assert_eq!(viewer.shielded_addresses(false), vec![own.clone()]);
        assert_eq!(viewer.shielded_addresses(true), vec![own, z]);
    }

    #[test]
    fn test_dump_and_import() {
        let mut original = Wallet::new(5, 2);
        let t = original.new_address();
        let z = original.new_zaddr();
        let dump = original.dump("2026-01-01T00:00:00Z", 10, "00ff");
        assert!(dump.contains(&format!("# addr={t}")));
        assert!(dump.contains(&format!("# zaddr={z}")));

        let mut fresh = Wallet::new(6, 1);
        assert!(!fresh.is_mine(&t));
        assert_eq!(fresh.import_dump(&dump), 4);
        assert!(fresh.is_mine(&t));
        assert!(fresh.is_mine(&z));
        assert_eq!(fresh.import_dump(&dump), 0);
    }
}
