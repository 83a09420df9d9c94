//! Expected-value ledger and its comparison against node state.
//!
//! Every amount is an exact [`Amount`] in zatoshis, and every comparison is
//! exact. The verifier has no floating point entry points, so a comparison
//! against a binary float cannot be expressed.

use {
    crate::{
        error::{HarnessError, Result},
        node::Node,
    },
    log::{debug, info},
    std::{collections::BTreeMap, fmt},
    zqa_rpc_client::NodeRpc,
    zqa_rpc_types::{Amount, TotalBalance},
};

/// Pool id of the Sprout shielded value pool in `getblockchaininfo`.
pub const SPROUT_POOL: &str = "sprout";

fn overflow(context: impl Into<String>) -> HarnessError {
    HarnessError::LedgerOverflow {
        context: context.into(),
    }
}

/// Running ledger of what the scenario did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvariantModel {
    balances: BTreeMap<usize, Amount>,
    pools: BTreeMap<String, Amount>,
    mined: Amount,
    fees: Amount,
    external: Amount,
}

impl InvariantModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mature block reward credited to `node`.
    pub fn record_mined(&mut self, node: usize, amount: Amount) -> Result<()> {
        self.mined = self
            .mined
            .checked_add(amount)
            .ok_or_else(|| overflow("recording mined reward"))?;
        self.credit(node, amount)
    }

    /// `amount` leaves `from` and arrives at `to`, or leaves the tracked
    /// node set when `to` is `None`. `fee` is burnt from `from`.
    pub fn record_transfer(&mut self, from: usize, to: Option<usize>, amount: Amount, fee: Amount) -> Result<()> {
        let debit = amount
            .checked_add(fee)
            .ok_or_else(|| overflow(format!("transfer {amount} + fee {fee}")))?;
        let balance = self.expected_balance(from);
        let remaining = balance
            .checked_sub(debit)
            .ok_or_else(|| overflow(format!("debiting {debit} from node{from}")))?;
        self.balances.insert(from, remaining);
        self.fees = self
            .fees
            .checked_add(fee)
            .ok_or_else(|| overflow("accumulating fees"))?;
        match to {
            Some(to) => self.credit(to, amount),
            None => {
                self.external = self
                    .external
                    .checked_add(amount)
                    .ok_or_else(|| overflow("accumulating external transfers"))?;
                Ok(())
            }
        }
    }

    /// Value entering (positive) or leaving (negative) a tracked pool.
    pub fn record_pool_delta(&mut self, pool: &str, delta: Amount) -> Result<()> {
        let next = self
            .expected_pool(pool)
            .checked_add(delta)
            .ok_or_else(|| overflow(format!("{pool} pool delta {delta}")))?;
        self.pools.insert(pool.to_string(), next);
        Ok(())
    }

    fn credit(&mut self, node: usize, amount: Amount) -> Result<()> {
        let next = self
            .expected_balance(node)
            .checked_add(amount)
            .ok_or_else(|| overflow(format!("crediting {amount} to node{node}")))?;
        self.balances.insert(node, next);
        Ok(())
    }

    pub fn expected_balance(&self, node: usize) -> Amount {
        self.balances.get(&node).copied().unwrap_or(Amount::ZERO)
    }

    pub fn expected_pool(&self, pool: &str) -> Amount {
        self.pools.get(pool).copied().unwrap_or(Amount::ZERO)
    }

    pub fn mined(&self) -> Amount {
        self.mined
    }

    pub fn fees(&self) -> Amount {
        self.fees
    }

    pub fn external(&self) -> Amount {
        self.external
    }

    /// Mined minus fees minus value sent outside the tracked nodes.
    pub fn expected_total(&self) -> Result<Amount> {
        self.mined
            .checked_sub(self.fees)
            .and_then(|total| total.checked_sub(self.external))
            .ok_or_else(|| overflow("computing expected total"))
    }

    /// Sum of the per-node expectations.
    pub fn tracked_total(&self) -> Result<Amount> {
        Amount::checked_sum(self.balances.values().copied())
            .ok_or_else(|| overflow("summing tracked balances"))
    }

    pub fn check_conservation(&self) -> Result<()> {
        let expected = self.expected_total()?;
        let actual = self.tracked_total()?;
        if expected == actual {
            Ok(())
        } else {
            Err(HarnessError::ConservationMismatch { expected, actual })
        }
    }
}

/// Field of a `z_gettotalbalance` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalField {
    Transparent,
    Private,
    Total,
}

impl TotalField {
    fn pick(self, totals: &TotalBalance) -> Amount {
        match self {
            Self::Transparent => totals.transparent,
            Self::Private => totals.private,
            Self::Total => totals.total,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Transparent => "transparent",
            Self::Private => "private",
            Self::Total => "total",
        }
    }
}

/// Which balance of a node to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceQuery {
    /// `getbalance`
    Wallet,
    /// `getbalance "*"`
    Wildcard,
    /// `z_getbalance <address>`
    Address(String),
    /// `z_gettotalbalance` fields with the default arguments.
    Transparent,
    Private,
    Total,
    /// One `z_gettotalbalance` field read with explicit arguments.
    Totals {
        field: TotalField,
        minconf: Option<u32>,
        include_watchonly: bool,
    },
}

impl BalanceQuery {
    pub fn address(address: impl Into<String>) -> Self {
        Self::Address(address.into())
    }

    /// `field` of `z_gettotalbalance minconf true`.
    pub fn watch_only(field: TotalField, minconf: u32) -> Self {
        Self::Totals {
            field,
            minconf: Some(minconf),
            include_watchonly: true,
        }
    }
}

impl fmt::Display for BalanceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet => f.write_str("wallet"),
            Self::Wildcard => f.write_str("wallet(*)"),
            Self::Address(address) => write!(f, "address {address}"),
            Self::Transparent => f.write_str("transparent"),
            Self::Private => f.write_str("private"),
            Self::Total => f.write_str("total"),
            Self::Totals {
                field,
                minconf,
                include_watchonly,
            } => {
                f.write_str(field.name())?;
                if let Some(minconf) = minconf {
                    write!(f, " minconf={minconf}")?;
                }
                if *include_watchonly {
                    f.write_str(" +watchonly")?;
                }
                Ok(())
            }
        }
    }
}

fn observe_totals<R: NodeRpc>(
    rpc: &R,
    index: usize,
    field: TotalField,
    minconf: Option<u32>,
    include_watchonly: bool,
) -> Result<Amount> {
    let totals = rpc
        .z_gettotalbalance(minconf, include_watchonly)
        .map_err(|err| HarnessError::rpc(index, "z_gettotalbalance", err))?;
    Ok(field.pick(&totals))
}

#[derive(Debug, Default)]
pub struct InvariantVerifier {
    model: InvariantModel,
}

impl InvariantVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(&self) -> &InvariantModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut InvariantModel {
        &mut self.model
    }

    pub fn record_mined(&mut self, node: usize, amount: Amount) -> Result<()> {
        self.model.record_mined(node, amount)
    }

    pub fn record_transfer(&mut self, from: usize, to: Option<usize>, amount: Amount, fee: Amount) -> Result<()> {
        self.model.record_transfer(from, to, amount, fee)
    }

    pub fn record_pool_delta(&mut self, pool: &str, delta: Amount) -> Result<()> {
        self.model.record_pool_delta(pool, delta)
    }

    pub fn observe_balance<R: NodeRpc>(&self, node: &Node<R>, query: &BalanceQuery) -> Result<Amount> {
        let rpc = node.rpc()?;
        let index = node.index();
        let observed = match query {
            BalanceQuery::Wallet => rpc
                .getbalance(None, None)
                .map_err(|err| HarnessError::rpc(index, "getbalance", err))?,
            BalanceQuery::Wildcard => rpc
                .getbalance(Some("*"), None)
                .map_err(|err| HarnessError::rpc(index, "getbalance", err))?,
            BalanceQuery::Address(address) => rpc
                .z_getbalance(address, None)
                .map_err(|err| HarnessError::rpc(index, "z_getbalance", err))?,
            BalanceQuery::Transparent => observe_totals(rpc, index, TotalField::Transparent, None, false)?,
            BalanceQuery::Private => observe_totals(rpc, index, TotalField::Private, None, false)?,
            BalanceQuery::Total => observe_totals(rpc, index, TotalField::Total, None, false)?,
            BalanceQuery::Totals {
                field,
                minconf,
                include_watchonly,
            } => observe_totals(rpc, index, *field, *minconf, *include_watchonly)?,
        };
        debug!("node{index}: {query} balance {observed}");
        Ok(observed)
    }

    pub fn assert_balance<R: NodeRpc>(&self, node: &Node<R>, query: &BalanceQuery, expected: Amount) -> Result<()> {
        let actual = self.observe_balance(node, query)?;
        if actual == expected {
            Ok(())
        } else {
            Err(HarnessError::BalanceMismatch {
                node: node.index(),
                query: query.to_string(),
                expected,
                actual,
            })
        }
    }

    /// Compares against the ledger's expectation for the node.
    pub fn assert_model_balance<R: NodeRpc>(&self, node: &Node<R>, query: &BalanceQuery) -> Result<()> {
        self.assert_balance(node, query, self.model.expected_balance(node.index()))
    }

    /// Chain value of `pool` as the node reports it. `chainValueZat` wins
    /// over the decimal `chainValue` when both are present.
    pub fn observe_pool<R: NodeRpc>(&self, node: &Node<R>, pool: &str) -> Result<Amount> {
        let index = node.index();
        let unavailable = |reason: &str| HarnessError::PoolUnavailable {
            node: index,
            pool: pool.to_string(),
            reason: reason.to_string(),
        };
        let info = node
            .rpc()?
            .getblockchaininfo()
            .map_err(|err| HarnessError::rpc(index, "getblockchaininfo", err))?;
        let entry = info
            .value_pool(pool)
            .ok_or_else(|| unavailable("not reported"))?;
        if !entry.monitored {
            return Err(unavailable("not monitored"));
        }
        entry
            .chain_value_zat
            .map(Amount::from_zat)
            .or(entry.chain_value)
            .ok_or_else(|| unavailable("no chain value"))
    }

    pub fn assert_pool_total<R: NodeRpc>(&self, node: &Node<R>, pool: &str, expected: Amount) -> Result<()> {
        let actual = self.observe_pool(node, pool)?;
        if actual == expected {
            info!("node{}: {pool} pool at {actual}", node.index());
            Ok(())
        } else {
            Err(HarnessError::PoolMismatch {
                node: node.index(),
                pool: pool.to_string(),
                expected,
                actual,
            })
        }
    }

    pub fn assert_model_pool<R: NodeRpc>(&self, node: &Node<R>, pool: &str) -> Result<()> {
        self.assert_pool_total(node, pool, self.model.expected_pool(pool))
    }

    /// Checks the ledger is self-consistent and that the observed balances
    /// of `nodes` add up to mined minus fees minus external transfers.
    pub fn assert_conservation<R: NodeRpc>(&self, nodes: &[&Node<R>], query: &BalanceQuery) -> Result<()> {
        self.model.check_conservation()?;
        let expected = self.model.expected_total()?;
        let mut actual = Amount::ZERO;
        for node in nodes {
            let observed = self.observe_balance(node, query)?;
            actual = actual
                .checked_add(observed)
                .ok_or_else(|| overflow("summing observed balances"))?;
        }
        if actual == expected {
            Ok(())
        } else {
            Err(HarnessError::ConservationMismatch { expected, actual })
        }
    }
}
