//! Response schemas for the RPC commands the harness consumes.
//!
//! Only the fields the harness reads are modelled. Unknown fields are
//! ignored; a missing required field is a schema mismatch reported at the
//! decode site.

use {
    crate::{
        amount::Amount,
        ids::{BlockHash, OpId, TxId},
    },
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::fmt,
};

// ─── Async operations ───────────────────────────────────────────────────────

/// Lifecycle state of an asynchronous wallet operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Queued,
    Executing,
    Success,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error object attached to a failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: i64,
    pub message: String,
}

/// One entry of `z_getoperationresult` / `z_getoperationstatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub id: OpId,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl OperationResult {
    /// Transaction id from a successful `z_sendmany`/`z_shieldcoinbase`.
    pub fn txid(&self) -> Option<TxId> {
        self.result
            .as_ref()
            .and_then(|result| result.get("txid"))
            .and_then(Value::as_str)
            .map(TxId::from)
    }
}

/// Immediate reply of `z_shieldcoinbase`; the transaction itself is built
/// by the operation `opid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldCoinbaseResult {
    pub opid: OpId,
    #[serde(rename = "shieldingUTXOs")]
    pub shielding_utxos: u64,
    #[serde(rename = "shieldingValue")]
    pub shielding_value: Amount,
    #[serde(rename = "remainingUTXOs")]
    pub remaining_utxos: u64,
    #[serde(rename = "remainingValue")]
    pub remaining_value: Amount,
}

// ─── Wallet ─────────────────────────────────────────────────────────────────

/// `z_gettotalbalance`. zcashd reports these as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalBalance {
    pub transparent: Amount,
    pub private: Amount,
    pub total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(default)]
    pub walletversion: u64,
    pub balance: Amount,
    #[serde(default)]
    pub unconfirmed_balance: Amount,
    #[serde(default)]
    pub immature_balance: Amount,
    #[serde(default)]
    pub txcount: u64,
    #[serde(default)]
    pub keypoolsize: u64,
}

/// Output row of `z_sendmany`'s recipient list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub address: String,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Recipient {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
            memo: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: TxId,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    pub amount: Amount,
    pub confirmations: u64,
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub spendable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateAddress {
    pub isvalid: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ismine: Option<bool>,
    #[serde(default)]
    pub iswatchonly: Option<bool>,
}

// ─── Chain ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub bestblockhash: BlockHash,
    #[serde(rename = "valuePools", default)]
    pub value_pools: Vec<ValuePool>,
}

impl BlockchainInfo {
    pub fn value_pool(&self, id: &str) -> Option<&ValuePool> {
        self.value_pools.iter().find(|pool| pool.id == id)
    }
}

/// Aggregate value held by one shielded pool across the active chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuePool {
    pub id: String,
    pub monitored: bool,
    #[serde(rename = "chainValue", default, skip_serializing_if = "Option::is_none")]
    pub chain_value: Option<Amount>,
    #[serde(rename = "chainValueZat", default, skip_serializing_if = "Option::is_none")]
    pub chain_value_zat: Option<i64>,
}

// ─── Network ────────────────────────────────────────────────────────────────

/// One row of `getpeerinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: u64,
    pub addr: String,
    #[serde(default)]
    pub inbound: bool,
    /// Zero until the version handshake has completed.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub subver: String,
}

impl PeerInfo {
    pub fn is_handshaked(&self) -> bool {
        self.version != 0
    }
}

/// One row of `listbanned`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedEntry {
    pub address: String,
    #[serde(default)]
    pub banned_until: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanMode {
    Add,
    Remove,
}

impl BanMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for BanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
