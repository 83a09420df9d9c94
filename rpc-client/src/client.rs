//! The [`NodeRpc`] trait and its typed command wrappers.

use {
    crate::error::{Result, RpcError},
    serde::de::DeserializeOwned,
    serde_json::{json, Value},
    std::{path::Path, sync::Arc},
    zqa_rpc_types::{
        Amount, BanMode, BannedEntry, BlockHash, BlockchainInfo, OpId, OperationResult, PeerInfo,
        Recipient, ShieldCoinbaseResult, TotalBalance, TxId, UnspentOutput, ValidateAddress,
        WalletInfo,
    },
};

/// Decodes a raw reply into the schema expected for `method`.
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|err| RpcError::schema(method, err))
}

/// Request/response access to one node.
///
/// Implementors provide [`NodeRpc::call`]; every other method is a typed
/// wrapper that fails fast with [`RpcError::Schema`] when the reply does not
/// match. Calls issued through one handle reach the node in issue order.
pub trait NodeRpc {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;

    // ── Mining and chain ────────────────────────────────────────────────

    fn generate(&self, blocks: u32) -> Result<Vec<BlockHash>> {
        decode("generate", self.call("generate", vec![json!(blocks)])?)
    }

    fn getblockcount(&self) -> Result<u64> {
        decode("getblockcount", self.call("getblockcount", vec![])?)
    }

    fn getbestblockhash(&self) -> Result<BlockHash> {
        decode("getbestblockhash", self.call("getbestblockhash", vec![])?)
    }

    fn getblockchaininfo(&self) -> Result<BlockchainInfo> {
        decode("getblockchaininfo", self.call("getblockchaininfo", vec![])?)
    }

    fn getrawmempool(&self) -> Result<Vec<TxId>> {
        decode("getrawmempool", self.call("getrawmempool", vec![])?)
    }

    // ── Wallet balances ─────────────────────────────────────────────────

    /// `getbalance`, `getbalance "*"` or `getbalance "*" minconf`.
    fn getbalance(&self, account: Option<&str>, minconf: Option<u32>) -> Result<Amount> {
        let params = match (account, minconf) {
            (None, None) => vec![],
            (Some(account), None) => vec![json!(account)],
            (account, Some(minconf)) => vec![json!(account.unwrap_or("*")), json!(minconf)],
        };
        decode("getbalance", self.call("getbalance", params)?)
    }

    fn z_getbalance(&self, address: &str, minconf: Option<u32>) -> Result<Amount> {
        let mut params = vec![json!(address)];
        params.extend(minconf.map(|minconf| json!(minconf)));
        decode("z_getbalance", self.call("z_getbalance", params)?)
    }

    fn z_gettotalbalance(&self, minconf: Option<u32>, include_watchonly: bool) -> Result<TotalBalance> {
        let params = if include_watchonly {
            vec![json!(minconf.unwrap_or(1)), json!(true)]
        } else {
            minconf.map(|minconf| vec![json!(minconf)]).unwrap_or_default()
        };
        decode("z_gettotalbalance", self.call("z_gettotalbalance", params)?)
    }

    fn getwalletinfo(&self) -> Result<WalletInfo> {
        decode("getwalletinfo", self.call("getwalletinfo", vec![])?)
    }

    fn listunspent(&self, minconf: Option<u32>) -> Result<Vec<UnspentOutput>> {
        let params = minconf.map(|minconf| vec![json!(minconf)]).unwrap_or_default();
        decode("listunspent", self.call("listunspent", params)?)
    }

    // ── Addresses ───────────────────────────────────────────────────────

    fn getnewaddress(&self) -> Result<String> {
        decode("getnewaddress", self.call("getnewaddress", vec![])?)
    }

    fn z_getnewaddress(&self) -> Result<String> {
        decode("z_getnewaddress", self.call("z_getnewaddress", vec![])?)
    }

    /// Adds a watch-only address.
    fn importaddress(&self, address: &str, rescan: bool) -> Result<()> {
        self.call("importaddress", vec![json!(address), json!(""), json!(rescan)])
            .map(drop)
    }

    /// Shielded addresses the wallet holds, and with `include_watchonly`
    /// those it only has a viewing key for.
    fn z_listaddresses(&self, include_watchonly: bool) -> Result<Vec<String>> {
        let params = if include_watchonly { vec![json!(true)] } else { vec![] };
        decode("z_listaddresses", self.call("z_listaddresses", params)?)
    }

    fn validateaddress(&self, address: &str) -> Result<ValidateAddress> {
        decode(
            "validateaddress",
            self.call("validateaddress", vec![json!(address)])?,
        )
    }

    // ── Sending ─────────────────────────────────────────────────────────

    fn sendtoaddress(&self, address: &str, amount: Amount, subtract_fee: bool) -> Result<TxId> {
        let mut params = vec![json!(address), amount.to_json()];
        if subtract_fee {
            params.extend([json!(""), json!(""), json!(true)]);
        }
        decode("sendtoaddress", self.call("sendtoaddress", params)?)
    }

    fn settxfee(&self, fee: Amount) -> Result<bool> {
        decode("settxfee", self.call("settxfee", vec![fee.to_json()])?)
    }

    fn z_sendmany(
        &self,
        from: &str,
        recipients: &[Recipient],
        minconf: Option<u32>,
        fee: Option<Amount>,
    ) -> Result<OpId> {
        let recipients =
            serde_json::to_value(recipients).map_err(|err| RpcError::schema("z_sendmany", err))?;
        let mut params = vec![json!(from), recipients];
        if minconf.is_some() || fee.is_some() {
            params.push(json!(minconf.unwrap_or(1)));
        }
        params.extend(fee.map(Amount::to_json));
        decode("z_sendmany", self.call("z_sendmany", params)?)
    }

    fn z_shieldcoinbase(
        &self,
        from: &str,
        to: &str,
        fee: Option<Amount>,
        limit: Option<u32>,
    ) -> Result<ShieldCoinbaseResult> {
        let mut params = vec![json!(from), json!(to)];
        match (fee, limit) {
            (None, None) => {}
            (fee, None) => params.extend(fee.map(Amount::to_json)),
            (fee, Some(limit)) => {
                params.push(fee.map_or(Value::Null, Amount::to_json));
                params.push(json!(limit));
            }
        }
        decode("z_shieldcoinbase", self.call("z_shieldcoinbase", params)?)
    }

    // ── Async operations ────────────────────────────────────────────────

    /// Terminal results for the given operations. An operation that is
    /// still running is simply absent from the reply.
    fn z_getoperationresult(&self, ops: &[OpId]) -> Result<Vec<OperationResult>> {
        decode(
            "z_getoperationresult",
            self.call("z_getoperationresult", vec![json!(ops)])?,
        )
    }

    fn z_getoperationstatus(&self, ops: &[OpId]) -> Result<Vec<OperationResult>> {
        decode(
            "z_getoperationstatus",
            self.call("z_getoperationstatus", vec![json!(ops)])?,
        )
    }

    // ── Peers and bans ──────────────────────────────────────────────────

    fn addnode(&self, address: &str, command: &str) -> Result<()> {
        self.call("addnode", vec![json!(address), json!(command)])
            .map(drop)
    }

    fn disconnectnode(&self, address: &str) -> Result<()> {
        self.call("disconnectnode", vec![json!(address)]).map(drop)
    }

    fn getpeerinfo(&self) -> Result<Vec<PeerInfo>> {
        decode("getpeerinfo", self.call("getpeerinfo", vec![])?)
    }

    fn setban(&self, pattern: &str, mode: BanMode, bantime: Option<u64>) -> Result<()> {
        let mut params = vec![json!(pattern), json!(mode)];
        params.extend(bantime.map(|secs| json!(secs)));
        self.call("setban", params).map(drop)
    }

    fn listbanned(&self) -> Result<Vec<BannedEntry>> {
        decode("listbanned", self.call("listbanned", vec![])?)
    }

    fn clearbanned(&self) -> Result<()> {
        self.call("clearbanned", vec![]).map(drop)
    }

    // ── Wallet files ────────────────────────────────────────────────────

    /// Copies the wallet into `-exportdir`; returns the full path written.
    fn backupwallet(&self, filename: &str) -> Result<String> {
        decode("backupwallet", self.call("backupwallet", vec![json!(filename)])?)
    }

    /// Writes a key dump into `-exportdir`; returns the full path written.
    fn dumpwallet(&self, filename: &str) -> Result<String> {
        decode("dumpwallet", self.call("dumpwallet", vec![json!(filename)])?)
    }

    fn importwallet(&self, path: &Path) -> Result<()> {
        self.call("importwallet", vec![json!(path.to_string_lossy())])
            .map(drop)
    }

    // ── Shielded keys ───────────────────────────────────────────────────

    /// Spending key of a shielded address.
    fn z_exportkey(&self, address: &str) -> Result<String> {
        decode("z_exportkey", self.call("z_exportkey", vec![json!(address)])?)
    }

    fn z_importkey(&self, key: &str) -> Result<()> {
        self.call("z_importkey", vec![json!(key)]).map(drop)
    }

    /// Viewing key of a shielded address. Importing it elsewhere makes the
    /// address watch-only there.
    fn z_exportviewingkey(&self, address: &str) -> Result<String> {
        decode(
            "z_exportviewingkey",
            self.call("z_exportviewingkey", vec![json!(address)])?,
        )
    }

    fn z_importviewingkey(&self, key: &str) -> Result<()> {
        self.call("z_importviewingkey", vec![json!(key)]).map(drop)
    }

    // ── Control ─────────────────────────────────────────────────────────

    fn stop(&self) -> Result<()> {
        self.call("stop", vec![]).map(drop)
    }
}

impl<T: NodeRpc + ?Sized> NodeRpc for &T {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        (**self).call(method, params)
    }
}

impl<T: NodeRpc + ?Sized> NodeRpc for Box<T> {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        (**self).call(method, params)
    }
}

impl<T: NodeRpc + ?Sized> NodeRpc for Arc<T> {
    fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        (**self).call(method, params)
    }
}
