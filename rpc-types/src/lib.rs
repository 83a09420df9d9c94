//! Typed views of the zcashd RPC responses consumed by the regtest harness.
//!
//! Every command the harness issues decodes into one of the narrow schemas in
//! [`response`]. Monetary values are carried as [`Amount`], an exact
//! fixed-point count of zatoshis; there is no floating point
//! constructor anywhere in this crate.

pub mod amount;
pub mod ids;
pub mod response;

pub use {
    amount::{Amount, AmountError, COIN, DUST_THRESHOLD, MAX_MONEY},
    ids::{BlockHash, OpId, TxId},
    response::{
        BanMode, BannedEntry, BlockchainInfo, OperationError, OperationResult, OperationStatus,
        PeerInfo, Recipient, ShieldCoinbaseResult, TotalBalance, UnspentOutput, ValidateAddress,
        ValuePool, WalletInfo,
    },
};
