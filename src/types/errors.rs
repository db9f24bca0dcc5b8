use crate::types::chain::Chain;
use rust_decimal::Decimal;
use serde_derive::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Scan rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Rate limit store unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("User has no deposit address")]
    NoDepositAddress,
    #[error("No deposit address on {0}")]
    NoMatchingChain(Chain),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
pub enum ChainScanFailure {
    #[error("{0} scan timed out")]
    Timeout(Chain),
    #[error("{chain} scan failed: {error}")]
    ScanError { chain: Chain, error: String },
}

/// Why a discovered deposit was not credited. The deposit is retried on the next scan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CreditSkip {
    #[error("Deposit amount is zero")]
    ZeroAmount,
    #[error("No deposit address on {0}")]
    NoDepositAddress(Chain),
    #[error("USD valuation failed: {0}")]
    Valuation(String),
    #[error("Native baseline moved since the scan, rediffing next time")]
    BaselineMoved,
    #[error("Block height {0} out of range")]
    InvalidBlockHeight(u64),
    #[error("Store error: {0}")]
    Store(String),
}

#[derive(Error, Debug)]
pub enum BoostError {
    #[error("Insufficient boost points, {available} available, {requested} requested")]
    InsufficientPoints { available: i64, requested: i64 },
    #[error("Position not found")]
    PositionNotFound,
    #[error("Position is not active")]
    PositionInactive,
    #[error("Boost must be a positive number of points, got {0}")]
    InvalidPoints(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("Position not found")]
    PositionNotFound,
    #[error("Position is not active")]
    PositionInactive,
    #[error("Payout amount must be positive, got {0}")]
    InvalidAmount(Decimal),
    #[error("Payout of {amount} exceeds remaining cap {remaining}")]
    ExceedsCap { amount: Decimal, remaining: Decimal },
    #[error("Decay percent must be within 0..=100, got {0}")]
    InvalidDecayPercent(u32),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    #[error("Derived address {derived} does not match stored {expected} (index {index})")]
    AddressMismatch {
        expected: String,
        derived: String,
        index: i32,
    },
    #[error("Balance {balance} does not cover fee {fee} plus buffer {buffer}")]
    InsufficientForFee { balance: u128, fee: u128, buffer: u128 },
    #[error("Nothing to sweep from {0}")]
    NothingToSweep(String),
    #[error("{0} is not configured on this chain")]
    UnsupportedAsset(String),
    #[error("Funding from treasury failed: {0}")]
    Funding(String),
    #[error("Key derivation failed: {0}")]
    Derivation(String),
    #[error("Claimed amount unusable: {0}")]
    InvalidAmount(String),
    #[error("Rpc error: {0}")]
    Rpc(String),
}

impl SweepError {
    /// Mismatches point at seed or index corruption and must never be retried blindly.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SweepError::AddressMismatch { .. })
    }
}

impl From<diesel::result::Error> for BoostError {
    fn from(e: diesel::result::Error) -> Self {
        BoostError::Store(e.into())
    }
}

impl From<diesel::result::Error> for PayoutError {
    fn from(e: diesel::result::Error) -> Self {
        PayoutError::Store(e.into())
    }
}
