use crate::types::chain::Chain;
use crate::types::deposit::{CreditResult, DiscoveredDeposit};
use serde_derive::Serialize;

/// What one scanner call returned for one address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainScan {
    pub deposits: Vec<DiscoveredDeposit>,
    /// Current raw native balance, persisted as the next diffing baseline (EVM only).
    pub native_balance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainFailure {
    pub chain: Chain,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanResult {
    pub chains_scanned: Vec<Chain>,
    pub chains_timed_out: Vec<Chain>,
    pub chains_failed: Vec<ChainFailure>,
    pub chains_empty: Vec<Chain>,
    pub new_deposits: Vec<CreditResult>,
    pub already_processed: Vec<CreditResult>,
    pub skipped: Vec<CreditResult>,
}

impl ScanResult {
    pub fn deposits_found(&self) -> usize {
        self.new_deposits.len()
    }
}
