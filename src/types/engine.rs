use crate::storage::DepositStore;
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::DepositAddress;
use crate::types::errors::SweepError;
use crate::types::scan::ChainScan;
use crate::types::sweep::SweepOutcome;
use anyhow::Result;
use async_trait::async_trait;

/// Source of incoming transfers for one chain. Stateless per call, the caller bounds it with a timeout.
#[async_trait]
pub trait ChainScanner: Send + Sync {
    fn chain(&self) -> Chain;

    /// Returns newly observed incoming transfers to `address` inside the configured lookback window.
    /// Unparseable items are skipped, a failing asset query never hides the others.
    async fn scan(&self, address: &DepositAddress) -> Result<ChainScan>;
}

/// Moves claimed deposits of one asset from a deposit address into the chain's vault.
#[async_trait]
pub trait ChainSweeper: Send + Sync {
    fn chain(&self) -> Chain;

    /// Sends `amount` raw units, less when the address holds less, so deposits credited after
    /// the claim stay behind for their own batch. Gas funded by the treasury is added to the
    /// address baseline in `baselines` before it is sent.
    async fn sweep(
        &self,
        address: &DepositAddress,
        asset: Asset,
        amount: u128,
        baselines: &dyn DepositStore,
    ) -> Result<SweepOutcome, SweepError>;
}
