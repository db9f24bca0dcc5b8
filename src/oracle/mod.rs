pub mod cached;
pub mod coingecko;

use crate::config::constants::USD_SCALE;
use crate::types::chain::Asset;
use crate::utils::decimals::raw_to_decimal;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Spot price lookups, one network call per asset at most.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self, asset: Asset) -> Result<Decimal>;
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn get_asset_price(&self, asset: Asset) -> Result<Decimal>;

    /// Stablecoins are valued 1:1 by decimal shift and never trigger a price lookup.
    async fn get_usd_value(&self, asset: Asset, raw_amount: u128, decimals: u8) -> Result<Decimal> {
        let amount = raw_to_decimal(raw_amount, decimals)?;
        if asset.is_stablecoin() {
            return Ok(amount.round_dp(USD_SCALE).normalize());
        }
        let price = self.get_asset_price(asset).await?;
        Ok((amount * price).round_dp(USD_SCALE).normalize())
    }
}
