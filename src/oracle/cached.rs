use crate::oracle::{PriceOracle, PriceSource};
use crate::types::chain::Asset;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Short TTL cache in front of a [PriceSource], serving the last known good price when the source fails.
pub struct CachedPriceOracle<S: PriceSource> {
    source: S,
    ttl: Duration,
    prices: RwLock<HashMap<Asset, (Decimal, Instant)>>,
}

impl<S: PriceSource> CachedPriceOracle<S> {
    pub fn new(source: S, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            prices: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<S: PriceSource> PriceOracle for CachedPriceOracle<S> {
    async fn get_asset_price(&self, asset: Asset) -> Result<Decimal> {
        let cached = self.prices.read().await.get(&asset).copied();
        if let Some((price, fetched_at)) = cached {
            if fetched_at.elapsed() < self.ttl {
                return Ok(price);
            }
        }
        match self.source.fetch_price(asset).await {
            Ok(price) if price > Decimal::ZERO => {
                debug!("Fetched {} price {}", asset, price);
                self.prices.write().await.insert(asset, (price, Instant::now()));
                Ok(price)
            }
            Ok(price) => Err(anyhow!("Price source returned non-positive {} price {}", asset, price)),
            Err(e) => match cached {
                Some((price, fetched_at)) => {
                    warn!(
                        "Price fetch for {} failed ({}), serving price from {}s ago",
                        asset,
                        e,
                        fetched_at.elapsed().as_secs()
                    );
                    Ok(price)
                }
                None => Err(e.context(format!("No {} price available", asset))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeSource {
        calls: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl PriceSource for FakeSource {
        async fn fetch_price(&self, _asset: Asset) -> Result<Decimal> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("503 Service Unavailable"));
            }
            Ok(dec!(2000) + Decimal::from(call))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_cache_within_ttl() {
        let source = FakeSource::default();
        let calls = source.calls.clone();
        let oracle = CachedPriceOracle::new(source, Duration::from_secs(60));
        assert_eq!(oracle.get_asset_price(Asset::Eth).await.unwrap(), dec!(2000));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(oracle.get_asset_price(Asset::Eth).await.unwrap(), dec!(2000));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(oracle.get_asset_price(Asset::Eth).await.unwrap(), dec!(2001));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_last_known_good() {
        let source = FakeSource::default();
        let failing = source.failing.clone();
        let oracle = CachedPriceOracle::new(source, Duration::from_secs(60));
        assert_eq!(oracle.get_asset_price(Asset::Sol).await.unwrap(), dec!(2000));
        failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(oracle.get_asset_price(Asset::Sol).await.unwrap(), dec!(2000));
        assert!(oracle.get_asset_price(Asset::Bnb).await.is_err());
    }

    #[tokio::test]
    async fn test_stablecoins_skip_the_source() {
        let source = FakeSource::default();
        let calls = source.calls.clone();
        let oracle = CachedPriceOracle::new(source, Duration::from_secs(60));
        let usd = oracle.get_usd_value(Asset::Usdc, 5_000_000, 6).await.unwrap();
        assert_eq!(usd, dec!(5));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let usd = oracle
            .get_usd_value(Asset::Eth, 1_500_000_000_000_000_000, 18)
            .await
            .unwrap();
        assert_eq!(usd, dec!(3000));
    }
}
