use crate::config::constants::coingecko_id;
use crate::config::settings::OracleConfig;
use crate::oracle::PriceSource;
use crate::types::chain::Asset;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

/// `GET {base_url}/simple/price?ids=<id>&vs_currencies=usd`
pub struct CoinGeckoSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoSource {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

pub fn parse_simple_price(body: &serde_json::Value, id: &str) -> Result<Decimal> {
    let price = body
        .get(id)
        .and_then(|quote| quote.get("usd"))
        .ok_or_else(|| anyhow!("No usd quote for {} in response", id))?;
    // go through the textual form so floats like 0.1 don't pick up binary noise
    let text = match price {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => return Err(anyhow!("Unexpected usd quote {}", other)),
    };
    text.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| anyhow!("Unparseable usd quote {}: {}", text, e))
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    #[instrument(skip(self))]
    async fn fetch_price(&self, asset: Asset) -> Result<Decimal> {
        let id = coingecko_id(asset).ok_or_else(|| anyhow!("{} has no price feed", asset))?;
        let mut query = HashMap::new();
        query.insert("ids", id);
        query.insert("vs_currencies", "usd");
        let mut request = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&query);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-cg-pro-api-key", api_key);
        }
        let body: serde_json::Value = request.send().await?.error_for_status()?.json().await?;
        parse_simple_price(&body, id)
    }
}
