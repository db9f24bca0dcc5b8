use crate::config::constants::EVM_PROVIDER_POLL_INTERVAL_MS;
use crate::config::settings::ChainConfig;
use crate::types::chain::Chain;
use anyhow::{anyhow, Context, Result};
use ethers::contract::abigen;
use ethers::providers::{Http, JsonRpcClient, Provider};
use ethers::types::Address;
use std::fmt::{Debug, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub mod scanner;
pub mod sweeper;

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function transfer(address to, uint256 value) external returns (bool)
        event Transfer(address indexed from, address indexed to, uint256 value)
    ]"#
);

/// One shared provider per EVM chain, http in production.
#[derive(Clone)]
pub struct EvmClient<P: JsonRpcClient = Http> {
    pub chain: Chain,
    pub chain_id: u64,
    pub provider: Arc<Provider<P>>,
}

impl<P: JsonRpcClient> Debug for EvmClient<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmClient")
            .field("chain", &self.chain)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

impl EvmClient<Http> {
    /// Uses the first provider by name, the http provider has no failover of its own.
    pub fn new(chain: Chain, chain_config: &ChainConfig) -> Result<Self> {
        let chain_id = chain_config
            .chain_id
            .ok_or_else(|| anyhow!("{} has no chain id", chain))?;
        let mut providers: Vec<_> = chain_config.rpcs.iter().collect();
        providers.sort_by(|a, b| a.0.cmp(b.0));
        let (_, rpc) = providers
            .first()
            .ok_or_else(|| anyhow!("{} has no rpc configured", chain))?;
        let provider = Provider::<Http>::try_from(rpc.uri.as_str())
            .with_context(|| format!("Invalid {} rpc uri", chain))?
            .interval(Duration::from_millis(EVM_PROVIDER_POLL_INTERVAL_MS));
        Ok(Self {
            chain,
            chain_id,
            provider: Arc::new(provider),
        })
    }
}

pub fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address.trim()).map_err(|e| anyhow!("Invalid EVM address {}: {}", address, e))
}
