use crate::config::settings::ChainConfig;
use crate::evm::{parse_address, EvmClient, TransferFilter};
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::{BaselineMove, DepositAddress, DiscoveredDeposit};
use crate::types::engine::ChainScanner;
use crate::types::scan::ChainScan;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::contract::parse_log;
use ethers::providers::{Http, JsonRpcClient, Middleware};
use ethers::types::{Address, BlockNumber, Filter, H256, U256};
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
struct WatchedToken {
    asset: Asset,
    contract: Address,
    decimals: u8,
}

pub struct EvmScanner<P: JsonRpcClient = Http> {
    client: EvmClient<P>,
    tokens: Vec<WatchedToken>,
    native_decimals: u8,
    lookback_blocks: u64,
}

/// A decoded ERC-20 Transfer log addressed to a deposit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub tx_hash: H256,
    pub log_index: u64,
    pub block_number: u64,
    pub asset: Asset,
    pub amount: U256,
    pub decimals: u8,
}

impl<P: JsonRpcClient> EvmScanner<P> {
    pub fn new(client: EvmClient<P>, chain_config: &ChainConfig, lookback_blocks: u64) -> Result<Self> {
        let tokens = chain_config
            .tokens
            .iter()
            .map(|t| {
                Ok(WatchedToken {
                    asset: t.asset,
                    contract: parse_address(&t.address)?,
                    decimals: t.decimals,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            client,
            tokens,
            native_decimals: chain_config.native_decimals,
            lookback_blocks,
        })
    }

    async fn token_transfers(
        &self,
        token: &WatchedToken,
        owner: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TokenTransfer>> {
        let filter = Filter::new()
            .address(token.contract)
            .event("Transfer(address,address,uint256)")
            .topic2(H256::from(owner))
            .from_block(BlockNumber::Number(from_block.into()))
            .to_block(BlockNumber::Number(to_block.into()));
        let logs = self.client.provider.get_logs(&filter).await?;

        let mut transfers = vec![];
        for log in logs {
            if log.removed == Some(true) {
                continue;
            }
            let (Some(tx_hash), Some(log_index), Some(block_number)) =
                (log.transaction_hash, log.log_index, log.block_number)
            else {
                warn!("Skipping {} log without position data", token.asset);
                continue;
            };
            match parse_log::<TransferFilter>(log) {
                Ok(event) => transfers.push(TokenTransfer {
                    tx_hash,
                    log_index: log_index.low_u64(),
                    block_number: block_number.as_u64(),
                    asset: token.asset,
                    amount: event.value,
                    decimals: token.decimals,
                }),
                Err(e) => warn!("Skipping unparseable {} transfer in {:#x}: {}", token.asset, tx_hash, e),
            }
        }
        Ok(transfers)
    }
}

/// Token deposits are keyed by transaction hash and log index, so several transfers inside one
/// transaction never collide and a key never depends on which other queries succeeded.
pub fn token_deposit(chain: Chain, transfer: &TokenTransfer) -> Result<DiscoveredDeposit> {
    let amount = u128::try_from(transfer.amount)
        .map_err(|_| anyhow!("{} transfer amount {} out of range", transfer.asset, transfer.amount))?;
    Ok(DiscoveredDeposit {
        tx_hash: format!("{:#x}:{}", transfer.tx_hash, transfer.log_index),
        chain,
        asset: transfer.asset,
        amount,
        decimals: transfer.decimals,
        block_height: transfer.block_number,
        baseline: None,
    })
}

/// Native transfers are not indexed, so the positive difference between the current balance
/// and the stored baseline becomes one deposit keyed by (chain, address, block height).
/// Several transfers between two scans collapse into a single delta. A missing baseline counts as zero.
/// The deposit carries the baseline it was diffed against so the credit can move it atomically.
pub fn native_deposit(
    chain: Chain,
    address: &str,
    previous: Option<&str>,
    balance: U256,
    decimals: u8,
    block_height: u64,
) -> Result<Option<DiscoveredDeposit>> {
    let baseline = match previous {
        Some(raw) => U256::from_dec_str(raw).map_err(|e| anyhow!("Corrupt baseline {}: {}", raw, e))?,
        None => U256::zero(),
    };
    if balance <= baseline {
        return Ok(None);
    }
    let delta = balance - baseline;
    let amount = u128::try_from(delta).map_err(|_| anyhow!("native delta {} out of range", delta))?;
    Ok(Some(DiscoveredDeposit {
        tx_hash: format!("native:{}:{}:{}", chain, address.to_lowercase(), block_height),
        chain,
        asset: chain.native_asset(),
        amount,
        decimals,
        block_height,
        baseline: Some(BaselineMove {
            previous: previous.map(str::to_string),
            current: balance.to_string(),
        }),
    }))
}

#[async_trait]
impl<P: JsonRpcClient + 'static> ChainScanner for EvmScanner<P> {
    fn chain(&self) -> Chain {
        self.client.chain
    }

    #[instrument(skip(self, address), fields(chain = %self.client.chain, address = %address.address))]
    async fn scan(&self, address: &DepositAddress) -> Result<ChainScan> {
        let owner = parse_address(&address.address)?;
        let head = self.client.provider.get_block_number().await?.as_u64();
        let from_block = head.saturating_sub(self.lookback_blocks);
        let chain = self.client.chain;

        let mut deposits = vec![];
        let mut failed_queries = 0;
        for token in &self.tokens {
            match self.token_transfers(token, owner, from_block, head).await {
                Ok(transfers) => {
                    for transfer in &transfers {
                        match token_deposit(chain, transfer) {
                            Ok(deposit) => deposits.push(deposit),
                            Err(e) => warn!("Skipping transfer: {}", e),
                        }
                    }
                }
                Err(e) => {
                    failed_queries += 1;
                    warn!("{} log query failed: {}", token.asset, e);
                }
            }
        }

        let mut native_balance = None;
        match self
            .client
            .provider
            .get_balance(owner, Some(BlockNumber::Number(head.into()).into()))
            .await
        {
            Ok(balance) => {
                match native_deposit(
                    chain,
                    &address.address,
                    address.last_balance.as_deref(),
                    balance,
                    self.native_decimals,
                    head,
                ) {
                    Ok(deposit) => {
                        deposits.extend(deposit);
                        native_balance = Some(balance.to_string());
                    }
                    Err(e) => warn!("Skipping native balance: {}", e),
                }
            }
            Err(e) => {
                failed_queries += 1;
                warn!("Native balance query failed: {}", e);
            }
        }

        if failed_queries == self.tokens.len() + 1 {
            bail!("every {} query failed", chain);
        }
        debug!("Found {} incoming transfers up to block {}", deposits.len(), head);
        Ok(ChainScan {
            deposits,
            native_balance,
        })
    }
}
