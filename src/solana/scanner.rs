use crate::config::settings::ChainConfig;
use crate::solana::rpc_pool::RpcClientPool;
use crate::solana::tx_parser::{incoming_balance_changes, BalanceIncrease, MintTable, TxBalances};
use crate::types::chain::Chain;
use crate::types::deposit::{DepositAddress, DiscoveredDeposit};
use crate::types::engine::ChainScanner;
use crate::types::scan::ChainScan;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, instrument, warn};

pub struct SolanaScanner {
    rpc_pool: RpcClientPool,
    mints: MintTable,
    signature_limit: usize,
    /// Fee payers whose transfers are never deposits (the treasury funding gas).
    ignored_fee_payers: HashSet<String>,
}

impl SolanaScanner {
    pub fn new(
        rpc_pool: RpcClientPool,
        chain_config: &ChainConfig,
        signature_limit: usize,
        ignored_fee_payers: HashSet<String>,
    ) -> Self {
        let mints = chain_config
            .tokens
            .iter()
            .map(|t| (t.address.clone(), (t.asset, t.decimals)))
            .collect();
        Self {
            rpc_pool,
            mints,
            signature_limit,
            ignored_fee_payers,
        }
    }
}

/// One signature can carry several credited assets; the first keeps the bare signature
/// so the common case stays a plain chain identifier.
pub fn deposits_from_increases(
    signature: &str,
    slot: u64,
    increases: Vec<BalanceIncrease>,
) -> Vec<DiscoveredDeposit> {
    increases
        .into_iter()
        .enumerate()
        .map(|(i, increase)| DiscoveredDeposit {
            tx_hash: if i == 0 {
                signature.to_string()
            } else {
                format!("{}:{}", signature, increase.asset)
            },
            chain: Chain::Solana,
            asset: increase.asset,
            amount: increase.amount,
            decimals: increase.decimals,
            block_height: slot,
            baseline: None,
        })
        .collect()
}

#[async_trait]
impl ChainScanner for SolanaScanner {
    fn chain(&self) -> Chain {
        Chain::Solana
    }

    #[instrument(skip(self, address), fields(address = %address.address))]
    async fn scan(&self, address: &DepositAddress) -> Result<ChainScan> {
        let owner = Pubkey::from_str(&address.address)
            .with_context(|| format!("Invalid solana deposit address {}", address.address))?;
        let signatures = self
            .rpc_pool
            .get_signatures_for_address(&owner, self.signature_limit)
            .await?;

        let signatures: Vec<Signature> = signatures
            .into_iter()
            .filter(|s| s.err.is_none())
            .filter_map(|s| match Signature::from_str(&s.signature) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    warn!("Skipping unparseable signature {}: {}", s.signature, e);
                    None
                }
            })
            .collect();
        let transactions = join_all(
            signatures
                .iter()
                .map(|signature| self.rpc_pool.get_transaction(signature)),
        )
        .await;

        let mut deposits = vec![];
        for (signature, tx) in signatures.iter().zip(transactions) {
            let balances = match tx.and_then(|tx| TxBalances::try_from(&tx)) {
                Ok(balances) => balances,
                Err(e) => {
                    warn!("Skipping {}: {}", signature, e);
                    continue;
                }
            };
            if balances
                .account_keys
                .first()
                .is_some_and(|payer| self.ignored_fee_payers.contains(payer))
            {
                debug!("Skipping {} paid by an ignored fee payer", signature);
                continue;
            }
            let increases = incoming_balance_changes(&balances, &address.address, &self.mints);
            deposits.extend(deposits_from_increases(
                &signature.to_string(),
                balances.slot,
                increases,
            ));
        }
        debug!("Found {} incoming transfers", deposits.len());
        Ok(ChainScan {
            deposits,
            native_balance: None,
        })
    }
}
