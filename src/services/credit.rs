use crate::oracle::PriceOracle;
use crate::storage::DepositStore;
use crate::types::chain::Chain;
use crate::types::deposit::{
    CreditResult, CreditStatus, CreditWrite, DepositAddress, DepositStatus, DiscoveredDeposit,
    NewDeposit, UserId,
};
use crate::types::errors::CreditSkip;
use crate::types::notification::{spawn_notify, Notification, NotificationKind, Notifier};
use crate::utils::decimals::raw_to_numeric;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Turns discovered transfers into ledger credits, at most once per transaction identifier.
pub struct CreditEngine {
    store: Arc<dyn DepositStore>,
    oracle: Arc<dyn PriceOracle>,
    notifier: Arc<dyn Notifier>,
}

impl CreditEngine {
    pub fn new(store: Arc<dyn DepositStore>, oracle: Arc<dyn PriceOracle>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            oracle,
            notifier,
        }
    }

    /// Credits sequentially in input order, one result per input deposit.
    /// Skipped deposits leave no trace and are picked up again by the next scan.
    #[instrument(skip(self, deposits), fields(count = deposits.len()))]
    pub async fn credit_deposits(&self, user_id: UserId, deposits: Vec<DiscoveredDeposit>) -> Vec<CreditResult> {
        let mut addresses: HashMap<Chain, Option<DepositAddress>> = HashMap::new();
        let mut results = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            let result = match self.credit_one(user_id, &deposit, &mut addresses).await {
                Ok(result) => result,
                Err(skip) => {
                    warn!("Skipping {} on {}: {}", deposit.tx_hash, deposit.chain, skip);
                    CreditResult {
                        tx_hash: deposit.tx_hash.clone(),
                        chain: deposit.chain,
                        asset: deposit.asset,
                        status: CreditStatus::Skipped {
                            reason: skip.to_string(),
                        },
                        usd_value: None,
                    }
                }
            };
            results.push(result);
        }
        results
    }

    async fn credit_one(
        &self,
        user_id: UserId,
        deposit: &DiscoveredDeposit,
        addresses: &mut HashMap<Chain, Option<DepositAddress>>,
    ) -> Result<CreditResult, CreditSkip> {
        let processed = |usd_value| CreditResult {
            tx_hash: deposit.tx_hash.clone(),
            chain: deposit.chain,
            asset: deposit.asset,
            status: CreditStatus::AlreadyProcessed,
            usd_value,
        };

        if self
            .store
            .deposit_exists(&deposit.tx_hash)
            .await
            .map_err(|e| CreditSkip::Store(e.to_string()))?
        {
            debug!("{} already processed", deposit.tx_hash);
            return Ok(processed(None));
        }
        if deposit.amount == 0 {
            return Err(CreditSkip::ZeroAmount);
        }

        let usd_value = self
            .oracle
            .get_usd_value(deposit.asset, deposit.amount, deposit.decimals)
            .await
            .map_err(|e| CreditSkip::Valuation(e.to_string()))?;

        let address = match addresses.get(&deposit.chain) {
            Some(address) => address.clone(),
            None => {
                let address = self
                    .store
                    .deposit_address(user_id, deposit.chain)
                    .await
                    .map_err(|e| CreditSkip::Store(e.to_string()))?;
                addresses.insert(deposit.chain, address.clone());
                address
            }
        };
        let Some(address) = address else {
            error!("User {} has no {} deposit address for {}", user_id, deposit.chain, deposit.tx_hash);
            return Err(CreditSkip::NoDepositAddress(deposit.chain));
        };

        let new_deposit = NewDeposit {
            tx_hash: deposit.tx_hash.clone(),
            user_id,
            deposit_address_id: address.id,
            chain: deposit.chain,
            asset: deposit.asset,
            raw_amount: raw_to_numeric(deposit.amount).map_err(|e| CreditSkip::Store(e.to_string()))?,
            decimals: deposit.decimals as i16,
            usd_value,
            status: DepositStatus::Confirmed,
            block_height: i64::try_from(deposit.block_height)
                .map_err(|_| CreditSkip::InvalidBlockHeight(deposit.block_height))?,
            created_at: Utc::now(),
        };

        match self
            .store
            .credit_deposit(new_deposit, deposit.baseline.clone())
            .await
            .map_err(|e| CreditSkip::Store(e.to_string()))?
        {
            CreditWrite::AlreadyProcessed => {
                debug!("{} lost the insert race, already processed", deposit.tx_hash);
                Ok(processed(None))
            }
            CreditWrite::BaselineMoved => Err(CreditSkip::BaselineMoved),
            CreditWrite::Credited { deposit: row, user_handle } => {
                info!(
                    "Credited ${} ({} {}) to user {} from {}",
                    row.usd_value, deposit.amount, deposit.asset, user_id, row.tx_hash
                );
                spawn_notify(
                    &self.notifier,
                    Notification {
                        kind: NotificationKind::DepositCredited,
                        user_handle: Some(user_handle),
                        amount_usd: Some(row.usd_value),
                        asset: row.asset,
                        chain: row.chain,
                        tx_ref: row.tx_hash.clone(),
                    },
                );
                Ok(CreditResult {
                    tx_hash: row.tx_hash,
                    chain: row.chain,
                    asset: row.asset,
                    status: CreditStatus::Credited,
                    usd_value: Some(usd_value),
                })
            }
        }
    }
}
