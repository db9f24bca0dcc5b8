use crate::config::constants::SCAN_COOLDOWN_KEY_PREFIX;
use crate::services::credit::CreditEngine;
use crate::storage::{Claim, CooldownStore, DepositStore};
use crate::types::chain::Chain;
use crate::types::deposit::{CreditStatus, DepositAddress, NewScanLog, UserId};
use crate::types::engine::ChainScanner;
use crate::types::errors::{ChainScanFailure, ScanError};
use crate::types::scan::{ChainFailure, ChainScan, ScanResult};
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub struct ScanOrchestrator {
    store: Arc<dyn DepositStore>,
    cooldowns: Arc<dyn CooldownStore>,
    scanners: HashMap<Chain, Arc<dyn ChainScanner>>,
    credit: Arc<CreditEngine>,
    cooldown_s: u64,
    chain_timeout: Duration,
}

impl ScanOrchestrator {
    pub fn new(
        store: Arc<dyn DepositStore>,
        cooldowns: Arc<dyn CooldownStore>,
        scanners: HashMap<Chain, Arc<dyn ChainScanner>>,
        credit: Arc<CreditEngine>,
        cooldown_s: u64,
        chain_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cooldowns,
            scanners,
            credit,
            cooldown_s,
            chain_timeout,
        }
    }

    /// On-demand scan of a user's deposit addresses, optionally restricted to one chain.
    #[instrument(skip(self))]
    pub async fn scan_for_deposits(
        &self,
        user_id: UserId,
        chain_filter: Option<Chain>,
    ) -> Result<ScanResult, ScanError> {
        self.check_rate_limit(user_id).await?;

        let addresses = self.store.deposit_addresses(user_id).await?;
        if addresses.is_empty() {
            return Err(ScanError::NoDepositAddress);
        }
        let addresses: Vec<DepositAddress> = addresses
            .into_iter()
            .filter(|a| chain_filter.map_or(true, |chain| a.chain == chain))
            .collect();
        if let (true, Some(chain)) = (addresses.is_empty(), chain_filter) {
            return Err(ScanError::NoMatchingChain(chain));
        }

        let result = self.scan_addresses(user_id, &addresses).await;
        self.log_attempt(user_id, chain_filter, &result).await;
        Ok(result)
    }

    /// Scheduled scan of everyone owning a deposit address, bypassing the per-user cooldown.
    /// Returns the number of newly credited deposits.
    pub async fn scan_all_users(&self) -> anyhow::Result<usize> {
        let users = self.store.users_with_deposit_addresses().await?;
        let mut credited = 0;
        for user_id in users {
            match self.store.deposit_addresses(user_id).await {
                Ok(addresses) => {
                    let result = self.scan_addresses(user_id, &addresses).await;
                    credited += result.deposits_found();
                }
                Err(e) => warn!("Could not load addresses of user {}: {}", user_id, e),
            }
        }
        if credited > 0 {
            info!("Scheduled scan credited {} deposits", credited);
        }
        Ok(credited)
    }

    /// A held cooldown key means a scan started less than `cooldown_s` ago.
    /// An unreachable store refuses the scan instead of letting it through.
    async fn check_rate_limit(&self, user_id: UserId) -> Result<(), ScanError> {
        let key = format!("{}{}", SCAN_COOLDOWN_KEY_PREFIX, user_id);
        let now = Utc::now().timestamp();
        match self.cooldowns.try_acquire(&key, &Claim::new(now), self.cooldown_s).await {
            Ok(None) => Ok(()),
            Ok(Some(last_scan)) => {
                let elapsed = now.saturating_sub(last_scan).max(0) as u64;
                Err(ScanError::RateLimited {
                    retry_after_seconds: self.cooldown_s.saturating_sub(elapsed).max(1),
                })
            }
            Err(e) => {
                warn!("Rate limit store unavailable, refusing scan: {}", e);
                Err(ScanError::ServiceUnavailable(e.to_string()))
            }
        }
    }

    async fn scan_chain(&self, address: &DepositAddress) -> Result<ChainScan, ChainScanFailure> {
        let chain = address.chain;
        let Some(scanner) = self.scanners.get(&chain) else {
            return Err(ChainScanFailure::ScanError {
                chain,
                error: "no scanner configured".to_string(),
            });
        };
        match tokio::time::timeout(self.chain_timeout, scanner.scan(address)).await {
            Ok(Ok(scan)) => Ok(scan),
            Ok(Err(e)) => Err(ChainScanFailure::ScanError {
                chain,
                error: e.to_string(),
            }),
            Err(_) => Err(ChainScanFailure::Timeout(chain)),
        }
    }

    async fn scan_addresses(&self, user_id: UserId, addresses: &[DepositAddress]) -> ScanResult {
        let outcomes = join_all(
            addresses
                .iter()
                .map(|address| async move { (address, self.scan_chain(address).await) }),
        )
        .await;

        let mut result = ScanResult::default();
        let mut discovered = vec![];
        let mut balances = vec![];
        for (address, outcome) in outcomes {
            match outcome {
                Ok(scan) => {
                    result.chains_scanned.push(address.chain);
                    if scan.deposits.is_empty() {
                        result.chains_empty.push(address.chain);
                    }
                    if let Some(balance) = scan.native_balance {
                        balances.push((address, balance));
                    }
                    discovered.extend(scan.deposits);
                }
                Err(ChainScanFailure::Timeout(chain)) => {
                    warn!("{} scan for user {} timed out", chain, user_id);
                    result.chains_timed_out.push(chain);
                }
                Err(ChainScanFailure::ScanError { chain, error }) => {
                    warn!("{} scan for user {} failed: {}", chain, user_id, error);
                    result.chains_failed.push(ChainFailure { chain, error });
                }
            }
        }

        let credits = if discovered.is_empty() {
            vec![]
        } else {
            self.credit.credit_deposits(user_id, discovered).await
        };

        // native baselines move inside the credit transaction or through sweeps, never here
        for (address, balance) in balances {
            if drifted_below_baseline(address.last_balance.as_deref(), &balance) {
                warn!(
                    "{} balance {} of {} is below its baseline {:?}",
                    address.chain, balance, address.address, address.last_balance
                );
            }
        }

        for credit in credits {
            match credit.status {
                CreditStatus::Credited => result.new_deposits.push(credit),
                CreditStatus::AlreadyProcessed => result.already_processed.push(credit),
                CreditStatus::Skipped { .. } => result.skipped.push(credit),
            }
        }
        result
    }

    async fn log_attempt(&self, user_id: UserId, requested_chain: Option<Chain>, result: &ScanResult) {
        let entry = NewScanLog {
            user_id,
            requested_chain,
            chains_scanned: result.chains_scanned.len() as i32,
            chains_failed: (result.chains_timed_out.len() + result.chains_failed.len()) as i32,
            deposits_found: result.deposits_found() as i32,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.log_scan_attempt(entry).await {
            warn!("Failed to log scan attempt of user {}: {}", user_id, e);
        }
    }
}

fn drifted_below_baseline(baseline: Option<&str>, balance: &str) -> bool {
    match (baseline.map(str::parse::<u128>), balance.parse::<u128>()) {
        (Some(Ok(baseline)), Ok(balance)) => balance < baseline,
        _ => false,
    }
}
