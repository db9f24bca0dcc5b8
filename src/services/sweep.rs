use crate::config::constants::{BASELINE_SETTLE_ATTEMPTS, BASELINE_SETTLE_BACKOFF_MS};
use crate::storage::{DepositStore, SweepStore};
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::DepositAddress;
use crate::types::engine::ChainSweeper;
use crate::types::errors::SweepError;
use crate::types::notification::{spawn_notify, Notification, NotificationKind, Notifier};
use crate::types::sweep::{ClaimedDeposit, SweepBatchStatus, SweepFailure, SweepReport};
use crate::utils::decimals::numeric_to_raw;
use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// What a native sweep may send: balance minus the exact fee minus the safety buffer.
/// Fails instead of ever producing a negative or zero transfer.
pub fn native_sweep_amount(balance: u128, fee: u128, buffer: u128) -> Result<u128, SweepError> {
    let insufficient = SweepError::InsufficientForFee { balance, fee, buffer };
    let reserved = fee.checked_add(buffer).ok_or_else(|| insufficient.clone())?;
    match balance.checked_sub(reserved) {
        Some(amount) if amount > 0 => Ok(amount),
        _ => Err(insufficient),
    }
}

/// Native units a deposit address still needs before it can pay `required`.
pub fn funding_shortfall(balance: u128, required: u128) -> u128 {
    required.saturating_sub(balance)
}

/// All claimed deposits of one asset on one address, settled by a single on-chain sweep.
#[derive(Debug)]
struct SweepGroup {
    address: DepositAddress,
    asset: Asset,
    deposit_ids: Vec<i32>,
    /// Sum of the claimed raw amounts, exactly what the sweep moves.
    amount: Result<u128, SweepError>,
}

fn add_claimed(total: Result<u128, SweepError>, raw_amount: &Decimal) -> Result<u128, SweepError> {
    let raw = numeric_to_raw(raw_amount).map_err(|e| SweepError::InvalidAmount(e.to_string()))?;
    total?
        .checked_add(raw)
        .ok_or_else(|| SweepError::InvalidAmount("claimed total overflows".to_string()))
}

/// Coalesces deposits per (address, asset) keeping claim order, tokens ahead of native.
fn plan_sweeps(deposits: Vec<ClaimedDeposit>) -> Vec<SweepGroup> {
    let mut groups: Vec<SweepGroup> = vec![];
    for deposit in deposits {
        match groups
            .iter_mut()
            .find(|g| g.address.id == deposit.address.id && g.asset == deposit.asset)
        {
            Some(group) => {
                group.deposit_ids.push(deposit.deposit_id);
                group.amount = add_claimed(group.amount.clone(), &deposit.raw_amount);
            }
            None => groups.push(SweepGroup {
                amount: add_claimed(Ok(0), &deposit.raw_amount),
                address: deposit.address,
                asset: deposit.asset,
                deposit_ids: vec![deposit.deposit_id],
            }),
        }
    }
    // stable, so claim order survives inside each class
    groups.sort_by_key(|g| g.asset.is_native());
    groups
}

pub struct SweepEngine {
    store: Arc<dyn SweepStore>,
    deposits: Arc<dyn DepositStore>,
    sweepers: HashMap<Chain, Arc<dyn ChainSweeper>>,
    notifier: Arc<dyn Notifier>,
    batch_size: i64,
    submission_delay: Duration,
}

impl SweepEngine {
    pub fn new(
        store: Arc<dyn SweepStore>,
        deposits: Arc<dyn DepositStore>,
        sweepers: HashMap<Chain, Arc<dyn ChainSweeper>>,
        notifier: Arc<dyn Notifier>,
        batch_size: i64,
        submission_delay: Duration,
    ) -> Self {
        Self {
            store,
            deposits,
            sweepers,
            notifier,
            batch_size,
            submission_delay,
        }
    }

    pub fn chains(&self) -> Vec<Chain> {
        let mut chains: Vec<Chain> = self.sweepers.keys().copied().collect();
        chains.sort();
        chains
    }

    /// Claims and sweeps one batch of `chain`. `None` when nothing was waiting.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, chain: Chain) -> Result<Option<SweepReport>> {
        let sweeper = self
            .sweepers
            .get(&chain)
            .ok_or_else(|| anyhow!("No sweeper configured for {}", chain))?;
        let Some(claimed) = self.store.claim_batch(chain, self.batch_size).await? else {
            return Ok(None);
        };
        let batch_id = claimed.batch.id;
        info!(
            "Claimed sweep batch {} on {} with {} deposits worth ${}",
            batch_id, chain, claimed.batch.deposit_count, claimed.batch.total_usd
        );

        let groups = plan_sweeps(claimed.deposits);
        self.store.mark_batch_executing(batch_id).await?;

        let mut swept = vec![];
        let mut failures = vec![];
        let mut tx_hashes = vec![];
        for (i, group) in groups.iter().enumerate() {
            if i > 0 && !self.submission_delay.is_zero() {
                tokio::time::sleep(self.submission_delay).await;
            }
            let swept_group = match &group.amount {
                Ok(amount) => {
                    sweeper
                        .sweep(&group.address, group.asset, *amount, self.deposits.as_ref())
                        .await
                }
                Err(e) => Err(e.clone()),
            };
            match swept_group {
                Ok(outcome) => {
                    tx_hashes.push(outcome.tx_hash.clone());
                    for deposit_id in &group.deposit_ids {
                        match self.store.mark_deposit_swept(*deposit_id, &outcome.tx_hash).await {
                            Ok(()) => swept.push(*deposit_id),
                            Err(e) => {
                                error!("Deposit {} swept in {} but not recorded: {}", deposit_id, outcome.tx_hash, e);
                                failures.push(SweepFailure {
                                    deposit_id: *deposit_id,
                                    error: format!("swept in {} but not recorded: {}", outcome.tx_hash, e),
                                });
                            }
                        }
                    }
                    if outcome.native_spent > 0 {
                        self.settle_baseline(&group.address, outcome.native_spent).await;
                    }
                }
                Err(e) => {
                    if e.is_fatal() {
                        self.alert_mismatch(chain, group, &e);
                    } else {
                        warn!("Sweep of {} from {} failed: {}", group.asset, group.address.address, e);
                    }
                    for deposit_id in &group.deposit_ids {
                        if let Err(store_err) = self.store.mark_deposit_failed(*deposit_id, &e.to_string()).await {
                            warn!("Failed to record sweep error of deposit {}: {}", deposit_id, store_err);
                        }
                        failures.push(SweepFailure {
                            deposit_id: *deposit_id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let status = if failures.is_empty() {
            SweepBatchStatus::Completed
        } else {
            SweepBatchStatus::Failed
        };
        let error_summary = (!failures.is_empty()).then(|| {
            failures
                .iter()
                .map(|f| format!("deposit {}: {}", f.deposit_id, f.error))
                .collect::<Vec<_>>()
                .join("; ")
        });
        self.store
            .finish_batch(batch_id, status, &tx_hashes, error_summary)
            .await?;
        info!(
            "Sweep batch {} on {} finished {:?}: {} swept, {} failed",
            batch_id,
            chain,
            status,
            swept.len(),
            failures.len()
        );

        Ok(Some(SweepReport {
            batch_id,
            chain,
            status,
            swept,
            failures,
            tx_hashes,
        }))
    }

    /// Takes what a sweep spent off the address baseline. A baseline left too high hides
    /// that many units of later deposits, so the failure is logged as an error.
    async fn settle_baseline(&self, address: &DepositAddress, spent: u128) {
        let Ok(spent_signed) = i128::try_from(spent) else {
            error!("Sweep of {} spent {} units, baseline left untouched", address.address, spent);
            return;
        };
        for attempt in 1..=BASELINE_SETTLE_ATTEMPTS {
            match self.deposits.shift_balance_baseline(address.id, -spent_signed).await {
                Ok(()) => return,
                Err(e) if attempt < BASELINE_SETTLE_ATTEMPTS => {
                    warn!("Baseline update of {} failed, attempt {}: {}", address.address, attempt, e);
                    tokio::time::sleep(Duration::from_millis(BASELINE_SETTLE_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => error!(
                    "Baseline of {} stays {} units too high after a sweep: {}",
                    address.address, spent, e
                ),
            }
        }
    }

    fn alert_mismatch(&self, chain: Chain, group: &SweepGroup, e: &SweepError) {
        error!(
            "Refusing to sweep {} on {} for address {} (index {}): {}",
            group.asset, chain, group.address.address, group.address.derivation_index, e
        );
        spawn_notify(
            &self.notifier,
            Notification {
                kind: NotificationKind::SweepAddressMismatch,
                user_handle: None,
                amount_usd: None,
                asset: group.asset,
                chain,
                tx_ref: e.to_string(),
            },
        );
    }

    /// Operator action after a failed batch item was settled by hand.
    pub async fn reconcile_swept_deposit(&self, deposit_id: i32, tx_hash: &str) -> Result<()> {
        self.store.reconcile_failed_deposit(deposit_id, tx_hash).await?;
        info!("Deposit {} reconciled as swept in {}", deposit_id, tx_hash);
        Ok(())
    }
}
