pub mod cache;
#[cfg(test)]
pub mod memory;
pub mod persistent;

use crate::types::chain::Chain;
use crate::types::deposit::{BaselineMove, CreditWrite, DepositAddress, NewDeposit, NewScanLog, UserId};
use crate::types::errors::{BoostError, PayoutError};
use crate::types::participant::{Participant, ParticipantId, QueueEntry, TrenchId};
use crate::types::sweep::{ClaimedBatch, SweepBatchId, SweepBatchStatus};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Ledger side of scanning and crediting.
#[async_trait]
pub trait DepositStore: Send + Sync {
    async fn deposit_addresses(&self, user_id: UserId) -> Result<Vec<DepositAddress>>;

    async fn deposit_address(&self, user_id: UserId, chain: Chain) -> Result<Option<DepositAddress>>;

    /// Users owning at least one deposit address, for scheduled scans.
    async fn users_with_deposit_addresses(&self) -> Result<Vec<UserId>>;

    /// Adds `delta` to the native baseline, a missing baseline counts as zero.
    /// Sweeps use it to account for the native units they move themselves.
    async fn shift_balance_baseline(&self, deposit_address_id: i32, delta: i128) -> Result<()>;

    async fn deposit_exists(&self, tx_hash: &str) -> Result<bool>;

    /// Inserts the deposit, adds its USD value to the owner's balance and applies `baseline`
    /// as a compare-and-set, all in one transaction.
    /// A conflicting transaction identifier writes nothing and reports `AlreadyProcessed`,
    /// a baseline that moved since the scan writes nothing and reports `BaselineMoved`.
    async fn credit_deposit(&self, deposit: NewDeposit, baseline: Option<BaselineMove>) -> Result<CreditWrite>;

    async fn log_scan_attempt(&self, entry: NewScanLog) -> Result<()>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Active participants of a trench joined with their owner's belief score, in no particular order.
    async fn active_entries(&self, trench_id: TrenchId) -> Result<Vec<QueueEntry>>;

    async fn participant(&self, participant_id: ParticipantId) -> Result<Option<Participant>>;

    /// Moves `points` from the user's spendable balance onto the participant, all or nothing.
    async fn transfer_boost_points(
        &self,
        user_id: UserId,
        participant_id: ParticipantId,
        points: i64,
    ) -> Result<Participant, BoostError>;

    async fn set_expected_payout(&self, participant_id: ParticipantId, at: DateTime<Utc>) -> Result<()>;

    /// Applies floor(boost * percent / 100) to every active participant with a non-zero decay.
    async fn decay_boost_points(&self, decay_percent: u32) -> Result<usize>;

    /// Adds `amount` to the received total, completing the participant when the cap is reached.
    /// Callers validate against the remaining cap, the store enforces it again.
    async fn record_payout(
        &self,
        participant_id: ParticipantId,
        amount: Decimal,
    ) -> Result<Participant, PayoutError>;

    async fn exit_participant(&self, participant_id: ParticipantId) -> Result<Participant, PayoutError>;
}

#[async_trait]
pub trait SweepStore: Send + Sync {
    /// Creates a PENDING batch and stamps up to `limit` unclaimed sweepable deposits of `chain`
    /// with it, oldest first, in one transaction. `None` when nothing is waiting.
    async fn claim_batch(&self, chain: Chain, limit: i64) -> Result<Option<ClaimedBatch>>;

    /// PENDING -> EXECUTING, exactly once.
    async fn mark_batch_executing(&self, batch_id: SweepBatchId) -> Result<()>;

    async fn mark_deposit_swept(&self, deposit_id: i32, tx_hash: &str) -> Result<()>;

    async fn mark_deposit_failed(&self, deposit_id: i32, error: &str) -> Result<()>;

    /// EXECUTING -> COMPLETED | FAILED.
    async fn finish_batch(
        &self,
        batch_id: SweepBatchId,
        status: SweepBatchStatus,
        tx_hashes: &[String],
        error_summary: Option<String>,
    ) -> Result<()>;

    /// Operator reconciliation of a deposit that failed inside a batch, it stays linked to that batch.
    async fn reconcile_failed_deposit(&self, deposit_id: i32, tx_hash: &str) -> Result<()>;
}

/// Value stored under a claimed key: when it was claimed and by whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub since: i64,
    pub owner: String,
}

impl Claim {
    /// A claim with a fresh random owner token.
    pub fn new(since: i64) -> Self {
        Self {
            since,
            owner: Uuid::new_v4().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.since, self.owner)
    }

    /// Reads the claim timestamp back, bare timestamps from older writers included.
    pub fn since_of(value: &str) -> Option<i64> {
        value.split(':').next()?.parse().ok()
    }
}

/// Short-lived keys in a fast external store (scan cooldowns, sweep locks).
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// Atomically claims `key` for `ttl_s` seconds.
    /// Returns `None` when claimed, or the timestamp held by the current owner.
    async fn try_acquire(&self, key: &str, claim: &Claim, ttl_s: u64) -> Result<Option<i64>>;

    /// Deletes `key` only while `claim` still holds it. `false` when it expired or changed hands.
    async fn release(&self, key: &str, claim: &Claim) -> Result<bool>;
}
