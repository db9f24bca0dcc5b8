use crate::schema::*;
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::{DepositAddress, UserId};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

pub type SweepBatchId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ExistingTypePath = "crate::schema::sql_types::SweepBatchStatus"]
pub enum SweepBatchStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl SweepBatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SweepBatchStatus::Completed | SweepBatchStatus::Failed)
    }

    /// PENDING -> EXECUTING -> COMPLETED | FAILED, nothing else.
    pub fn can_transition_to(&self, next: SweepBatchStatus) -> bool {
        matches!(
            (self, next),
            (SweepBatchStatus::Pending, SweepBatchStatus::Executing)
                | (SweepBatchStatus::Executing, SweepBatchStatus::Completed)
                | (SweepBatchStatus::Executing, SweepBatchStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = sweep_batches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SweepBatch {
    pub id: SweepBatchId,
    pub chain: Chain,
    pub status: SweepBatchStatus,
    pub deposit_count: i32,
    pub total_usd: Decimal,
    pub tx_hashes: Vec<String>,
    pub error_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A deposit stamped with a batch id, joined with the address it has to be swept from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedDeposit {
    pub deposit_id: i32,
    pub user_id: UserId,
    pub tx_hash: String,
    pub asset: Asset,
    pub raw_amount: Decimal,
    pub decimals: i16,
    pub usd_value: Decimal,
    pub address: DepositAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedBatch {
    pub batch: SweepBatch,
    pub deposits: Vec<ClaimedDeposit>,
}

/// Result of one on-chain sweep of an (address, asset) balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    pub tx_hash: String,
    /// Native units that left the address, transfer and fees, taken off its scan baseline.
    pub native_spent: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub deposit_id: i32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepReport {
    pub batch_id: SweepBatchId,
    pub chain: Chain,
    pub status: SweepBatchStatus,
    pub swept: Vec<i32>,
    pub failures: Vec<SweepFailure>,
    pub tx_hashes: Vec<String>,
}
