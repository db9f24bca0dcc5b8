use crate::schema::*;
use crate::types::chain::{Asset, Chain};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

pub type UserId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ExistingTypePath = "crate::schema::sql_types::DepositStatus"]
pub enum DepositStatus {
    Safe,
    Confirmed,
    Swept,
}

impl DepositStatus {
    pub fn is_sweepable(&self) -> bool {
        matches!(self, DepositStatus::Safe | DepositStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = deposit_addresses)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct DepositAddress {
    pub id: i32,
    pub user_id: UserId,
    pub chain: Chain,
    pub address: String,
    pub derivation_index: i32,
    /// Raw native balance seen by the previous scan, baseline for EVM native deltas.
    pub last_balance: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The stored native baseline a balance-diff deposit was computed against, and the balance
/// that replaces it once the deposit is credited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaselineMove {
    pub previous: Option<String>,
    pub current: String,
}

/// A transfer a scanner saw on chain. Never persisted as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDeposit {
    pub tx_hash: String,
    pub chain: Chain,
    pub asset: Asset,
    pub amount: u128,
    pub decimals: u8,
    pub block_height: u64,
    /// Set for native deposits found by balance diffing, written in the same transaction as the credit.
    pub baseline: Option<BaselineMove>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = deposits)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Deposit {
    pub id: i32,
    pub tx_hash: String,
    pub user_id: UserId,
    pub deposit_address_id: i32,
    pub chain: Chain,
    pub asset: Asset,
    pub raw_amount: Decimal,
    pub decimals: i16,
    pub usd_value: Decimal,
    pub status: DepositStatus,
    pub block_height: i64,
    pub sweep_batch_id: Option<i32>,
    pub sweep_tx_hash: Option<String>,
    pub sweep_error: Option<String>,
    pub swept_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = deposits)]
pub struct NewDeposit {
    pub tx_hash: String,
    pub user_id: UserId,
    pub deposit_address_id: i32,
    pub chain: Chain,
    pub asset: Asset,
    pub raw_amount: Decimal,
    pub decimals: i16,
    pub usd_value: Decimal,
    pub status: DepositStatus,
    pub block_height: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the atomic deposit-plus-balance write.
#[derive(Debug, Clone, PartialEq)]
pub enum CreditWrite {
    Credited { deposit: Deposit, user_handle: String },
    /// The unique transaction identifier already had a row; nothing was written.
    AlreadyProcessed,
    /// The stored baseline no longer matches the one the deposit was diffed against; nothing was written.
    BaselineMoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CreditStatus {
    Credited,
    AlreadyProcessed,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditResult {
    pub tx_hash: String,
    pub chain: Chain,
    pub asset: Asset,
    pub status: CreditStatus,
    pub usd_value: Option<Decimal>,
}

impl CreditResult {
    pub fn is_credited(&self) -> bool {
        self.status == CreditStatus::Credited
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = scan_logs)]
pub struct NewScanLog {
    pub user_id: UserId,
    pub requested_chain: Option<Chain>,
    pub chains_scanned: i32,
    pub chains_failed: i32,
    pub deposits_found: i32,
    pub created_at: DateTime<Utc>,
}
