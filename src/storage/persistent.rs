use crate::schema::{deposit_addresses, deposits, participants, scan_logs, sweep_batches, users};
use crate::storage::{DepositStore, QueueStore, SweepStore};
use crate::types::chain::Chain;
use crate::types::deposit::{
    BaselineMove, CreditWrite, Deposit, DepositAddress, DepositStatus, NewDeposit, NewScanLog, UserId,
};
use crate::types::errors::{BoostError, PayoutError};
use crate::types::participant::{
    Participant, ParticipantId, ParticipantStatus, QueueEntry, TrenchId,
};
use crate::types::sweep::{ClaimedBatch, ClaimedDeposit, SweepBatch, SweepBatchId, SweepBatchStatus};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub type DbPool = Arc<Pool<AsyncPgConnection>>;

pub fn connect(database_url: &str, max_size: usize) -> Result<DbPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(max_size)
        .build()
        .context("Failed to create pool.")?;
    Ok(Arc::new(pool))
}

/// Rolls a credit back when its baseline compare-and-set finds another value.
#[derive(Debug, thiserror::Error)]
#[error("native baseline moved")]
struct BaselineMoved;

/// `baseline + delta` in smallest units, a missing baseline counts as zero and the result never drops below zero.
pub fn shifted_baseline(baseline: Option<&str>, delta: i128) -> Result<String> {
    let current = match baseline {
        Some(raw) => raw
            .parse::<u128>()
            .with_context(|| format!("Corrupt baseline {}", raw))?,
        None => 0,
    };
    let shifted = if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        let decrease = delta.unsigned_abs();
        if decrease > current {
            warn!("Baseline {} shifted by {}, clamping at zero", current, delta);
        }
        current.saturating_sub(decrease)
    };
    Ok(shifted.to_string())
}

/// Postgres ledger: deposits, balances, queue positions and sweep batches.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositStore for PgStore {
    async fn deposit_addresses(&self, user_id: UserId) -> Result<Vec<DepositAddress>> {
        let mut conn = self.pool.get().await?;
        let addresses = deposit_addresses::table
            .filter(deposit_addresses::user_id.eq(user_id))
            .order(deposit_addresses::id.asc())
            .select(DepositAddress::as_select())
            .load(&mut conn)
            .await?;
        Ok(addresses)
    }

    async fn deposit_address(&self, user_id: UserId, chain: Chain) -> Result<Option<DepositAddress>> {
        let mut conn = self.pool.get().await?;
        let address = deposit_addresses::table
            .filter(deposit_addresses::user_id.eq(user_id))
            .filter(deposit_addresses::chain.eq(chain))
            .select(DepositAddress::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(address)
    }

    async fn users_with_deposit_addresses(&self) -> Result<Vec<UserId>> {
        let mut conn = self.pool.get().await?;
        let ids = deposit_addresses::table
            .select(deposit_addresses::user_id)
            .distinct()
            .load::<UserId>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn shift_balance_baseline(&self, deposit_address_id: i32, delta: i128) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<(), anyhow::Error, _>(move |conn| {
            async move {
                let current = deposit_addresses::table
                    .find(deposit_address_id)
                    .select(deposit_addresses::last_balance)
                    .for_update()
                    .first::<Option<String>>(conn)
                    .await?;
                let shifted = shifted_baseline(current.as_deref(), delta)?;
                diesel::update(deposit_addresses::table.find(deposit_address_id))
                    .set(deposit_addresses::last_balance.eq(Some(shifted)))
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn deposit_exists(&self, tx_hash: &str) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists = diesel::select(diesel::dsl::exists(
            deposits::table.filter(deposits::tx_hash.eq(tx_hash)),
        ))
        .get_result::<bool>(&mut conn)
        .await?;
        Ok(exists)
    }

    async fn credit_deposit(&self, deposit: NewDeposit, baseline: Option<BaselineMove>) -> Result<CreditWrite> {
        let mut conn = self.pool.get().await?;
        let written = conn.transaction::<CreditWrite, anyhow::Error, _>(move |conn| {
            async move {
                // the unique index on tx_hash is the idempotency guard, not the pre-check
                let inserted = diesel::insert_into(deposits::table)
                    .values(&deposit)
                    .on_conflict(deposits::tx_hash)
                    .do_nothing()
                    .returning(Deposit::as_returning())
                    .get_result(conn)
                    .await
                    .optional()?;
                let Some(deposit) = inserted else {
                    return Ok(CreditWrite::AlreadyProcessed);
                };
                if let Some(baseline) = baseline {
                    let moved = diesel::update(
                        deposit_addresses::table
                            .find(deposit.deposit_address_id)
                            .filter(deposit_addresses::last_balance.is_not_distinct_from(baseline.previous)),
                    )
                    .set(deposit_addresses::last_balance.eq(Some(baseline.current)))
                    .execute(conn)
                    .await?;
                    if moved == 0 {
                        return Err(BaselineMoved.into());
                    }
                }
                let user_handle = diesel::update(users::table.find(deposit.user_id))
                    .set(users::balance_usd.eq(users::balance_usd + deposit.usd_value))
                    .returning(users::handle)
                    .get_result::<String>(conn)
                    .await?;
                Ok(CreditWrite::Credited {
                    deposit,
                    user_handle,
                })
            }
            .scope_boxed()
        })
        .await;
        match written {
            Err(e) if e.is::<BaselineMoved>() => {
                debug!("Baseline moved under deposit, rolled back");
                Ok(CreditWrite::BaselineMoved)
            }
            other => other,
        }
    }

    async fn log_scan_attempt(&self, entry: NewScanLog) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::insert_into(scan_logs::table)
            .values(&entry)
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for PgStore {
    async fn active_entries(&self, trench_id: TrenchId) -> Result<Vec<QueueEntry>> {
        let mut conn = self.pool.get().await?;
        let rows = participants::table
            .inner_join(users::table)
            .filter(participants::trench_id.eq(trench_id))
            .filter(participants::status.eq(ParticipantStatus::Active))
            .select((Participant::as_select(), users::belief_score))
            .load::<(Participant, i64)>(&mut conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(participant, belief_score)| QueueEntry {
                participant,
                belief_score,
            })
            .collect())
    }

    async fn participant(&self, participant_id: ParticipantId) -> Result<Option<Participant>> {
        let mut conn = self.pool.get().await?;
        let participant = participants::table
            .find(participant_id)
            .select(Participant::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(participant)
    }

    async fn transfer_boost_points(
        &self,
        user_id: UserId,
        participant_id: ParticipantId,
        points: i64,
    ) -> Result<Participant, BoostError> {
        let mut conn = self.pool.get().await.map_err(|e| BoostError::Store(e.into()))?;
        conn.transaction::<Participant, BoostError, _>(move |conn| {
            async move {
                // users row first, then participants row, on every path
                let available = users::table
                    .find(user_id)
                    .select(users::boost_points)
                    .for_update()
                    .first::<i64>(conn)
                    .await?;
                if available < points {
                    return Err(BoostError::InsufficientPoints {
                        available,
                        requested: points,
                    });
                }
                let participant = participants::table
                    .find(participant_id)
                    .select(Participant::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .filter(|p| p.user_id == user_id)
                    .ok_or(BoostError::PositionNotFound)?;
                if !participant.is_active() {
                    return Err(BoostError::PositionInactive);
                }

                diesel::update(users::table.find(user_id))
                    .set(users::boost_points.eq(users::boost_points - points))
                    .execute(conn)
                    .await?;
                let participant = diesel::update(participants::table.find(participant_id))
                    .set(participants::boost_points.eq(participants::boost_points + points))
                    .returning(Participant::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(participant)
            }
            .scope_boxed()
        })
        .await
    }

    async fn set_expected_payout(&self, participant_id: ParticipantId, at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(participants::table.find(participant_id))
            .set(participants::expected_payout_at.eq(Some(at)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn decay_boost_points(&self, decay_percent: u32) -> Result<usize> {
        let pct = i64::from(decay_percent);
        let mut conn = self.pool.get().await?;
        // integer division on non-negative values floors; rows whose decay rounds to zero are untouched
        let updated = diesel::update(
            participants::table
                .filter(participants::status.eq(ParticipantStatus::Active))
                .filter((participants::boost_points * pct).ge(100_i64)),
        )
        .set(
            participants::boost_points
                .eq(participants::boost_points - participants::boost_points * pct / 100_i64),
        )
        .execute(&mut conn)
        .await?;
        Ok(updated)
    }

    async fn record_payout(
        &self,
        participant_id: ParticipantId,
        amount: Decimal,
    ) -> Result<Participant, PayoutError> {
        let mut conn = self.pool.get().await.map_err(|e| PayoutError::Store(e.into()))?;
        conn.transaction::<Participant, PayoutError, _>(move |conn| {
            async move {
                let participant = participants::table
                    .find(participant_id)
                    .select(Participant::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or(PayoutError::PositionNotFound)?;
                if !participant.is_active() {
                    return Err(PayoutError::PositionInactive);
                }
                let remaining = participant.remaining_cap();
                if amount > remaining {
                    return Err(PayoutError::ExceedsCap { amount, remaining });
                }
                let received = participant.received_amount + amount;
                let completed = received >= participant.max_payout;
                let (status, completed_at) = if completed {
                    (ParticipantStatus::Completed, Some(Utc::now()))
                } else {
                    (ParticipantStatus::Active, None)
                };
                let participant = diesel::update(participants::table.find(participant_id))
                    .set((
                        participants::received_amount.eq(received),
                        participants::status.eq(status),
                        participants::completed_at.eq(completed_at),
                    ))
                    .returning(Participant::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(participant)
            }
            .scope_boxed()
        })
        .await
    }

    async fn exit_participant(&self, participant_id: ParticipantId) -> Result<Participant, PayoutError> {
        let mut conn = self.pool.get().await.map_err(|e| PayoutError::Store(e.into()))?;
        let exited = diesel::update(
            participants::table
                .find(participant_id)
                .filter(participants::status.eq(ParticipantStatus::Active)),
        )
        .set((
            participants::status.eq(ParticipantStatus::Exited),
            participants::completed_at.eq(Some(Utc::now())),
        ))
        .returning(Participant::as_returning())
        .get_result(&mut conn)
        .await
        .optional()?;
        match exited {
            Some(participant) => Ok(participant),
            None => match self.participant(participant_id).await? {
                Some(_) => Err(PayoutError::PositionInactive),
                None => Err(PayoutError::PositionNotFound),
            },
        }
    }
}

#[async_trait]
impl SweepStore for PgStore {
    async fn claim_batch(&self, chain: Chain, limit: i64) -> Result<Option<ClaimedBatch>> {
        let mut conn = self.pool.get().await?;
        conn.transaction::<Option<ClaimedBatch>, anyhow::Error, _>(move |conn| {
            async move {
                // rows locked by a concurrent claimer are skipped, never double-claimed
                let ids = deposits::table
                    .filter(deposits::chain.eq(chain))
                    .filter(deposits::status.ne(DepositStatus::Swept))
                    .filter(deposits::sweep_batch_id.is_null())
                    .order((deposits::created_at.asc(), deposits::id.asc()))
                    .limit(limit)
                    .select(deposits::id)
                    .for_update()
                    .skip_locked()
                    .load::<i32>(conn)
                    .await?;
                if ids.is_empty() {
                    return Ok(None);
                }

                let batch = diesel::insert_into(sweep_batches::table)
                    .values((
                        sweep_batches::chain.eq(chain),
                        sweep_batches::status.eq(SweepBatchStatus::Pending),
                        sweep_batches::created_at.eq(Utc::now()),
                    ))
                    .returning(SweepBatch::as_returning())
                    .get_result(conn)
                    .await?;

                let mut claimed = diesel::update(
                    deposits::table
                        .filter(deposits::id.eq_any(&ids))
                        .filter(deposits::sweep_batch_id.is_null()),
                )
                .set(deposits::sweep_batch_id.eq(Some(batch.id)))
                .returning(Deposit::as_returning())
                .get_results(conn)
                .await?;
                claimed.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

                let address_ids: Vec<i32> = claimed.iter().map(|d| d.deposit_address_id).collect();
                let addresses: HashMap<i32, DepositAddress> = deposit_addresses::table
                    .filter(deposit_addresses::id.eq_any(address_ids))
                    .select(DepositAddress::as_select())
                    .load(conn)
                    .await?
                    .into_iter()
                    .map(|a| (a.id, a))
                    .collect();

                let total_usd: Decimal = claimed.iter().map(|d| d.usd_value).sum();
                let batch = diesel::update(sweep_batches::table.find(batch.id))
                    .set((
                        sweep_batches::deposit_count.eq(claimed.len() as i32),
                        sweep_batches::total_usd.eq(total_usd),
                    ))
                    .returning(SweepBatch::as_returning())
                    .get_result(conn)
                    .await?;

                let deposits = claimed
                    .into_iter()
                    .map(|d| {
                        let address = addresses
                            .get(&d.deposit_address_id)
                            .cloned()
                            .ok_or_else(|| anyhow!("Deposit {} has no address row", d.id))?;
                        Ok(ClaimedDeposit {
                            deposit_id: d.id,
                            user_id: d.user_id,
                            tx_hash: d.tx_hash,
                            asset: d.asset,
                            raw_amount: d.raw_amount,
                            decimals: d.decimals,
                            usd_value: d.usd_value,
                            address,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                debug!("Claimed {} deposits on {} into batch {}", deposits.len(), chain, batch.id);
                Ok(Some(ClaimedBatch { batch, deposits }))
            }
            .scope_boxed()
        })
        .await
    }

    async fn mark_batch_executing(&self, batch_id: SweepBatchId) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            sweep_batches::table
                .find(batch_id)
                .filter(sweep_batches::status.eq(SweepBatchStatus::Pending)),
        )
        .set((
            sweep_batches::status.eq(SweepBatchStatus::Executing),
            sweep_batches::started_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;
        if updated == 0 {
            bail!("Batch {} is not pending", batch_id);
        }
        Ok(())
    }

    async fn mark_deposit_swept(&self, deposit_id: i32, tx_hash: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            deposits::table
                .find(deposit_id)
                .filter(deposits::status.ne(DepositStatus::Swept)),
        )
        .set((
            deposits::status.eq(DepositStatus::Swept),
            deposits::sweep_tx_hash.eq(Some(tx_hash)),
            deposits::sweep_error.eq(None::<String>),
            deposits::swept_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;
        if updated == 0 {
            bail!("Deposit {} is already swept or missing", deposit_id);
        }
        Ok(())
    }

    async fn mark_deposit_failed(&self, deposit_id: i32, error: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;
        diesel::update(deposits::table.find(deposit_id))
            .set(deposits::sweep_error.eq(Some(error)))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn finish_batch(
        &self,
        batch_id: SweepBatchId,
        status: SweepBatchStatus,
        tx_hashes: &[String],
        error_summary: Option<String>,
    ) -> Result<()> {
        if !SweepBatchStatus::Executing.can_transition_to(status) {
            bail!("Batch {} cannot finish as {:?}", batch_id, status);
        }
        let mut conn = self.pool.get().await?;
        let updated = diesel::update(
            sweep_batches::table
                .find(batch_id)
                .filter(sweep_batches::status.eq(SweepBatchStatus::Executing)),
        )
        .set((
            sweep_batches::status.eq(status),
            sweep_batches::tx_hashes.eq(tx_hashes.to_vec()),
            sweep_batches::error_summary.eq(error_summary),
            sweep_batches::finished_at.eq(Some(Utc::now())),
        ))
        .execute(&mut conn)
        .await?;
        if updated == 0 {
            bail!("Batch {} is not executing", batch_id);
        }
        Ok(())
    }

    async fn reconcile_failed_deposit(&self, deposit_id: i32, tx_hash: &str) -> Result<()> {
        let tx_hash = tx_hash.to_string();
        let mut conn = self.pool.get().await?;
        conn.transaction::<(), anyhow::Error, _>(move |conn| {
            async move {
                let deposit = deposits::table
                    .find(deposit_id)
                    .select(Deposit::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| anyhow!("Deposit {} not found", deposit_id))?;
                let Some(batch_id) = deposit.sweep_batch_id else {
                    bail!("Deposit {} was never claimed by a batch", deposit_id);
                };
                if deposit.status == DepositStatus::Swept || deposit.sweep_error.is_none() {
                    bail!("Deposit {} has no failed sweep to reconcile", deposit_id);
                }
                let batch_status = sweep_batches::table
                    .find(batch_id)
                    .select(sweep_batches::status)
                    .first::<SweepBatchStatus>(conn)
                    .await?;
                if batch_status != SweepBatchStatus::Failed {
                    bail!("Batch {} is {:?}, only failed batches are reconciled", batch_id, batch_status);
                }
                diesel::update(deposits::table.find(deposit_id))
                    .set((
                        deposits::status.eq(DepositStatus::Swept),
                        deposits::sweep_tx_hash.eq(Some(tx_hash.as_str())),
                        deposits::swept_at.eq(Some(Utc::now())),
                    ))
                    .execute(conn)
                    .await?;
                warn!("Deposit {} reconciled as swept by {}", deposit_id, tx_hash);
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}
