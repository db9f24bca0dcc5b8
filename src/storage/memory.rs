//! In-process stand-ins for the Postgres and Redis stores, used by the engine tests.

use crate::storage::persistent::shifted_baseline;
use crate::storage::{Claim, CooldownStore, DepositStore, QueueStore, SweepStore};
use crate::types::chain::{Asset, Chain};
use crate::types::deposit::{
    BaselineMove, CreditWrite, Deposit, DepositAddress, DepositStatus, NewDeposit, NewScanLog, UserId,
};
use crate::types::errors::{BoostError, PayoutError};
use crate::types::participant::{
    Participant, ParticipantId, ParticipantStatus, QueueEntry, TrenchId,
};
use crate::types::sweep::{ClaimedBatch, ClaimedDeposit, SweepBatch, SweepBatchId, SweepBatchStatus};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUser {
    pub handle: String,
    pub balance_usd: Decimal,
    pub boost_points: i64,
    pub belief_score: i64,
}

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<UserId, MemoryUser>,
    addresses: Vec<DepositAddress>,
    deposits: Vec<Deposit>,
    participants: BTreeMap<ParticipantId, Participant>,
    batches: BTreeMap<SweepBatchId, SweepBatch>,
    scan_logs: Vec<NewScanLog>,
    next_id: i32,
}

impl MemoryState {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn address_mut(&mut self, id: i32) -> Result<&mut DepositAddress> {
        self.addresses
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("No address {}", id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    /// Fails boost transfers after the user debit, before commit.
    pub fail_boost_commit: AtomicBool,
    pub fail_credit: AtomicBool,
    /// Fails every native baseline write, rolling back whatever shares its transaction.
    pub fail_baseline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, handle: &str, boost_points: i64, belief_score: i64) -> UserId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.users.insert(
            id,
            MemoryUser {
                handle: handle.to_string(),
                balance_usd: Decimal::ZERO,
                boost_points,
                belief_score,
            },
        );
        id
    }

    pub fn add_address(&self, user_id: UserId, chain: Chain, address: &str, index: i32) -> DepositAddress {
        let mut state = self.state.lock().unwrap();
        let address = DepositAddress {
            id: state.next_id(),
            user_id,
            chain,
            address: address.to_string(),
            derivation_index: index,
            last_balance: None,
            created_at: Utc::now(),
        };
        state.addresses.push(address.clone());
        address
    }

    pub fn add_participant(
        &self,
        user_id: UserId,
        trench_id: TrenchId,
        max_payout: Decimal,
        joined_at: DateTime<Utc>,
    ) -> ParticipantId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.participants.insert(
            id,
            Participant {
                id,
                user_id,
                trench_id,
                entry_amount: max_payout / Decimal::TWO,
                max_payout,
                received_amount: Decimal::ZERO,
                boost_points: 0,
                status: ParticipantStatus::Active,
                joined_at,
                expected_payout_at: None,
                completed_at: None,
            },
        );
        id
    }

    pub fn set_participant_boost(&self, participant_id: ParticipantId, boost_points: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.participants.get_mut(&participant_id) {
            p.boost_points = boost_points;
        }
    }

    pub fn user(&self, user_id: UserId) -> Option<MemoryUser> {
        self.state.lock().unwrap().users.get(&user_id).cloned()
    }

    pub fn address(&self, id: i32) -> Option<DepositAddress> {
        let state = self.state.lock().unwrap();
        state.addresses.iter().find(|a| a.id == id).cloned()
    }

    pub fn deposits(&self) -> Vec<Deposit> {
        self.state.lock().unwrap().deposits.clone()
    }

    pub fn batches(&self) -> Vec<SweepBatch> {
        self.state.lock().unwrap().batches.values().cloned().collect()
    }

    pub fn scan_logs(&self) -> Vec<NewScanLog> {
        self.state.lock().unwrap().scan_logs.clone()
    }

    pub fn get_participant(&self, participant_id: ParticipantId) -> Option<Participant> {
        self.state.lock().unwrap().participants.get(&participant_id).cloned()
    }

    /// Inserts an already credited deposit straight into the ledger.
    pub fn seed_deposit(
        &self,
        address: &DepositAddress,
        tx_hash: &str,
        asset: Asset,
        raw_amount: u64,
        decimals: u8,
        usd_value: Decimal,
    ) -> i32 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.deposits.push(Deposit {
            id,
            tx_hash: tx_hash.to_string(),
            user_id: address.user_id,
            deposit_address_id: address.id,
            chain: address.chain,
            asset,
            raw_amount: Decimal::from(raw_amount),
            decimals: decimals as i16,
            usd_value,
            status: DepositStatus::Confirmed,
            block_height: 1,
            sweep_batch_id: None,
            sweep_tx_hash: None,
            sweep_error: None,
            swept_at: None,
            created_at: Utc::now() + chrono::Duration::milliseconds(id as i64),
        });
        id
    }
}

#[async_trait]
impl DepositStore for MemoryStore {
    async fn deposit_addresses(&self, user_id: UserId) -> Result<Vec<DepositAddress>> {
        let state = self.state.lock().unwrap();
        Ok(state.addresses.iter().filter(|a| a.user_id == user_id).cloned().collect())
    }

    async fn deposit_address(&self, user_id: UserId, chain: Chain) -> Result<Option<DepositAddress>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.user_id == user_id && a.chain == chain)
            .cloned())
    }

    async fn users_with_deposit_addresses(&self) -> Result<Vec<UserId>> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<UserId> = state.addresses.iter().map(|a| a.user_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn shift_balance_baseline(&self, deposit_address_id: i32, delta: i128) -> Result<()> {
        if self.fail_baseline.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }
        let mut state = self.state.lock().unwrap();
        let address = state.address_mut(deposit_address_id)?;
        address.last_balance = Some(shifted_baseline(address.last_balance.as_deref(), delta)?);
        Ok(())
    }

    async fn deposit_exists(&self, tx_hash: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.deposits.iter().any(|d| d.tx_hash == tx_hash))
    }

    async fn credit_deposit(&self, deposit: NewDeposit, baseline: Option<BaselineMove>) -> Result<CreditWrite> {
        if self.fail_credit.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }
        let mut state = self.state.lock().unwrap();
        if state.deposits.iter().any(|d| d.tx_hash == deposit.tx_hash) {
            return Ok(CreditWrite::AlreadyProcessed);
        }
        // checked before any write, so a refusal leaves nothing behind
        if let Some(baseline) = &baseline {
            if self.fail_baseline.load(Ordering::SeqCst) {
                bail!("connection reset by peer");
            }
            let address = state.address_mut(deposit.deposit_address_id)?;
            if address.last_balance != baseline.previous {
                return Ok(CreditWrite::BaselineMoved);
            }
        }
        if !state.users.contains_key(&deposit.user_id) {
            bail!("No user {}", deposit.user_id);
        }
        if let Some(baseline) = baseline {
            state.address_mut(deposit.deposit_address_id)?.last_balance = Some(baseline.current);
        }
        let id = state.next_id();
        let user = state
            .users
            .get_mut(&deposit.user_id)
            .ok_or_else(|| anyhow!("No user {}", deposit.user_id))?;
        user.balance_usd += deposit.usd_value;
        let user_handle = user.handle.clone();
        let row = Deposit {
            id,
            tx_hash: deposit.tx_hash,
            user_id: deposit.user_id,
            deposit_address_id: deposit.deposit_address_id,
            chain: deposit.chain,
            asset: deposit.asset,
            raw_amount: deposit.raw_amount,
            decimals: deposit.decimals,
            usd_value: deposit.usd_value,
            status: deposit.status,
            block_height: deposit.block_height,
            sweep_batch_id: None,
            sweep_tx_hash: None,
            sweep_error: None,
            swept_at: None,
            created_at: deposit.created_at,
        };
        state.deposits.push(row.clone());
        Ok(CreditWrite::Credited {
            deposit: row,
            user_handle,
        })
    }

    async fn log_scan_attempt(&self, entry: NewScanLog) -> Result<()> {
        self.state.lock().unwrap().scan_logs.push(entry);
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn active_entries(&self, trench_id: TrenchId) -> Result<Vec<QueueEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .participants
            .values()
            .filter(|p| p.trench_id == trench_id && p.is_active())
            .map(|p| QueueEntry {
                participant: p.clone(),
                belief_score: state.users.get(&p.user_id).map(|u| u.belief_score).unwrap_or(0),
            })
            .collect())
    }

    async fn participant(&self, participant_id: ParticipantId) -> Result<Option<Participant>> {
        Ok(self.get_participant(participant_id))
    }

    async fn transfer_boost_points(
        &self,
        user_id: UserId,
        participant_id: ParticipantId,
        points: i64,
    ) -> Result<Participant, BoostError> {
        let mut state = self.state.lock().unwrap();
        // work on copies, publish only on success
        let mut user = state
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| BoostError::Store(anyhow!("No user {}", user_id)))?;
        if user.boost_points < points {
            return Err(BoostError::InsufficientPoints {
                available: user.boost_points,
                requested: points,
            });
        }
        let mut participant = state
            .participants
            .get(&participant_id)
            .filter(|p| p.user_id == user_id)
            .cloned()
            .ok_or(BoostError::PositionNotFound)?;
        if !participant.is_active() {
            return Err(BoostError::PositionInactive);
        }
        user.boost_points -= points;
        if self.fail_boost_commit.load(Ordering::SeqCst) {
            return Err(BoostError::Store(anyhow!("could not serialize access")));
        }
        participant.boost_points += points;
        state.users.insert(user_id, user);
        state.participants.insert(participant_id, participant.clone());
        Ok(participant)
    }

    async fn set_expected_payout(&self, participant_id: ParticipantId, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(p) = state.participants.get_mut(&participant_id) {
            p.expected_payout_at = Some(at);
        }
        Ok(())
    }

    async fn decay_boost_points(&self, decay_percent: u32) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for p in state.participants.values_mut().filter(|p| p.is_active()) {
            let decay = p.boost_points * i64::from(decay_percent) / 100;
            if decay > 0 {
                p.boost_points -= decay;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn record_payout(
        &self,
        participant_id: ParticipantId,
        amount: Decimal,
    ) -> Result<Participant, PayoutError> {
        let mut state = self.state.lock().unwrap();
        let p = state
            .participants
            .get_mut(&participant_id)
            .ok_or(PayoutError::PositionNotFound)?;
        if !p.is_active() {
            return Err(PayoutError::PositionInactive);
        }
        let remaining = p.remaining_cap();
        if amount > remaining {
            return Err(PayoutError::ExceedsCap { amount, remaining });
        }
        p.received_amount += amount;
        if p.received_amount >= p.max_payout {
            p.status = ParticipantStatus::Completed;
            p.completed_at = Some(Utc::now());
        }
        Ok(p.clone())
    }

    async fn exit_participant(&self, participant_id: ParticipantId) -> Result<Participant, PayoutError> {
        let mut state = self.state.lock().unwrap();
        let p = state
            .participants
            .get_mut(&participant_id)
            .ok_or(PayoutError::PositionNotFound)?;
        if !p.is_active() {
            return Err(PayoutError::PositionInactive);
        }
        p.status = ParticipantStatus::Exited;
        p.completed_at = Some(Utc::now());
        Ok(p.clone())
    }
}

#[async_trait]
impl SweepStore for MemoryStore {
    async fn claim_batch(&self, chain: Chain, limit: i64) -> Result<Option<ClaimedBatch>> {
        let mut state = self.state.lock().unwrap();
        let mut candidates: Vec<usize> = state
            .deposits
            .iter()
            .enumerate()
            .filter(|(_, d)| d.chain == chain && d.status.is_sweepable() && d.sweep_batch_id.is_none())
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| (state.deposits[i].created_at, state.deposits[i].id));
        candidates.truncate(limit.max(0) as usize);
        if candidates.is_empty() {
            return Ok(None);
        }
        let batch_id = state.next_id();
        let mut claimed = Vec::with_capacity(candidates.len());
        for i in candidates {
            state.deposits[i].sweep_batch_id = Some(batch_id);
            let d = state.deposits[i].clone();
            let address = state
                .addresses
                .iter()
                .find(|a| a.id == d.deposit_address_id)
                .cloned()
                .ok_or_else(|| anyhow!("Deposit {} has no address row", d.id))?;
            claimed.push(ClaimedDeposit {
                deposit_id: d.id,
                user_id: d.user_id,
                tx_hash: d.tx_hash,
                asset: d.asset,
                raw_amount: d.raw_amount,
                decimals: d.decimals,
                usd_value: d.usd_value,
                address,
            });
        }
        let batch = SweepBatch {
            id: batch_id,
            chain,
            status: SweepBatchStatus::Pending,
            deposit_count: claimed.len() as i32,
            total_usd: claimed.iter().map(|d| d.usd_value).sum(),
            tx_hashes: vec![],
            error_summary: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        state.batches.insert(batch_id, batch.clone());
        Ok(Some(ClaimedBatch {
            batch,
            deposits: claimed,
        }))
    }

    async fn mark_batch_executing(&self, batch_id: SweepBatchId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| anyhow!("No batch {}", batch_id))?;
        if !batch.status.can_transition_to(SweepBatchStatus::Executing) {
            bail!("Batch {} is not pending", batch_id);
        }
        batch.status = SweepBatchStatus::Executing;
        batch.started_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_deposit_swept(&self, deposit_id: i32, tx_hash: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let d = state
            .deposits
            .iter_mut()
            .find(|d| d.id == deposit_id && d.status != DepositStatus::Swept)
            .ok_or_else(|| anyhow!("Deposit {} is already swept or missing", deposit_id))?;
        d.status = DepositStatus::Swept;
        d.sweep_tx_hash = Some(tx_hash.to_string());
        d.sweep_error = None;
        d.swept_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_deposit_failed(&self, deposit_id: i32, error: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(d) = state.deposits.iter_mut().find(|d| d.id == deposit_id) {
            d.sweep_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn finish_batch(
        &self,
        batch_id: SweepBatchId,
        status: SweepBatchStatus,
        tx_hashes: &[String],
        error_summary: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let batch = state
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| anyhow!("No batch {}", batch_id))?;
        if !batch.status.can_transition_to(status) {
            bail!("Batch {} cannot move from {:?} to {:?}", batch_id, batch.status, status);
        }
        batch.status = status;
        batch.tx_hashes = tx_hashes.to_vec();
        batch.error_summary = error_summary;
        batch.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn reconcile_failed_deposit(&self, deposit_id: i32, tx_hash: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let batch_status = {
            let d = state
                .deposits
                .iter()
                .find(|d| d.id == deposit_id)
                .ok_or_else(|| anyhow!("Deposit {} not found", deposit_id))?;
            let batch_id = d
                .sweep_batch_id
                .ok_or_else(|| anyhow!("Deposit {} was never claimed by a batch", deposit_id))?;
            if d.status == DepositStatus::Swept || d.sweep_error.is_none() {
                bail!("Deposit {} has no failed sweep to reconcile", deposit_id);
            }
            state.batches.get(&batch_id).map(|b| b.status)
        };
        if batch_status != Some(SweepBatchStatus::Failed) {
            bail!("Only deposits of failed batches are reconciled");
        }
        if let Some(d) = state.deposits.iter_mut().find(|d| d.id == deposit_id) {
            d.status = DepositStatus::Swept;
            d.sweep_tx_hash = Some(tx_hash.to_string());
            d.swept_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Redis stand-in with a switch to simulate an outage.
#[derive(Default)]
pub struct MemoryCooldown {
    keys: Mutex<HashMap<String, (Claim, i64)>>,
    pub unavailable: AtomicBool,
}

impl MemoryCooldown {
    /// Drops every key as if its TTL ran out.
    pub fn expire_all(&self) {
        self.keys.lock().unwrap().clear();
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldown {
    async fn try_acquire(&self, key: &str, claim: &Claim, ttl_s: u64) -> Result<Option<i64>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Connection refused (os error 111)");
        }
        let mut keys = self.keys.lock().unwrap();
        match keys.get(key) {
            Some((held, expires_at)) if *expires_at > claim.since => Ok(Some(held.since)),
            _ => {
                keys.insert(key.to_string(), (claim.clone(), claim.since + ttl_s as i64));
                Ok(None)
            }
        }
    }

    async fn release(&self, key: &str, claim: &Claim) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Connection refused (os error 111)");
        }
        let mut keys = self.keys.lock().unwrap();
        match keys.get(key) {
            Some((held, _)) if held == claim => {
                keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
