use crate::storage::QueueStore;
use crate::types::deposit::UserId;
use crate::types::errors::{BoostError, PayoutError};
use crate::types::participant::{
    Participant, ParticipantId, PayoutReceipt, QueueEntry, QueuePosition, TrenchId,
};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Belief desc, boost desc, join time asc, then participant id asc so no two entries ever tie.
pub fn queue_order(a: &QueueEntry, b: &QueueEntry) -> Ordering {
    b.belief_score
        .cmp(&a.belief_score)
        .then_with(|| b.participant.boost_points.cmp(&a.participant.boost_points))
        .then_with(|| a.participant.joined_at.cmp(&b.participant.joined_at))
        .then_with(|| a.participant.id.cmp(&b.participant.id))
}

pub fn rank_entries(mut entries: Vec<QueueEntry>) -> Vec<QueueEntry> {
    entries.sort_by(queue_order);
    entries
}

pub fn to_positions(ranked: &[QueueEntry]) -> Vec<QueuePosition> {
    ranked
        .iter()
        .enumerate()
        .map(|(i, entry)| QueuePosition {
            position: i + 1,
            participant_id: entry.participant.id,
            user_id: entry.participant.user_id,
            belief_score: entry.belief_score,
            boost_points: entry.participant.boost_points,
            joined_at: entry.participant.joined_at,
            remaining_cap: entry.participant.remaining_cap(),
        })
        .collect()
}

/// `min(increment, cap - received)`, never negative.
pub fn calculate_payment_amount(participant: &Participant, increment: Decimal) -> Decimal {
    increment.min(participant.remaining_cap()).max(Decimal::ZERO)
}

/// One payout slot per position ahead of this one.
pub fn expected_payout_at(now: DateTime<Utc>, position: usize, payout_slot_s: i64) -> DateTime<Utc> {
    let slots = position.saturating_sub(1) as i64;
    now + Duration::seconds(slots.saturating_mul(payout_slot_s))
}

pub struct QueueEngine {
    store: Arc<dyn QueueStore>,
    payout_slot_s: i64,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn QueueStore>, payout_slot_s: i64) -> Self {
        Self { store, payout_slot_s }
    }

    async fn ranked(&self, trench_id: TrenchId) -> Result<Vec<QueueEntry>> {
        Ok(rank_entries(self.store.active_entries(trench_id).await?))
    }

    pub async fn get_queue(&self, trench_id: TrenchId) -> Result<Vec<QueuePosition>> {
        Ok(to_positions(&self.ranked(trench_id).await?))
    }

    pub async fn get_user_position(&self, user_id: UserId, trench_id: TrenchId) -> Result<Option<QueuePosition>> {
        Ok(self
            .get_queue(trench_id)
            .await?
            .into_iter()
            .find(|p| p.user_id == user_id))
    }

    /// First ranked participant that can still receive anything.
    pub async fn get_next_payout_target(&self, trench_id: TrenchId) -> Result<Option<QueuePosition>> {
        Ok(self
            .get_queue(trench_id)
            .await?
            .into_iter()
            .find(|p| p.remaining_cap > Decimal::ZERO))
    }

    /// Moves boost points onto a position in one storage transaction, then refreshes the
    /// expected payout times of the trench. A failed refresh does not undo the boost.
    #[instrument(skip(self))]
    pub async fn apply_boost(
        &self,
        user_id: UserId,
        participant_id: ParticipantId,
        points: i64,
    ) -> Result<Participant, BoostError> {
        if points <= 0 {
            return Err(BoostError::InvalidPoints(points));
        }
        let participant = self
            .store
            .transfer_boost_points(user_id, participant_id, points)
            .await?;
        info!(
            "User {} boosted participant {} by {} to {}",
            user_id, participant_id, points, participant.boost_points
        );
        if let Err(e) = self.refresh_expected_payouts(participant.trench_id).await {
            warn!("Failed to refresh expected payouts of trench {}: {}", participant.trench_id, e);
        }
        Ok(participant)
    }

    pub async fn refresh_expected_payouts(&self, trench_id: TrenchId) -> Result<()> {
        let now = Utc::now();
        for position in self.get_queue(trench_id).await? {
            let at = expected_payout_at(now, position.position, self.payout_slot_s);
            self.store.set_expected_payout(position.participant_id, at).await?;
        }
        Ok(())
    }

    /// Returns the number of participants whose boost actually shrank.
    pub async fn apply_decay(&self, decay_percent: u32) -> Result<usize, PayoutError> {
        if decay_percent > 100 {
            return Err(PayoutError::InvalidDecayPercent(decay_percent));
        }
        if decay_percent == 0 {
            return Ok(0);
        }
        let updated = self.store.decay_boost_points(decay_percent).await?;
        info!("Decayed boost points of {} participants by {}%", updated, decay_percent);
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn record_payout_received(
        &self,
        participant_id: ParticipantId,
        amount: Decimal,
    ) -> Result<PayoutReceipt, PayoutError> {
        if amount <= Decimal::ZERO {
            return Err(PayoutError::InvalidAmount(amount));
        }
        let participant = self.store.record_payout(participant_id, amount).await?;
        let completed = !participant.is_active();
        if completed {
            info!("Participant {} reached its cap of {}", participant_id, participant.max_payout);
        }
        Ok(PayoutReceipt {
            participant_id,
            user_id: participant.user_id,
            amount,
            received_amount: participant.received_amount,
            completed,
        })
    }

    /// Pays the head of the queue at most `increment`. `None` when nobody can receive.
    pub async fn settle_next_payout(
        &self,
        trench_id: TrenchId,
        increment: Decimal,
    ) -> Result<Option<PayoutReceipt>, PayoutError> {
        let ranked = self.ranked(trench_id).await?;
        let Some(target) = ranked
            .iter()
            .map(|entry| &entry.participant)
            .find(|p| p.remaining_cap() > Decimal::ZERO)
        else {
            return Ok(None);
        };
        let amount = calculate_payment_amount(target, increment);
        if amount <= Decimal::ZERO {
            return Ok(None);
        }
        self.record_payout_received(target.id, amount).await.map(Some)
    }

    pub async fn exit_position(&self, participant_id: ParticipantId) -> Result<Participant, PayoutError> {
        let participant = self.store.exit_participant(participant_id).await?;
        info!("Participant {} exited trench {}", participant_id, participant.trench_id);
        Ok(participant)
    }
}
