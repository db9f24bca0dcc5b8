use crate::schema::*;
use crate::types::deposit::UserId;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_derive_enum::DbEnum;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};

pub type TrenchId = i32;
pub type ParticipantId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DbEnum)]
#[serde(rename_all = "snake_case")]
#[ExistingTypePath = "crate::schema::sql_types::ParticipantStatus"]
pub enum ParticipantStatus {
    Active,
    Completed,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = participants)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Participant {
    pub id: ParticipantId,
    pub user_id: UserId,
    pub trench_id: TrenchId,
    pub entry_amount: Decimal,
    pub max_payout: Decimal,
    pub received_amount: Decimal,
    pub boost_points: i64,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub expected_payout_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn remaining_cap(&self) -> Decimal {
        (self.max_payout - self.received_amount).max(Decimal::ZERO)
    }

    pub fn is_active(&self) -> bool {
        self.status == ParticipantStatus::Active
    }
}

/// An active participant joined with the owner's belief score, the input of queue ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub participant: Participant,
    pub belief_score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuePosition {
    /// 1-indexed
    pub position: usize,
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub belief_score: i64,
    pub boost_points: i64,
    pub joined_at: DateTime<Utc>,
    pub remaining_cap: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayoutReceipt {
    pub participant_id: ParticipantId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub received_amount: Decimal,
    pub completed: bool,
}
