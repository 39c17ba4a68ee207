// League rating: tiered pairwise deltas, killer-pool points and ladder ordering.

pub mod points;
pub mod positions;
pub mod tiered;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;
use crate::model::{ParticipantId, RatingEvent};

pub use tiered::{RatingChange, Role, RuleTable, RuleTier};

pub const DEFAULT_BASE_RATING: i32 = 1000;

/// How a league turns results into rating changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RatingStrategy {
    /// Pairwise matches rated through winner/loser rule tables.
    Tiered { rules: RuleTable },
    /// Multiplayer games adding pre-computed points.
    KillerPool,
}

impl RatingStrategy {
    pub fn rules(&self) -> Option<&RuleTable> {
        match self {
            RatingStrategy::Tiered { rules } => Some(rules),
            RatingStrategy::KillerPool => None,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self {
            RatingStrategy::Tiered { rules } => rules.validate(),
            RatingStrategy::KillerPool => Ok(()),
        }
    }
}

/// Current rating of everyone in the log: base plus their summed deltas.
pub fn current_ratings(base_rating: i32, log: &[RatingEvent]) -> HashMap<ParticipantId, i32> {
    let mut ratings = HashMap::new();
    for event in log {
        *ratings.entry(event.participant).or_insert(base_rating) += event.delta;
    }
    ratings
}
