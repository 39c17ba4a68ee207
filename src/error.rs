// Error taxonomy for the tournament and ladder core.
//
// Configuration errors are raised before anything is mutated. Conflicts carry
// the specific reason an operation was refused so callers can show it as-is.

use thiserror::Error;

use crate::model::{MatchStatus, StageKind};

/// Invalid input supplied by the configuration layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("a bracket needs between {min} and {max} participants, got {actual}")]
    ParticipantCount {
        min: usize,
        max: usize,
        actual: usize,
    },

    #[error("participant {0} is entered more than once")]
    DuplicateParticipant(i64),

    #[error("participant id {0} is reserved for BYE slots")]
    ReservedParticipant(i64),

    #[error("manual seeding needs a distinct seed for every participant")]
    ManualSeeds,

    #[error("rating difference {0} matches no configured range")]
    UncoveredRatingDifference(u32),

    #[error("rule table is invalid: {0}")]
    RuleTable(String),

    #[error("{kind} stages do not support {operation}")]
    UnsupportedFormat {
        kind: StageKind,
        operation: &'static str,
    },

    #[error("invalid group layout: {0}")]
    GroupLayout(String),

    #[error("race target must be at least 1")]
    RaceTarget,

    #[error("league {0} does not use this rating strategy")]
    StrategyMismatch(i64),
}

/// A state conflict: the operation is valid in general but not right now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Conflict {
    #[error("match cannot be {action}: a participant slot is empty")]
    EmptySlot { action: &'static str },

    #[error("match cannot be {action}: it is {status}")]
    InvalidStatus {
        action: &'static str,
        status: MatchStatus,
    },

    #[error("match cannot be {action}: it is decided by a BYE")]
    ByeMatch { action: &'static str },

    #[error("a tie ({0}-{0}) is not a valid result")]
    TieScore(u32),

    #[error("score {score} exceeds the race to {races_to}")]
    ScoreAboveRace { score: u32, races_to: u32 },

    #[error("participant {0} does not play in this match")]
    NotInMatch(i64),

    #[error("stage {0} already has started matches")]
    StageStarted(i64),

    #[error("stage {0} is completed and its results are final")]
    StageCompleted(i64),

    #[error("stage {0} has no participants to reseed")]
    NothingToSeed(i64),

    #[error("stage type cannot change once matches exist")]
    StageKindLocked,

    #[error("group results are locked once the playoff bracket exists")]
    GroupsLocked,

    #[error("{0} was already recorded")]
    AlreadyRecorded(String),

    #[error("a participant cannot play against themselves")]
    SameParticipant,
}

/// Top-level error type for every core operation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Conflict(#[from] Conflict),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        CoreError::NotFound { entity, id }
    }

    /// The conflict reason, when this error is a state conflict.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            CoreError::Conflict(c) => Some(c),
            _ => None,
        }
    }

    /// True for errors caused by caller input rather than infrastructure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CoreError::Config(_) | CoreError::Conflict(_) | CoreError::NotFound { .. }
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_messages_explain_reason() {
        let err: CoreError = Conflict::EmptySlot { action: "started" }.into();
        assert_eq!(
            err.to_string(),
            "match cannot be started: a participant slot is empty"
        );

        let err: CoreError = Conflict::InvalidStatus {
            action: "started",
            status: MatchStatus::Completed,
        }
        .into();
        assert_eq!(err.to_string(), "match cannot be started: it is completed");
    }

    #[test]
    fn test_config_error_display() {
        let err: CoreError = ConfigError::ParticipantCount {
            min: 2,
            max: 256,
            actual: 1,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid configuration: a bracket needs between 2 and 256 participants, got 1"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn test_not_found_is_client_error() {
        let err = CoreError::not_found("stage", 7);
        assert_eq!(err.to_string(), "stage 7 not found");
        assert!(err.is_client_error());
        assert!(err.conflict().is_none());
    }
}
