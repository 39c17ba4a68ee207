// Outbound notifications for the UI and notification collaborators.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{LeagueId, ParticipantId, StageId, TournamentId};

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events published after a successful commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Qualifiers of a finished group phase were seeded into a playoff.
    StageAdvanced {
        tournament_id: TournamentId,
        stage_id: StageId,
        qualifiers: Vec<ParticipantId>,
    },
    TournamentCompleted {
        tournament_id: TournamentId,
        champion: Option<ParticipantId>,
    },
    LadderUpdated {
        league_id: LeagueId,
    },
}

/// Fan-out of core events over a broadcast channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }

    /// Send to every live subscriber. Having none is not an error.
    pub fn publish(&self, event: CoreEvent) {
        tracing::debug!(?event, "publishing event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
