// Persistence contract.
//
// Every mutating operation hands the store one `Changeset`; the store applies
// it all-or-nothing. `MemoryStore` stages a copy and swaps it in, the SQLite
// `Database` wraps the changeset in one transaction.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::model::{
    BracketId, GroupId, LadderEntry, League, LeagueId, LeagueMatch, Match, MatchStatus,
    MultiplayerGame, RatingEvent, Stage, StageId, StageStructure, Tournament, TournamentId,
};

/// Filter for `Store::matches`. Only the stage is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchQuery {
    pub stage_id: StageId,
    pub group: Option<GroupId>,
    pub bracket: Option<BracketId>,
    pub round: Option<u32>,
    pub status: Option<MatchStatus>,
}

impl MatchQuery {
    pub fn stage(stage_id: StageId) -> Self {
        MatchQuery {
            stage_id,
            ..Default::default()
        }
    }

    pub fn group(mut self, group: GroupId) -> Self {
        self.group = Some(group);
        self
    }

    pub fn bracket(mut self, bracket: BracketId) -> Self {
        self.bracket = Some(bracket);
        self
    }

    pub fn round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn status(mut self, status: MatchStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn accepts(&self, m: &Match) -> bool {
        self.group.map_or(true, |g| m.group() == Some(g))
            && self.bracket.map_or(true, |b| m.bracket() == Some(b))
            && self.round.map_or(true, |r| m.round == Some(r))
            && self.status.map_or(true, |s| m.status == s)
    }
}

/// All writes of one logical operation.
///
/// Applied in field order: records are upserted, `removed_stages` drop a
/// stage with its structure, `structures` replace a stage's structure as a
/// whole, `matches` upsert single matches into an existing structure, league
/// results are appended (a repeated key is a conflict), `cleared_logs` empty a
/// league's rating log before `rating_events` are appended.
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    pub tournaments: Vec<Tournament>,
    pub stages: Vec<Stage>,
    pub removed_stages: Vec<StageId>,
    pub structures: Vec<StageStructure>,
    pub matches: Vec<(StageId, Match)>,
    pub leagues: Vec<League>,
    pub ladder: Vec<LadderEntry>,
    pub league_matches: Vec<LeagueMatch>,
    pub games: Vec<MultiplayerGame>,
    pub cleared_logs: Vec<LeagueId>,
    pub rating_events: Vec<RatingEvent>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.tournaments.is_empty()
            && self.stages.is_empty()
            && self.removed_stages.is_empty()
            && self.structures.is_empty()
            && self.matches.is_empty()
            && self.leagues.is_empty()
            && self.ladder.is_empty()
            && self.league_matches.is_empty()
            && self.games.is_empty()
            && self.cleared_logs.is_empty()
            && self.rating_events.is_empty()
    }

    /// Append another operation's writes so both commit together.
    pub fn merge(&mut self, other: Changeset) {
        self.tournaments.extend(other.tournaments);
        self.stages.extend(other.stages);
        self.removed_stages.extend(other.removed_stages);
        self.structures.extend(other.structures);
        self.matches.extend(other.matches);
        self.leagues.extend(other.leagues);
        self.ladder.extend(other.ladder);
        self.league_matches.extend(other.league_matches);
        self.games.extend(other.games);
        self.cleared_logs.extend(other.cleared_logs);
        self.rating_events.extend(other.rating_events);
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn tournament(&self, id: TournamentId) -> CoreResult<Option<Tournament>>;

    async fn stage(&self, id: StageId) -> CoreResult<Option<Stage>>;

    /// Stages of a tournament in `order`.
    async fn stages(&self, tournament_id: TournamentId) -> CoreResult<Vec<Stage>>;

    /// The stage's structure; empty when nothing was generated yet.
    async fn structure(&self, stage_id: StageId) -> CoreResult<StageStructure>;

    async fn matches(&self, query: &MatchQuery) -> CoreResult<Vec<Match>> {
        let structure = self.structure(query.stage_id).await?;
        Ok(structure
            .matches
            .into_iter()
            .filter(|m| query.accepts(m))
            .collect())
    }

    async fn league(&self, id: LeagueId) -> CoreResult<Option<League>>;

    /// Ladder entries by position.
    async fn ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>>;

    async fn league_matches(&self, league_id: LeagueId) -> CoreResult<Vec<LeagueMatch>>;

    async fn games(&self, league_id: LeagueId) -> CoreResult<Vec<MultiplayerGame>>;

    /// Rating log in append order.
    async fn rating_log(&self, league_id: LeagueId) -> CoreResult<Vec<RatingEvent>>;

    async fn commit(&self, changes: Changeset) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchId, Placement};

    #[test]
    fn test_match_query_filters() {
        let mut m = Match::new(
            MatchId(0),
            None,
            1,
            Placement::Group {
                group: 1,
                round_index: None,
            },
        );
        m.status = MatchStatus::Ready;
        assert!(MatchQuery::stage(1).accepts(&m));
        assert!(MatchQuery::stage(1).group(1).accepts(&m));
        assert!(!MatchQuery::stage(1).group(2).accepts(&m));
        assert!(!MatchQuery::stage(1).bracket(0).accepts(&m));
        assert!(!MatchQuery::stage(1).round(1).accepts(&m));
        assert!(MatchQuery::stage(1).status(MatchStatus::Ready).accepts(&m));
    }

    #[test]
    fn test_empty_changeset() {
        assert!(Changeset::default().is_empty());
        let changes = Changeset {
            cleared_logs: vec![1],
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }

    #[test]
    fn test_merge_keeps_both_sides() {
        let mut changes = Changeset {
            cleared_logs: vec![1],
            ..Default::default()
        };
        changes.merge(Changeset {
            cleared_logs: vec![2],
            removed_stages: vec![9],
            ..Default::default()
        });
        assert_eq!(changes.cleared_logs, vec![1, 2]);
        assert_eq!(changes.removed_stages, vec![9]);
    }
}
