// Core data model: participants, stages, matches, groups, brackets and league records.
//
// A stage's matches live in an arena (`StageStructure::matches`) indexed by
// `MatchId`. Progression links are `MatchId`s resolved once at generation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::rating::RatingStrategy;

pub type TournamentId = i64;
pub type StageId = i64;
pub type LeagueId = i64;
pub type GroupId = u32;
pub type BracketId = u32;

// ── Identities ───────────────────────────────────────────────────────

/// A player or team. Negative ids are reserved for the BYE placeholder.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl ParticipantId {
    pub const BYE: ParticipantId = ParticipantId(-1);

    pub fn is_bye(self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_bye() {
            write!(f, "BYE")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Index of a match inside its stage's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub u32);

impl MatchId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A seeded entrant of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub seed: u32,
    pub rating_snapshot: Option<i32>,
}

// ── Tournaments and stages ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    Pending,
    Running,
    Completed,
}

impl TournamentStatus {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn to_str_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    /// Completed tournaments feed their results into this league.
    pub league_id: Option<LeagueId>,
    pub status: TournamentStatus,
}

impl Tournament {
    pub fn new(id: TournamentId, name: &str) -> Self {
        Tournament {
            id,
            name: name.to_string(),
            league_id: None,
            status: TournamentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    SingleElimination,
    DoubleElimination,
    RoundRobin,
    GroupThenPlayoff,
}

impl StageKind {
    /// Parse a kind string (from DB) into a StageKind.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "single_elimination" => Some(Self::SingleElimination),
            "double_elimination" => Some(Self::DoubleElimination),
            "round_robin" => Some(Self::RoundRobin),
            "group_then_playoff" => Some(Self::GroupThenPlayoff),
            _ => None,
        }
    }

    pub fn to_str_name(self) -> &'static str {
        match self {
            Self::SingleElimination => "single_elimination",
            Self::DoubleElimination => "double_elimination",
            Self::RoundRobin => "round_robin",
            Self::GroupThenPlayoff => "group_then_playoff",
        }
    }

    /// The elimination flavour generated directly by this kind, if any.
    pub fn elimination(self) -> Option<EliminationKind> {
        match self {
            Self::SingleElimination => Some(EliminationKind::Single),
            Self::DoubleElimination => Some(EliminationKind::Double),
            Self::RoundRobin | Self::GroupThenPlayoff => None,
        }
    }

    pub fn uses_groups(self) -> bool {
        matches!(self, Self::RoundRobin | Self::GroupThenPlayoff)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationKind {
    Single,
    Double,
}

/// Inclusive bounds on the number of participants per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSize {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    /// Frames needed to win a match.
    pub races_to: u32,
    pub third_place: bool,
    pub advance_per_group: u32,
    pub group_size: GroupSize,
    /// Parallel tables; when set, group matches are sequenced into rounds.
    pub tables: Option<u32>,
    /// Bracket generated after the group phase of a group-then-playoff stage.
    pub playoff: EliminationKind,
}

impl Default for StageSettings {
    fn default() -> Self {
        StageSettings {
            races_to: 3,
            third_place: false,
            advance_per_group: 2,
            group_size: GroupSize { min: 2, max: 32 },
            tables: None,
            playoff: EliminationKind::Single,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Created,
    Running,
    Completed,
}

impl StageStatus {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    pub fn to_str_name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub tournament_id: TournamentId,
    /// Position of the stage within its tournament, starting at 1.
    pub order: u32,
    pub kind: StageKind,
    pub settings: StageSettings,
    pub status: StageStatus,
}

impl Stage {
    pub fn new(id: StageId, tournament_id: TournamentId, order: u32, kind: StageKind) -> Self {
        Stage {
            id,
            tournament_id,
            order,
            kind,
            settings: StageSettings::default(),
            status: StageStatus::Created,
        }
    }
}

// ── Matches ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Ready,
    InProgress,
    Verification,
    Completed,
    Cancelled,
    Walkover,
}

impl MatchStatus {
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "ready" => Some(Self::Ready),
            "in_progress" => Some(Self::InProgress),
            "verification" => Some(Self::Verification),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "walkover" => Some(Self::Walkover),
            _ => None,
        }
    }

    pub fn to_str_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Verification => "verification",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Walkover => "walkover",
        }
    }

    /// A winner exists.
    pub fn is_decided(self) -> bool {
        matches!(self, Self::Completed | Self::Walkover)
    }

    /// Nothing more will happen to this match.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Walkover | Self::Cancelled)
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.to_str_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub player1: u32,
    pub player2: u32,
}

impl Score {
    pub fn new(player1: u32, player2: u32) -> Self {
        Score { player1, player2 }
    }

    pub fn is_tie(&self) -> bool {
        self.player1 == self.player2
    }

    pub fn high(&self) -> u32 {
        self.player1.max(self.player2)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmations {
    pub player1: bool,
    pub player2: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub at: Option<DateTime<Utc>>,
    pub table: Option<String>,
}

/// Which part of an elimination bracket a match belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "side", rename_all = "snake_case")]
pub enum BracketSide {
    Upper,
    Lower,
    GrandFinal,
    /// Played only when the lower-bracket finalist wins the grand final.
    Reset { active: bool },
    Consolation,
}

/// Typed per-format match placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Placement {
    Bracket {
        bracket: BracketId,
        side: BracketSide,
        next_winner: Option<MatchId>,
        next_loser: Option<MatchId>,
    },
    Group {
        group: GroupId,
        round_index: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    /// Bracket round; `None` for group matches.
    pub round: Option<u32>,
    /// 1-based position within its round (or group).
    pub number: u32,
    pub player1: Option<ParticipantId>,
    pub player2: Option<ParticipantId>,
    pub status: MatchStatus,
    pub score: Score,
    pub winner: Option<ParticipantId>,
    pub confirmations: Confirmations,
    pub placement: Placement,
    pub schedule: Schedule,
    pub cancel_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn new(id: MatchId, round: Option<u32>, number: u32, placement: Placement) -> Self {
        Match {
            id,
            round,
            number,
            player1: None,
            player2: None,
            status: MatchStatus::Pending,
            score: Score::default(),
            winner: None,
            confirmations: Confirmations::default(),
            placement,
            schedule: Schedule::default(),
            cancel_reason: None,
            completed_at: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.player1.is_some() && self.player2.is_some()
    }

    pub fn has_bye(&self) -> bool {
        self.player1.is_some_and(ParticipantId::is_bye)
            || self.player2.is_some_and(ParticipantId::is_bye)
    }

    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.player1 == Some(participant) || self.player2 == Some(participant)
    }

    /// The participant in the other slot from the winner.
    pub fn loser(&self) -> Option<ParticipantId> {
        let winner = self.winner?;
        if self.player1 == Some(winner) {
            self.player2
        } else if self.player2 == Some(winner) {
            self.player1
        } else {
            None
        }
    }

    /// Play began or a result was recorded; BYE walkovers do not count.
    pub fn has_started(&self) -> bool {
        match self.status {
            MatchStatus::InProgress | MatchStatus::Verification | MatchStatus::Completed => true,
            MatchStatus::Walkover => !self.has_bye(),
            _ => false,
        }
    }

    pub fn group(&self) -> Option<GroupId> {
        match self.placement {
            Placement::Group { group, .. } => Some(group),
            Placement::Bracket { .. } => None,
        }
    }

    pub fn bracket(&self) -> Option<BracketId> {
        match self.placement {
            Placement::Bracket { bracket, .. } => Some(bracket),
            Placement::Group { .. } => None,
        }
    }

    pub fn side(&self) -> Option<BracketSide> {
        match self.placement {
            Placement::Bracket { side, .. } => Some(side),
            Placement::Group { .. } => None,
        }
    }
}

// ── Groups and brackets ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub participants: Vec<ParticipantId>,
    pub advance_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub id: BracketId,
    pub name: String,
    pub kind: EliminationKind,
    /// Upper-bracket rounds.
    pub total_rounds: u32,
    pub lower_rounds: u32,
    /// Slot count, always a power of two.
    pub players_count: u32,
    /// The single-elimination final, or the upper final of a double bracket.
    pub final_match: MatchId,
    pub third_place: Option<MatchId>,
    pub grand_final: Option<MatchId>,
    pub reset: Option<MatchId>,
}

/// Everything generated for one stage, swapped as a unit on (re)generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStructure {
    pub stage_id: StageId,
    pub participants: Vec<Participant>,
    pub groups: Vec<Group>,
    pub brackets: Vec<Bracket>,
    pub matches: Vec<Match>,
}

impl StageStructure {
    pub fn empty(stage_id: StageId) -> Self {
        StageStructure {
            stage_id,
            participants: Vec::new(),
            groups: Vec::new(),
            brackets: Vec::new(),
            matches: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn get(&self, id: MatchId) -> Option<&Match> {
        self.matches.get(id.index())
    }

    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut Match> {
        self.matches.get_mut(id.index())
    }

    pub fn require(&self, id: MatchId) -> CoreResult<&Match> {
        self.get(id)
            .ok_or_else(|| CoreError::not_found("match", i64::from(id.0)))
    }

    /// Append a match to the arena and return its id.
    pub fn push_match(&mut self, round: Option<u32>, number: u32, placement: Placement) -> MatchId {
        let id = MatchId(self.matches.len() as u32);
        self.matches.push(Match::new(id, round, number, placement));
        id
    }

    pub fn has_started(&self) -> bool {
        self.matches.iter().any(Match::has_started)
    }

    pub fn group_matches(&self, group: GroupId) -> impl Iterator<Item = &Match> {
        self.matches.iter().filter(move |m| m.group() == Some(group))
    }

    pub fn bracket_matches(&self, bracket: BracketId) -> impl Iterator<Item = &Match> {
        self.matches
            .iter()
            .filter(move |m| m.bracket() == Some(bracket))
    }

    pub fn seed_of(&self, participant: ParticipantId) -> Option<u32> {
        self.participants
            .iter()
            .find(|p| p.id == participant)
            .map(|p| p.seed)
    }
}

// ── Leagues ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: LeagueId,
    pub name: String,
    pub base_rating: i32,
    pub strategy: RatingStrategy,
}

/// A participant's row on a league ladder. Counters are derived at
/// rearrangement time from the match log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderEntry {
    pub league_id: LeagueId,
    pub participant: ParticipantId,
    pub first_name: String,
    pub last_name: String,
    pub rating: i32,
    pub position: u32,
    pub wins: u32,
    pub frame_diff: i64,
    pub frames_won: u32,
    pub matches_played: u32,
}

impl LadderEntry {
    pub fn new(
        league_id: LeagueId,
        participant: ParticipantId,
        first_name: &str,
        last_name: &str,
        rating: i32,
    ) -> Self {
        LadderEntry {
            league_id,
            participant,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            rating,
            position: 0,
            wins: 0,
            frame_diff: 0,
            frames_won: 0,
            matches_played: 0,
        }
    }
}

/// Where a league match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MatchKey {
    OneOff { id: i64 },
    Stage { stage_id: StageId, match_id: MatchId },
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchKey::OneOff { id } => write!(f, "league match {id}"),
            MatchKey::Stage { stage_id, match_id } => {
                write!(f, "stage {stage_id} match {}", match_id.0)
            }
        }
    }
}

/// A pairwise result counted on a ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueMatch {
    pub league_id: LeagueId,
    pub key: MatchKey,
    pub player1: ParticipantId,
    pub player2: ParticipantId,
    pub frames1: u32,
    pub frames2: u32,
    pub played_at: DateTime<Utc>,
}

impl LeagueMatch {
    pub fn winner(&self) -> ParticipantId {
        if self.frames1 > self.frames2 {
            self.player1
        } else {
            self.player2
        }
    }

    pub fn loser(&self) -> ParticipantId {
        if self.frames1 > self.frames2 {
            self.player2
        } else {
            self.player1
        }
    }

    /// (frames won, frames lost) for one side, if they played.
    pub fn frames_for(&self, participant: ParticipantId) -> Option<(u32, u32)> {
        if participant == self.player1 {
            Some((self.frames1, self.frames2))
        } else if participant == self.player2 {
            Some((self.frames2, self.frames1))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameScore {
    pub participant: ParticipantId,
    pub points: i32,
}

/// A completed multiplayer (killer pool) game with pre-computed points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplayerGame {
    pub id: i64,
    pub league_id: LeagueId,
    pub played_at: DateTime<Utc>,
    pub participants: Vec<ParticipantId>,
    pub scores: Vec<GameScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RatingSource {
    Match { key: MatchKey },
    Game { id: i64 },
}

/// One entry of a league's append-only rating log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub league_id: LeagueId,
    pub participant: ParticipantId,
    pub delta: i32,
    pub source: RatingSource,
}
