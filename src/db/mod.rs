// Database access layer (SQLite via sqlx).
//
// Implements `Store`. Typed placements, settings and strategies are kept as
// JSON text columns; timestamps as RFC 3339 text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};

use crate::error::{Conflict, CoreError, CoreResult};
use crate::model::{
    Bracket, Confirmations, GameScore, Group, LadderEntry, League, LeagueId, LeagueMatch, Match,
    MatchId, MatchStatus, MultiplayerGame, Participant, ParticipantId, RatingEvent,
    RatingSource, Schedule, Score, Stage, StageId, StageKind, StageStatus, StageStructure,
    Tournament, TournamentId, TournamentStatus,
};
use crate::store::{Changeset, MatchQuery, Store};

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
struct TournamentRow {
    id: i64,
    name: String,
    league_id: Option<i64>,
    status: String,
}

impl TournamentRow {
    fn into_model(self) -> CoreResult<Tournament> {
        Ok(Tournament {
            id: self.id,
            name: self.name,
            league_id: self.league_id,
            status: TournamentStatus::from_str_name(&self.status)
                .ok_or_else(|| decode_error("tournament status", &self.status))?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct StageRow {
    id: i64,
    tournament_id: i64,
    ord: i64,
    kind: String,
    settings: String,
    status: String,
}

impl StageRow {
    fn into_model(self) -> CoreResult<Stage> {
        Ok(Stage {
            id: self.id,
            tournament_id: self.tournament_id,
            order: self.ord as u32,
            kind: StageKind::from_str_name(&self.kind)
                .ok_or_else(|| decode_error("stage kind", &self.kind))?,
            settings: serde_json::from_str(&self.settings)?,
            status: StageStatus::from_str_name(&self.status)
                .ok_or_else(|| decode_error("stage status", &self.status))?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ParticipantRow {
    participant_id: i64,
    seed: i64,
    rating_snapshot: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct GroupRow {
    group_id: i64,
    name: String,
    participants: String,
    advance_count: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BracketRow {
    data: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct MatchRow {
    match_id: i64,
    round: Option<i64>,
    number: i64,
    player1: Option<i64>,
    player2: Option<i64>,
    status: String,
    score1: i64,
    score2: i64,
    winner: Option<i64>,
    confirmed1: bool,
    confirmed2: bool,
    placement: String,
    scheduled_at: Option<String>,
    table_name: Option<String>,
    cancel_reason: Option<String>,
    completed_at: Option<String>,
}

impl MatchRow {
    fn into_model(self) -> CoreResult<Match> {
        Ok(Match {
            id: MatchId(self.match_id as u32),
            round: self.round.map(|r| r as u32),
            number: self.number as u32,
            player1: self.player1.map(ParticipantId),
            player2: self.player2.map(ParticipantId),
            status: MatchStatus::from_str_name(&self.status)
                .ok_or_else(|| decode_error("match status", &self.status))?,
            score: Score::new(self.score1 as u32, self.score2 as u32),
            winner: self.winner.map(ParticipantId),
            confirmations: Confirmations {
                player1: self.confirmed1,
                player2: self.confirmed2,
            },
            placement: serde_json::from_str(&self.placement)?,
            schedule: Schedule {
                at: self.scheduled_at.as_deref().map(parse_time).transpose()?,
                table: self.table_name,
            },
            cancel_reason: self.cancel_reason,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct LeagueRow {
    id: i64,
    name: String,
    base_rating: i64,
    strategy: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct LadderRow {
    league_id: i64,
    participant_id: i64,
    first_name: String,
    last_name: String,
    rating: i64,
    position: i64,
    wins: i64,
    frame_diff: i64,
    frames_won: i64,
    matches_played: i64,
}

impl LadderRow {
    fn into_model(self) -> LadderEntry {
        LadderEntry {
            league_id: self.league_id,
            participant: ParticipantId(self.participant_id),
            first_name: self.first_name,
            last_name: self.last_name,
            rating: self.rating as i32,
            position: self.position as u32,
            wins: self.wins as u32,
            frame_diff: self.frame_diff,
            frames_won: self.frames_won as u32,
            matches_played: self.matches_played as u32,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct LeagueMatchRow {
    league_id: i64,
    match_key: String,
    player1: i64,
    player2: i64,
    frames1: i64,
    frames2: i64,
    played_at: String,
}

impl LeagueMatchRow {
    fn into_model(self) -> CoreResult<LeagueMatch> {
        Ok(LeagueMatch {
            league_id: self.league_id,
            key: serde_json::from_str(&self.match_key)?,
            player1: ParticipantId(self.player1),
            player2: ParticipantId(self.player2),
            frames1: self.frames1 as u32,
            frames2: self.frames2 as u32,
            played_at: parse_time(&self.played_at)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct GameRow {
    id: i64,
    league_id: i64,
    played_at: String,
    participants: String,
    scores: String,
}

impl GameRow {
    fn into_model(self) -> CoreResult<MultiplayerGame> {
        Ok(MultiplayerGame {
            id: self.id,
            league_id: self.league_id,
            played_at: parse_time(&self.played_at)?,
            participants: serde_json::from_str(&self.participants)?,
            scores: serde_json::from_str::<Vec<GameScore>>(&self.scores)?,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RatingRow {
    league_id: i64,
    participant_id: i64,
    delta: i64,
    source: String,
}

impl RatingRow {
    fn into_model(self) -> CoreResult<RatingEvent> {
        Ok(RatingEvent {
            league_id: self.league_id,
            participant: ParticipantId(self.participant_id),
            delta: self.delta as i32,
            source: serde_json::from_str::<RatingSource>(&self.source)?,
        })
    }
}

fn decode_error(what: &str, value: &str) -> CoreError {
    CoreError::Database(sqlx::Error::Decode(
        format!("unknown {what} '{value}'").into(),
    ))
}

fn parse_time(raw: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> CoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> CoreResult<T> {
    Ok(serde_json::from_str(raw)?)
}

// ── Database ─────────────────────────────────────────────────────────

const MATCH_COLUMNS: &str = "match_id, round, number, player1, player2, status, score1, score2, winner, confirmed1, confirmed2, placement, scheduled_at, table_name, cancel_reason, completed_at";

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> CoreResult<Self> {
        // Every connection to `:memory:` opens its own empty database.
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = options.connect(database_url).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        tracing::info!(database_url, "database ready");
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tournaments (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                league_id INTEGER,
                status TEXT NOT NULL DEFAULT 'pending'
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stages (
                id INTEGER PRIMARY KEY,
                tournament_id INTEGER NOT NULL REFERENCES tournaments(id) ON DELETE CASCADE,
                ord INTEGER NOT NULL,
                kind TEXT NOT NULL,
                settings TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'created'
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_participants (
                stage_id INTEGER NOT NULL,
                participant_id INTEGER NOT NULL,
                seed INTEGER NOT NULL,
                rating_snapshot INTEGER,
                PRIMARY KEY (stage_id, participant_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_groups (
                stage_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                participants TEXT NOT NULL,
                advance_count INTEGER NOT NULL,
                PRIMARY KEY (stage_id, group_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stage_brackets (
                stage_id INTEGER NOT NULL,
                bracket_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (stage_id, bracket_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                stage_id INTEGER NOT NULL,
                match_id INTEGER NOT NULL,
                round INTEGER,
                number INTEGER NOT NULL,
                player1 INTEGER,
                player2 INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                score1 INTEGER NOT NULL DEFAULT 0,
                score2 INTEGER NOT NULL DEFAULT 0,
                winner INTEGER,
                confirmed1 INTEGER NOT NULL DEFAULT 0,
                confirmed2 INTEGER NOT NULL DEFAULT 0,
                placement TEXT NOT NULL,
                scheduled_at TEXT,
                table_name TEXT,
                cancel_reason TEXT,
                completed_at TEXT,
                PRIMARY KEY (stage_id, match_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leagues (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                base_rating INTEGER NOT NULL DEFAULT 1000,
                strategy TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ladder_entries (
                league_id INTEGER NOT NULL REFERENCES leagues(id) ON DELETE CASCADE,
                participant_id INTEGER NOT NULL,
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                rating INTEGER NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                frame_diff INTEGER NOT NULL DEFAULT 0,
                frames_won INTEGER NOT NULL DEFAULT 0,
                matches_played INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (league_id, participant_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS league_matches (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL,
                match_key TEXT NOT NULL,
                player1 INTEGER NOT NULL,
                player2 INTEGER NOT NULL,
                frames1 INTEGER NOT NULL,
                frames2 INTEGER NOT NULL,
                played_at TEXT NOT NULL,
                UNIQUE(league_id, match_key)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS multiplayer_games (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL,
                league_id INTEGER NOT NULL,
                played_at TEXT NOT NULL,
                participants TEXT NOT NULL,
                scores TEXT NOT NULL,
                UNIQUE(league_id, id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rating_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                league_id INTEGER NOT NULL,
                participant_id INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                source TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ── Writers (run inside the commit transaction) ──────────────────

    async fn clear_structure(conn: &mut SqliteConnection, stage_id: StageId) -> CoreResult<()> {
        for table in ["stage_participants", "stage_groups", "stage_brackets", "matches"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE stage_id = ?"))
                .bind(stage_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    async fn write_structure(
        conn: &mut SqliteConnection,
        structure: &StageStructure,
    ) -> CoreResult<()> {
        let stage_id = structure.stage_id;
        Self::clear_structure(conn, stage_id).await?;

        for p in &structure.participants {
            sqlx::query(
                "INSERT INTO stage_participants (stage_id, participant_id, seed, rating_snapshot) VALUES (?, ?, ?, ?)",
            )
            .bind(stage_id)
            .bind(p.id.0)
            .bind(i64::from(p.seed))
            .bind(p.rating_snapshot.map(i64::from))
            .execute(&mut *conn)
            .await?;
        }
        for g in &structure.groups {
            sqlx::query(
                "INSERT INTO stage_groups (stage_id, group_id, name, participants, advance_count) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(stage_id)
            .bind(i64::from(g.id))
            .bind(&g.name)
            .bind(json(&g.participants)?)
            .bind(i64::from(g.advance_count))
            .execute(&mut *conn)
            .await?;
        }
        for b in &structure.brackets {
            sqlx::query("INSERT INTO stage_brackets (stage_id, bracket_id, data) VALUES (?, ?, ?)")
                .bind(stage_id)
                .bind(i64::from(b.id))
                .bind(json(b)?)
                .execute(&mut *conn)
                .await?;
        }
        for m in &structure.matches {
            Self::write_match(conn, stage_id, m).await?;
        }
        Ok(())
    }

    async fn write_match(conn: &mut SqliteConnection, stage_id: StageId, m: &Match) -> CoreResult<()> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO matches (stage_id, {MATCH_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(stage_id)
        .bind(i64::from(m.id.0))
        .bind(m.round.map(i64::from))
        .bind(i64::from(m.number))
        .bind(m.player1.map(|p| p.0))
        .bind(m.player2.map(|p| p.0))
        .bind(m.status.to_str_name())
        .bind(i64::from(m.score.player1))
        .bind(i64::from(m.score.player2))
        .bind(m.winner.map(|p| p.0))
        .bind(m.confirmations.player1)
        .bind(m.confirmations.player2)
        .bind(json(&m.placement)?)
        .bind(m.schedule.at.map(|t| t.to_rfc3339()))
        .bind(m.schedule.table.as_deref())
        .bind(m.cancel_reason.as_deref())
        .bind(m.completed_at.map(|t| t.to_rfc3339()))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn upsert_match(conn: &mut SqliteConnection, stage_id: StageId, m: &Match) -> CoreResult<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM matches WHERE stage_id = ?")
            .bind(stage_id)
            .fetch_one(&mut *conn)
            .await?;
        if count == 0 {
            return Err(CoreError::not_found("stage structure", stage_id));
        }
        if i64::from(m.id.0) >= count {
            return Err(CoreError::not_found("match", i64::from(m.id.0)));
        }
        Self::write_match(conn, stage_id, m).await
    }

    async fn apply(conn: &mut SqliteConnection, changes: &Changeset) -> CoreResult<()> {
        for t in &changes.tournaments {
            sqlx::query(
                "INSERT OR REPLACE INTO tournaments (id, name, league_id, status) VALUES (?, ?, ?, ?)",
            )
            .bind(t.id)
            .bind(&t.name)
            .bind(t.league_id)
            .bind(t.status.to_str_name())
            .execute(&mut *conn)
            .await?;
        }
        for s in &changes.stages {
            sqlx::query(
                "INSERT OR REPLACE INTO stages (id, tournament_id, ord, kind, settings, status) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(s.id)
            .bind(s.tournament_id)
            .bind(i64::from(s.order))
            .bind(s.kind.to_str_name())
            .bind(json(&s.settings)?)
            .bind(s.status.to_str_name())
            .execute(&mut *conn)
            .await?;
        }
        for &stage_id in &changes.removed_stages {
            sqlx::query("DELETE FROM stages WHERE id = ?")
                .bind(stage_id)
                .execute(&mut *conn)
                .await?;
            Self::clear_structure(conn, stage_id).await?;
        }
        for structure in &changes.structures {
            Self::write_structure(conn, structure).await?;
        }
        for (stage_id, m) in &changes.matches {
            Self::upsert_match(conn, *stage_id, m).await?;
        }
        for l in &changes.leagues {
            sqlx::query(
                "INSERT OR REPLACE INTO leagues (id, name, base_rating, strategy) VALUES (?, ?, ?, ?)",
            )
            .bind(l.id)
            .bind(&l.name)
            .bind(i64::from(l.base_rating))
            .bind(json(&l.strategy)?)
            .execute(&mut *conn)
            .await?;
        }
        for e in &changes.ladder {
            sqlx::query(
                "INSERT OR REPLACE INTO ladder_entries (league_id, participant_id, first_name, last_name, rating, position, wins, frame_diff, frames_won, matches_played) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(e.league_id)
            .bind(e.participant.0)
            .bind(&e.first_name)
            .bind(&e.last_name)
            .bind(i64::from(e.rating))
            .bind(i64::from(e.position))
            .bind(i64::from(e.wins))
            .bind(e.frame_diff)
            .bind(i64::from(e.frames_won))
            .bind(i64::from(e.matches_played))
            .execute(&mut *conn)
            .await?;
        }
        for r in &changes.league_matches {
            let key = json(&r.key)?;
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT seq FROM league_matches WHERE league_id = ? AND match_key = ?",
            )
            .bind(r.league_id)
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;
            if exists.is_some() {
                return Err(Conflict::AlreadyRecorded(r.key.to_string()).into());
            }
            sqlx::query(
                "INSERT INTO league_matches (league_id, match_key, player1, player2, frames1, frames2, played_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(r.league_id)
            .bind(&key)
            .bind(r.player1.0)
            .bind(r.player2.0)
            .bind(i64::from(r.frames1))
            .bind(i64::from(r.frames2))
            .bind(r.played_at.to_rfc3339())
            .execute(&mut *conn)
            .await?;
        }
        for g in &changes.games {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT seq FROM multiplayer_games WHERE league_id = ? AND id = ?",
            )
            .bind(g.league_id)
            .bind(g.id)
            .fetch_optional(&mut *conn)
            .await?;
            if exists.is_some() {
                return Err(Conflict::AlreadyRecorded(format!("game {}", g.id)).into());
            }
            sqlx::query(
                "INSERT INTO multiplayer_games (id, league_id, played_at, participants, scores) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(g.id)
            .bind(g.league_id)
            .bind(g.played_at.to_rfc3339())
            .bind(json(&g.participants)?)
            .bind(json(&g.scores)?)
            .execute(&mut *conn)
            .await?;
        }
        for &league_id in &changes.cleared_logs {
            sqlx::query("DELETE FROM rating_log WHERE league_id = ?")
                .bind(league_id)
                .execute(&mut *conn)
                .await?;
        }
        for e in &changes.rating_events {
            sqlx::query(
                "INSERT INTO rating_log (league_id, participant_id, delta, source) VALUES (?, ?, ?, ?)",
            )
            .bind(e.league_id)
            .bind(e.participant.0)
            .bind(i64::from(e.delta))
            .bind(json(&e.source)?)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Store for Database {
    async fn tournament(&self, id: TournamentId) -> CoreResult<Option<Tournament>> {
        let row = sqlx::query_as::<_, TournamentRow>(
            "SELECT id, name, league_id, status FROM tournaments WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TournamentRow::into_model).transpose()
    }

    async fn stage(&self, id: StageId) -> CoreResult<Option<Stage>> {
        let row = sqlx::query_as::<_, StageRow>(
            "SELECT id, tournament_id, ord, kind, settings, status FROM stages WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(StageRow::into_model).transpose()
    }

    async fn stages(&self, tournament_id: TournamentId) -> CoreResult<Vec<Stage>> {
        let rows = sqlx::query_as::<_, StageRow>(
            "SELECT id, tournament_id, ord, kind, settings, status FROM stages WHERE tournament_id = ? ORDER BY ord, id",
        )
        .bind(tournament_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StageRow::into_model).collect()
    }

    async fn structure(&self, stage_id: StageId) -> CoreResult<StageStructure> {
        let participants = sqlx::query_as::<_, ParticipantRow>(
            "SELECT participant_id, seed, rating_snapshot FROM stage_participants WHERE stage_id = ? ORDER BY seed",
        )
        .bind(stage_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| Participant {
            id: ParticipantId(r.participant_id),
            seed: r.seed as u32,
            rating_snapshot: r.rating_snapshot.map(|v| v as i32),
        })
        .collect();

        let groups = sqlx::query_as::<_, GroupRow>(
            "SELECT group_id, name, participants, advance_count FROM stage_groups WHERE stage_id = ? ORDER BY group_id",
        )
        .bind(stage_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| {
            Ok(Group {
                id: r.group_id as u32,
                name: r.name,
                participants: from_json(&r.participants)?,
                advance_count: r.advance_count as u32,
            })
        })
        .collect::<CoreResult<Vec<Group>>>()?;

        let brackets = sqlx::query_as::<_, BracketRow>(
            "SELECT data FROM stage_brackets WHERE stage_id = ? ORDER BY bracket_id",
        )
        .bind(stage_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|r| from_json::<Bracket>(&r.data))
        .collect::<CoreResult<Vec<Bracket>>>()?;

        let matches = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE stage_id = ? ORDER BY match_id"
        ))
        .bind(stage_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(MatchRow::into_model)
        .collect::<CoreResult<Vec<Match>>>()?;

        Ok(StageStructure {
            stage_id,
            participants,
            groups,
            brackets,
            matches,
        })
    }

    async fn matches(&self, query: &MatchQuery) -> CoreResult<Vec<Match>> {
        let rows = sqlx::query_as::<_, MatchRow>(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE stage_id = ? AND (? IS NULL OR status = ?) AND (? IS NULL OR round = ?) ORDER BY match_id"
        ))
        .bind(query.stage_id)
        .bind(query.status.map(MatchStatus::to_str_name))
        .bind(query.status.map(MatchStatus::to_str_name))
        .bind(query.round.map(i64::from))
        .bind(query.round.map(i64::from))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::new();
        for row in rows {
            let m = row.into_model()?;
            if query.accepts(&m) {
                out.push(m);
            }
        }
        Ok(out)
    }

    async fn league(&self, id: LeagueId) -> CoreResult<Option<League>> {
        let row = sqlx::query_as::<_, LeagueRow>(
            "SELECT id, name, base_rating, strategy FROM leagues WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(League {
                id: r.id,
                name: r.name,
                base_rating: r.base_rating as i32,
                strategy: from_json(&r.strategy)?,
            })
        })
        .transpose()
    }

    async fn ladder(&self, league_id: LeagueId) -> CoreResult<Vec<LadderEntry>> {
        let rows = sqlx::query_as::<_, LadderRow>(
            "SELECT league_id, participant_id, first_name, last_name, rating, position, wins, frame_diff, frames_won, matches_played FROM ladder_entries WHERE league_id = ? ORDER BY position, participant_id",
        )
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(LadderRow::into_model).collect())
    }

    async fn league_matches(&self, league_id: LeagueId) -> CoreResult<Vec<LeagueMatch>> {
        let rows = sqlx::query_as::<_, LeagueMatchRow>(
            "SELECT league_id, match_key, player1, player2, frames1, frames2, played_at FROM league_matches WHERE league_id = ? ORDER BY seq",
        )
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LeagueMatchRow::into_model).collect()
    }

    async fn games(&self, league_id: LeagueId) -> CoreResult<Vec<MultiplayerGame>> {
        let rows = sqlx::query_as::<_, GameRow>(
            "SELECT id, league_id, played_at, participants, scores FROM multiplayer_games WHERE league_id = ? ORDER BY seq",
        )
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(GameRow::into_model).collect()
    }

    async fn rating_log(&self, league_id: LeagueId) -> CoreResult<Vec<RatingEvent>> {
        let rows = sqlx::query_as::<_, RatingRow>(
            "SELECT league_id, participant_id, delta, source FROM rating_log WHERE league_id = ? ORDER BY seq",
        )
        .bind(league_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RatingRow::into_model).collect()
    }

    async fn commit(&self, changes: Changeset) -> CoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        // Dropping the transaction without commit rolls everything back.
        Self::apply(&mut *tx, &changes).await?;
        tx.commit().await?;
        Ok(())
    }
}
