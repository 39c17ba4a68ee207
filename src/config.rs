// Application configuration, loaded from environment variables and CLI flags.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, CoreResult};
use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::rating::{RuleTable, DEFAULT_BASE_RATING};

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// JSON file holding the tiered rule table for new leagues.
    pub rules_path: Option<PathBuf>,
    /// Starting rating of newly registered players.
    pub base_rating: i32,
    /// Buffered notifications per event subscriber.
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:cue.db?mode=rwc".to_string(),
            rules_path: None,
            base_rating: DEFAULT_BASE_RATING,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:cue.db?mode=rwc`)
    /// - `CUE_RULES_PATH` - Path to a JSON rule table
    /// - `CUE_BASE_RATING` - Starting rating (default: 1000)
    /// - `CUE_EVENT_CAPACITY` - Event bus buffer size (default: 256)
    ///
    /// CLI flags (take precedence over the environment):
    /// - `--database <URL>`
    /// - `--rules <PATH>`
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();

        let database_url = Self::parse_cli_value(args, "--database")
            .or_else(|| env("DATABASE_URL"))
            .unwrap_or(defaults.database_url);

        let rules_path = Self::parse_cli_value(args, "--rules")
            .or_else(|| env("CUE_RULES_PATH"))
            .map(PathBuf::from);

        let base_rating = env("CUE_BASE_RATING")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.base_rating);

        let event_capacity = env("CUE_EVENT_CAPACITY")
            .and_then(|v| v.parse().ok())
            .filter(|&n: &usize| n > 0)
            .unwrap_or(defaults.event_capacity);

        Config {
            database_url,
            rules_path,
            base_rating,
            event_capacity,
        }
    }

    /// The configured rule table, or the standard one when no file is set.
    pub fn rule_table(&self) -> CoreResult<RuleTable> {
        match &self.rules_path {
            Some(path) => load_rule_table(path),
            None => Ok(RuleTable::standard()),
        }
    }

    /// Parse a CLI flag value like `--database sqlite::memory:`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

/// Read and validate a rule table from a JSON file.
pub fn load_rule_table(path: &Path) -> CoreResult<RuleTable> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::RuleTable(format!("cannot read {}: {e}", path.display()))
    })?;
    parse_rule_table(&raw)
}

pub fn parse_rule_table(raw: &str) -> CoreResult<RuleTable> {
    let table: RuleTable = serde_json::from_str(raw)?;
    table.validate()?;
    Ok(table)
}
