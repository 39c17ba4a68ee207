// Tournament bracket engine and league ladder rating core.

pub mod bracket;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ladder;
pub mod locks;
pub mod metrics;
pub mod model;
pub mod progression;
pub mod rating;
pub mod seeding;
pub mod standings;
pub mod store;
pub mod tournament;

pub use error::{ConfigError, Conflict, CoreError, CoreResult};
pub use events::{CoreEvent, EventBus};
pub use ladder::LadderService;
pub use store::{Changeset, MatchQuery, MemoryStore, Store};
pub use tournament::TournamentService;
