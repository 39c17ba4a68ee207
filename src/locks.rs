// Single-writer registry: one async mutex per stage and per league.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// What a lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    Stage,
    League,
}

impl std::fmt::Display for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockScope::Stage => write!(f, "stage"),
            LockScope::League => write!(f, "league"),
        }
    }
}

/// Key for the lock map: (scope, id).
type LockKey = (LockScope, i64);

/// Thread-safe registry of per-entity async locks.
#[derive(Debug, Clone)]
pub struct LockRegistry {
    inner: Arc<Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to one stage or league. Access ends when the
    /// guard drops.
    ///
    /// Entries nobody holds or waits for are dropped on the way, so the map
    /// only tracks locks in use.
    pub async fn acquire(&self, scope: LockScope, id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            // Holders and waiters keep a clone; the map's own copy is the last.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry((scope, id))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Number of tracked locks (for diagnostics).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
