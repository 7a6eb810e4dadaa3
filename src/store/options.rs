use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SQLite `synchronous` level applied to every session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Synchronous {
    /// fsync on every commit.
    Full,
    /// fsync at checkpoints only.
    Normal,
    /// Leave syncing to the OS.
    Off,
}

impl Synchronous {
    pub(crate) fn pragma_value(self) -> &'static str {
        match self {
            Synchronous::Full => "FULL",
            Synchronous::Normal => "NORMAL",
            Synchronous::Off => "OFF",
        }
    }
}

/// Options used when opening a store session.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Whether to create the database (and its schema) if the file is missing.
    pub create_if_missing: bool,
    /// How long a session waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Durability level for commits.
    pub synchronous: Synchronous,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            busy_timeout: Duration::from_secs(30),
            synchronous: Synchronous::Full,
        }
    }
}

impl StoreOptions {
    /// Default options that also create a missing database.
    pub fn create() -> Self {
        Self {
            create_if_missing: true,
            ..Self::default()
        }
    }
}
