use crate::error::TablesError;
use serde::{Deserialize, Serialize};

/// Runtime configuration for a tables instance. Fields missing from a
/// serialized config take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    /// Upper bound on waiting for a table's task lock before the mutation
    /// fails with a task-lock failure.
    pub lock_timeout_ms: u64,
    pub default_fetch_limit: usize,
    pub max_fetch_limit: usize,
    /// Number of checkpoint files kept on disk; older ones are pruned.
    pub checkpoint_retention: usize,
    pub checkpoint_compression_level: i32,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            default_fetch_limit: 1_000,
            max_fetch_limit: 2_000,
            checkpoint_retention: 3,
            checkpoint_compression_level: 3,
        }
    }
}

impl TablesConfig {
    pub fn production() -> Self {
        Self {
            lock_timeout_ms: 10_000,
            checkpoint_retention: 8,
            ..Self::default()
        }
    }

    /// Short lock waits so contention shows up quickly while iterating locally.
    pub fn development() -> Self {
        Self {
            lock_timeout_ms: 500,
            default_fetch_limit: 100,
            checkpoint_retention: 1,
            checkpoint_compression_level: 1,
            ..Self::default()
        }
    }

    pub fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    pub fn with_fetch_limits(mut self, default_fetch_limit: usize, max_fetch_limit: usize) -> Self {
        self.default_fetch_limit = default_fetch_limit;
        self.max_fetch_limit = max_fetch_limit;
        self
    }

    pub fn with_checkpoint_retention(mut self, retention: usize) -> Self {
        self.checkpoint_retention = retention;
        self
    }

    /// Resolves a caller-requested page size against the configured bounds.
    pub fn clamp_fetch_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_fetch_limit)
            .clamp(1, self.max_fetch_limit)
    }

    pub fn validate(&self) -> Result<(), TablesError> {
        if self.lock_timeout_ms == 0 {
            return Err(TablesError::InvalidConfig {
                message: "lock_timeout_ms must be > 0".into(),
            });
        }
        if self.max_fetch_limit == 0 {
            return Err(TablesError::InvalidConfig {
                message: "max_fetch_limit must be > 0".into(),
            });
        }
        if self.default_fetch_limit == 0 || self.default_fetch_limit > self.max_fetch_limit {
            return Err(TablesError::InvalidConfig {
                message: "default_fetch_limit must be > 0 and <= max_fetch_limit".into(),
            });
        }
        if self.checkpoint_retention == 0 {
            return Err(TablesError::InvalidConfig {
                message: "checkpoint_retention must be > 0".into(),
            });
        }
        if !(1..=22).contains(&self.checkpoint_compression_level) {
            return Err(TablesError::InvalidConfig {
                message: format!(
                    "checkpoint_compression_level must be within 1..=22, got {}",
                    self.checkpoint_compression_level
                ),
            });
        }
        Ok(())
    }
}
