//! Engine and session configuration.
//!
//! All configs deserialize with `serde`, fill missing keys with defaults and
//! can be embedded in a caller's own configuration file.

use crate::error::{OrmError, OrmResult};
use serde::{Deserialize, Serialize};

const DEFAULT_CURSOR_BATCH_SIZE: u32 = 100;
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// What happens after an After-hook fails.
///
/// The preceding mutation is never undone by the engine itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfterHookPolicy {
    /// Return the hook error and leave the transaction usable.
    #[default]
    Report,
    /// Return the hook error and mark the enclosing transaction rollback-only.
    RollbackOnly,
}

/// Behavior of the mapper and resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows fetched per round trip by lazy cursors.
    pub cursor_batch_size: u32,
    pub after_hook_policy: AfterHookPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cursor_batch_size: DEFAULT_CURSOR_BATCH_SIZE,
            after_hook_policy: AfterHookPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> OrmResult<()> {
        if self.cursor_batch_size == 0 {
            return Err(OrmError::InvalidConfig(
                "cursor_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-connection settings applied when a session opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}
