//! Permission Manager Configuration
//!
//! Everything the embedding application can tune about the engine. All fields
//! have defaults, so an empty JSON object is a valid configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::storage::default_storage_dir;
use super::types::PermissionMode;
use crate::doom_loop::DoomLoopConfig;

/// Configuration for a PermissionManager
///
/// ```ignore
/// let config = PermissionConfig::new()
///     .with_storage_dir("/var/lib/agent/permissions")
///     .with_default_agent("coder")
///     .with_doom_loop(DoomLoopConfig::default().with_loop_threshold(5));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Directory holding `rules.json` and `approvals.json`
    pub storage_dir: PathBuf,

    /// Agent used for rule scoping when a check names none
    pub default_agent: Option<String>,

    /// Mirror rules and approvals to disk
    /// When false the manager is purely in-memory.
    pub persist: bool,

    /// Session posture reported to callers
    pub mode: PermissionMode,

    /// Doom loop detection thresholds
    pub doom_loop: DoomLoopConfig,
}

impl PermissionConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the storage directory
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Set the default agent name
    pub fn with_default_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.default_agent = Some(agent_name.into());
        self
    }

    /// Enable or disable disk persistence
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Keep everything in memory
    pub fn in_memory(self) -> Self {
        self.with_persistence(false)
    }

    /// Set the permission mode
    pub fn with_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the doom loop thresholds
    pub fn with_doom_loop(mut self, doom_loop: DoomLoopConfig) -> Self {
        self.doom_loop = doom_loop;
        self
    }
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            default_agent: None,
            persist: true,
            mode: PermissionMode::Default,
            doom_loop: DoomLoopConfig::default(),
        }
    }
}
