//! Permission storage helpers
//!
//! Reads and writes the on-disk mirror of the manager's state:
//! - `rules.json` - every rule, as a JSON array
//! - `approvals.json` - valid session/always approvals, as a JSON array
//!
//! Both files are rewritten in full on every save.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::approval::PersistentApproval;
use super::rule::PermissionRule;
use crate::core::GovernanceResult;

const RULES_FILE: &str = "rules.json";
const APPROVALS_FILE: &str = "approvals.json";

/// Default storage directory: `~/.praison/permissions`
pub fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".praison")
        .join("permissions")
}

/// Permission storage manager
#[derive(Debug, Clone)]
pub struct PermissionStorage {
    base_dir: PathBuf,
}

impl PermissionStorage {
    /// Create storage in the default directory
    pub fn new() -> Self {
        Self {
            base_dir: default_storage_dir(),
        }
    }

    /// Create storage in a custom directory
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: dir.into(),
        }
    }

    /// Path of the rules file
    pub fn rules_path(&self) -> PathBuf {
        self.base_dir.join(RULES_FILE)
    }

    /// Path of the approvals file
    pub fn approvals_path(&self) -> PathBuf {
        self.base_dir.join(APPROVALS_FILE)
    }

    /// Create the storage directory if it doesn't exist
    pub fn ensure_dir(&self) -> GovernanceResult<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir)?;
        }
        Ok(())
    }

    /// Load all rules; a missing file means no rules
    pub fn load_rules(&self) -> GovernanceResult<Vec<PermissionRule>> {
        read_array(&self.rules_path())
    }

    /// Overwrite the rules file
    pub fn save_rules(&self, rules: &[PermissionRule]) -> GovernanceResult<()> {
        self.ensure_dir()?;
        write_array(&self.rules_path(), rules)
    }

    /// Load approvals, keeping only those that are still valid
    pub fn load_approvals(&self) -> GovernanceResult<Vec<PersistentApproval>> {
        let now = Utc::now();
        let approvals: Vec<PersistentApproval> = read_array(&self.approvals_path())?;
        Ok(approvals
            .into_iter()
            .filter(|a| a.is_persistent() && a.is_valid_at(now))
            .collect())
    }

    /// Overwrite the approvals file with the valid session/always entries
    ///
    /// Returns how many approvals were written.
    pub fn save_approvals(&self, approvals: &[PersistentApproval]) -> GovernanceResult<usize> {
        let now = Utc::now();
        let persistent: Vec<&PersistentApproval> = approvals
            .iter()
            .filter(|a| a.is_persistent() && a.is_valid_at(now))
            .collect();

        self.ensure_dir()?;
        write_array(&self.approvals_path(), &persistent)?;
        Ok(persistent.len())
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

impl Default for PermissionStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn read_array<T: serde::de::DeserializeOwned>(path: &Path) -> GovernanceResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let items: Vec<T> = serde_json::from_reader(reader)?;

    Ok(items)
}

fn write_array<T: serde::Serialize>(path: &Path, items: &[T]) -> GovernanceResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, items)?;
    writer.flush()?;
    Ok(())
}
