//! Permission manager implementation
//!
//! Decision order for `check`:
//! 1. Remembered human decisions (approvals), in the order they were made
//! 2. Rules, highest priority first
//! 3. Otherwise ask
//!
//! Approvals outrank rules so a user who said "no" is not overridden by a
//! looser allow rule added later.
//!
//! Rules and approvals live in memory behind one lock and are mirrored to
//! disk on every mutation. The in-memory copy is authoritative: a failed
//! write is logged and the change stays usable for the rest of the process.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::approval::PersistentApproval;
use super::config::PermissionConfig;
use super::rule::PermissionRule;
use super::source::{ApprovalSource, ArcApprovalSource};
use super::storage::PermissionStorage;
use super::types::{ApprovalScope, PermissionAction, PermissionMode, PermissionResult};
use crate::core::sync::lock;
use crate::doom_loop::{DoomLoopDetector, DoomLoopResult};

/// Reason given when nothing matched
pub const NO_MATCH_REASON: &str = "No matching rule, requires approval";

/// Rules and approvals held by a manager
///
/// Also the export/import format for moving state between managers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionState {
    /// Sorted by descending priority
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
    /// In the order the decisions were made
    #[serde(default)]
    pub approvals: Vec<PersistentApproval>,
}

impl PermissionState {
    fn sort_rules(&mut self) {
        // stable: equal priorities keep insertion order
        self.rules.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }
}

/// Decides whether agent actions may run
///
/// All methods take `&self` and are safe to call from many threads; rule and
/// approval access is serialized on one internal lock, which is also held
/// while the disk mirror is rewritten.
pub struct PermissionManager {
    config: PermissionConfig,
    storage: PermissionStorage,
    state: Mutex<PermissionState>,
    approval_source: Option<ArcApprovalSource>,
    doom_loop: DoomLoopDetector,
}

impl PermissionManager {
    /// Create a manager using the default storage directory
    pub fn new() -> Self {
        Self::with_config(PermissionConfig::default())
    }

    /// Create a manager that stores its files in `dir`
    pub fn with_storage_dir(dir: impl AsRef<Path>) -> Self {
        Self::with_config(PermissionConfig::new().with_storage_dir(dir.as_ref()))
    }

    /// Create a manager from a configuration, loading persisted state
    ///
    /// Unreadable or corrupt files are logged and treated as empty.
    pub fn with_config(config: PermissionConfig) -> Self {
        let storage = PermissionStorage::with_dir(&config.storage_dir);
        let state = if config.persist {
            load_state(&storage)
        } else {
            PermissionState::default()
        };

        tracing::info!(
            "Permission manager ready: {} rules, {} approvals ({})",
            state.rules.len(),
            state.approvals.len(),
            storage.base_dir().display()
        );

        Self::assemble(config, storage, state)
    }

    /// Create a manager from exported state instead of the files on disk
    ///
    /// The imported state is written to the configured storage.
    pub fn from_state(config: PermissionConfig, state: PermissionState) -> Self {
        let storage = PermissionStorage::with_dir(&config.storage_dir);
        let manager = Self::assemble(config, storage, PermissionState::default());
        manager.import_state(state);
        manager
    }

    fn assemble(config: PermissionConfig, storage: PermissionStorage, state: PermissionState) -> Self {
        let doom_loop = DoomLoopDetector::with_config(config.doom_loop.clone());
        Self {
            config,
            storage,
            state: Mutex::new(state),
            approval_source: None,
            doom_loop,
        }
    }

    /// Set where unresolved asks are escalated
    pub fn with_approval_source<S: ApprovalSource + 'static>(mut self, source: S) -> Self {
        self.approval_source = Some(Arc::new(source));
        self
    }

    /// Replace the approval source
    pub fn set_approval_source(&mut self, source: Option<ArcApprovalSource>) {
        self.approval_source = source;
    }

    /// Whether an approval source is configured
    pub fn has_approval_source(&self) -> bool {
        self.approval_source.is_some()
    }

    // --- Rules ---

    /// Add a rule and return its id
    ///
    /// The rule list is re-sorted by descending priority (stable) and written
    /// to disk.
    pub fn add_rule(&self, rule: PermissionRule) -> String {
        let id = rule.id().to_string();
        tracing::info!(
            "Adding permission rule {}: {} -> {} (priority {})",
            id,
            rule.pattern(),
            rule.action(),
            rule.priority()
        );

        let mut state = lock(&self.state);
        state.rules.push(rule);
        state.sort_rules();
        self.persist_rules(&state);

        id
    }

    /// Remove a rule by id; returns whether it existed
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut state = lock(&self.state);
        let before = state.rules.len();
        state.rules.retain(|r| r.id() != id);
        let removed = state.rules.len() != before;

        if removed {
            tracing::info!("Removed permission rule {}", id);
            self.persist_rules(&state);
        }
        removed
    }

    /// Copy of the rules, optionally limited to those in scope for an agent
    pub fn get_rules(&self, agent_name: Option<&str>) -> Vec<PermissionRule> {
        let agent_name = agent_name.filter(|a| !a.is_empty());
        let state = lock(&self.state);
        state
            .rules
            .iter()
            .filter(|r| agent_name.map_or(true, |agent| r.applies_to(Some(agent))))
            .cloned()
            .collect()
    }

    /// Remove every rule
    pub fn clear_rules(&self) {
        let mut state = lock(&self.state);
        tracing::info!("Clearing {} permission rules", state.rules.len());
        state.rules.clear();
        self.persist_rules(&state);
    }

    // --- Decisions ---

    /// Decide whether the target may run
    ///
    /// `agent_name` falls back to the configured default agent for rule
    /// scoping.
    pub fn check(&self, target: &str, agent_name: Option<&str>) -> PermissionResult {
        let agent_name = agent_name.filter(|a| !a.is_empty());
        let effective_agent = agent_name.or(self.config.default_agent.as_deref());

        let state = lock(&self.state);

        if let Some(approval) = state
            .approvals
            .iter()
            .find(|a| a.matches(target, agent_name))
        {
            let (action, verdict) = if approval.approved {
                (PermissionAction::Allow, "approved")
            } else {
                (PermissionAction::Deny, "denied")
            };
            tracing::debug!("{} -> {} by approval {}", target, action, approval.id);
            return PermissionResult::new(
                action,
                target,
                format!("Persistent approval: {}", verdict),
            );
        }

        if let Some(rule) = state
            .rules
            .iter()
            .find(|r| r.applies_to(effective_agent) && r.matches(target))
        {
            tracing::debug!("{} -> {} by rule {}", target, rule.action(), rule.id());
            return PermissionResult::from_rule(rule, target);
        }

        tracing::debug!("{} -> ask (no matching rule)", target);
        PermissionResult::new(PermissionAction::Ask, target, NO_MATCH_REASON)
    }

    /// Check, and escalate unresolved asks to the approval source
    ///
    /// The answer is remembered as a once-scoped approval. The source is
    /// called without holding the manager lock but blocks the calling thread
    /// until it answers. Without a source the unresolved ask is returned.
    pub fn check_and_approve(&self, target: &str, agent_name: Option<&str>) -> PermissionResult {
        let mut result = self.check(target, agent_name);
        if !result.needs_approval() {
            return result;
        }

        let Some(source) = self.approval_source.as_ref() else {
            return result;
        };

        let approved = source.ask(target, &result.reason);
        self.approve(target, approved, ApprovalScope::Once, agent_name);
        result.approved = Some(approved);
        result
    }

    // --- Approvals ---

    /// Remember a human decision for the target
    ///
    /// Session and always scoped decisions are written to disk immediately;
    /// once scoped decisions stay in memory.
    pub fn approve(
        &self,
        target: &str,
        approved: bool,
        scope: ApprovalScope,
        agent_name: Option<&str>,
    ) -> PersistentApproval {
        self.record_approval(new_approval(target, approved, scope, agent_name))
    }

    /// Remember a human decision that stops applying at `expires_at`
    pub fn approve_with_expiry(
        &self,
        target: &str,
        approved: bool,
        scope: ApprovalScope,
        agent_name: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> PersistentApproval {
        let approval = new_approval(target, approved, scope, agent_name).with_expiry(expires_at);
        self.record_approval(approval)
    }

    fn record_approval(&self, approval: PersistentApproval) -> PersistentApproval {
        tracing::info!(
            "Recording {} approval for {}: {}",
            approval.scope,
            approval.pattern,
            if approval.approved { "approved" } else { "denied" }
        );

        let mut state = lock(&self.state);
        state.approvals.push(approval.clone());
        if approval.is_persistent() {
            self.persist_approvals(&state);
        }

        approval
    }

    /// Copy of the valid approvals, optionally limited to one agent
    pub fn get_approvals(&self, agent_name: Option<&str>) -> Vec<PersistentApproval> {
        let agent_name = agent_name.filter(|a| !a.is_empty());
        let state = lock(&self.state);
        state
            .approvals
            .iter()
            .filter(|a| a.is_valid())
            .filter(|a| match (a.agent_name.as_deref(), agent_name) {
                (Some(own), Some(caller)) if !own.is_empty() => own == caller,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Forget approvals, all of them or those with one scope
    ///
    /// Returns how many were removed.
    pub fn clear_approvals(&self, scope: Option<ApprovalScope>) -> usize {
        let mut state = lock(&self.state);
        let before = state.approvals.len();
        match scope {
            Some(scope) => state.approvals.retain(|a| a.scope != scope),
            None => state.approvals.clear(),
        }
        let removed = before - state.approvals.len();

        tracing::info!("Cleared {} approvals", removed);
        self.persist_approvals(&state);
        removed
    }

    /// Drop expired approvals from memory and disk
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut state = lock(&self.state);
        let before = state.approvals.len();
        state.approvals.retain(|a| a.is_valid_at(now));
        let removed = before - state.approvals.len();

        if removed > 0 {
            tracing::info!("Pruned {} expired approvals", removed);
            self.persist_approvals(&state);
        }
        removed
    }

    // --- Doom loop ---

    /// Check a tool call for repetition and record it if it is not a loop
    pub fn check_doom_loop(&self, tool_name: &str, arguments: Option<&Value>) -> DoomLoopResult {
        self.doom_loop.record_and_check(tool_name, arguments)
    }

    /// The owned doom loop detector
    pub fn doom_loop(&self) -> &DoomLoopDetector {
        &self.doom_loop
    }

    // --- State ---

    /// Re-read rules and approvals from disk, replacing the in-memory state
    ///
    /// Once scoped approvals are lost. Does nothing for in-memory managers.
    pub fn reload(&self) {
        if !self.config.persist {
            return;
        }

        let loaded = load_state(&self.storage);
        let mut state = lock(&self.state);
        tracing::info!(
            "Reloaded {} rules and {} approvals",
            loaded.rules.len(),
            loaded.approvals.len()
        );
        *state = loaded;
    }

    /// Snapshot of the rules and valid approvals
    pub fn export_state(&self) -> PermissionState {
        let now = Utc::now();
        let state = lock(&self.state);
        PermissionState {
            rules: state.rules.clone(),
            approvals: state
                .approvals
                .iter()
                .filter(|a| a.is_valid_at(now))
                .cloned()
                .collect(),
        }
    }

    /// Replace the rules and approvals with an exported snapshot
    pub fn import_state(&self, mut imported: PermissionState) {
        let now = Utc::now();
        imported.sort_rules();
        imported.approvals.retain(|a| a.is_valid_at(now));

        let mut state = lock(&self.state);
        *state = imported;
        tracing::info!(
            "Imported {} rules and {} approvals",
            state.rules.len(),
            state.approvals.len()
        );
        self.persist_rules(&state);
        self.persist_approvals(&state);
    }

    // --- Accessors ---

    pub fn config(&self) -> &PermissionConfig {
        &self.config
    }

    /// Session posture; reported only, never applied to decisions
    pub fn mode(&self) -> PermissionMode {
        self.config.mode
    }

    pub fn default_agent(&self) -> Option<&str> {
        self.config.default_agent.as_deref()
    }

    pub fn storage_dir(&self) -> &Path {
        self.storage.base_dir()
    }

    // --- Persistence ---

    fn persist_rules(&self, state: &PermissionState) {
        if !self.config.persist {
            return;
        }
        if let Err(e) = self.storage.save_rules(&state.rules) {
            tracing::error!(
                "Failed to save permission rules to {}: {}",
                self.storage.rules_path().display(),
                e
            );
        }
    }

    fn persist_approvals(&self, state: &PermissionState) {
        if !self.config.persist {
            return;
        }
        if let Err(e) = self.storage.save_approvals(&state.approvals) {
            tracing::error!(
                "Failed to save approvals to {}: {}",
                self.storage.approvals_path().display(),
                e
            );
        }
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("PermissionManager")
            .field("storage_dir", &self.storage.base_dir())
            .field("rules", &state.rules.len())
            .field("approvals", &state.approvals.len())
            .field("has_approval_source", &self.approval_source.is_some())
            .finish()
    }
}

fn new_approval(
    target: &str,
    approved: bool,
    scope: ApprovalScope,
    agent_name: Option<&str>,
) -> PersistentApproval {
    let approval = PersistentApproval::new(target, approved, scope);
    match agent_name.filter(|a| !a.is_empty()) {
        Some(agent) => approval.with_agent(agent),
        None => approval,
    }
}

fn load_state(storage: &PermissionStorage) -> PermissionState {
    let rules = storage.load_rules().unwrap_or_else(|e| {
        tracing::warn!(
            "Could not load permission rules from {}: {}; starting with none",
            storage.rules_path().display(),
            e
        );
        Vec::new()
    });

    let approvals = storage.load_approvals().unwrap_or_else(|e| {
        tracing::warn!(
            "Could not load approvals from {}: {}; starting with none",
            storage.approvals_path().display(),
            e
        );
        Vec::new()
    });

    let mut state = PermissionState { rules, approvals };
    state.sort_rules();
    state
}
