//! Permission value types
//!
//! - `PermissionAction` - what a rule or decision says to do
//! - `PermissionMode` - session-wide posture, read by callers
//! - `ApprovalScope` - how long a human decision is remembered
//! - `PermissionResult` - outcome of a single check

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rule::PermissionRule;
use crate::core::GovernanceError;

/// Action a rule prescribes for matching targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    /// Execute without asking
    Allow,
    /// Refuse to execute
    Deny,
    /// Escalate to a human
    #[default]
    Ask,
}

impl std::fmt::Display for PermissionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionAction::Allow => write!(f, "allow"),
            PermissionAction::Deny => write!(f, "deny"),
            PermissionAction::Ask => write!(f, "ask"),
        }
    }
}

impl FromStr for PermissionAction {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(PermissionAction::Allow),
            "deny" => Ok(PermissionAction::Deny),
            "ask" => Ok(PermissionAction::Ask),
            other => Err(GovernanceError::invalid_value(format!(
                "unknown permission action: {}",
                other
            ))),
        }
    }
}

/// Session-wide execution posture
///
/// The engine stores and reports the mode but never changes a decision
/// because of it; interpreting the mode is up to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Normal rule/approval flow
    #[default]
    Default,
    /// File edits are accepted without asking
    AcceptEdits,
    /// Never prompt; unresolved asks are treated as denials by the caller
    DontAsk,
    /// Every check is skipped by the caller
    Bypass,
    /// Planning only, nothing is executed
    Plan,
}

impl PermissionMode {
    /// Whether the caller should skip permission checks entirely
    pub fn bypasses_checks(&self) -> bool {
        matches!(self, PermissionMode::Bypass)
    }

    /// Whether the caller is allowed to prompt a human
    pub fn allows_prompts(&self) -> bool {
        !matches!(self, PermissionMode::DontAsk | PermissionMode::Bypass)
    }

    /// Whether nothing should actually be executed
    pub fn is_read_only(&self) -> bool {
        matches!(self, PermissionMode::Plan)
    }

    pub fn description(&self) -> &'static str {
        match self {
            PermissionMode::Default => "Standard rule and approval flow",
            PermissionMode::AcceptEdits => "Auto-accept file edits",
            PermissionMode::DontAsk => "Never prompt for approval",
            PermissionMode::Bypass => "Skip permission checks (dangerous)",
            PermissionMode::Plan => "Plan only, no execution",
        }
    }
}

impl std::fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionMode::Default => write!(f, "default"),
            PermissionMode::AcceptEdits => write!(f, "acceptEdits"),
            PermissionMode::DontAsk => write!(f, "dontAsk"),
            PermissionMode::Bypass => write!(f, "bypass"),
            PermissionMode::Plan => write!(f, "plan"),
        }
    }
}

impl FromStr for PermissionMode {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(PermissionMode::Default),
            "acceptedits" | "accept-edits" | "accept_edits" => Ok(PermissionMode::AcceptEdits),
            "dontask" | "dont-ask" | "dont_ask" => Ok(PermissionMode::DontAsk),
            "bypass" | "bypasspermissions" | "bypass-permissions" | "bypass_permissions" => {
                Ok(PermissionMode::Bypass)
            }
            "plan" => Ok(PermissionMode::Plan),
            other => Err(GovernanceError::invalid_value(format!(
                "unknown permission mode: {}",
                other
            ))),
        }
    }
}

/// How long a human decision is remembered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalScope {
    /// Kept in memory for the rest of the process, never written to disk
    #[default]
    Once,
    /// Written to disk, no expiry set by the engine
    Session,
    /// Written to disk, intended to be permanent
    Always,
}

impl ApprovalScope {
    /// Whether approvals with this scope are mirrored to disk
    pub fn is_persistent(&self) -> bool {
        matches!(self, ApprovalScope::Session | ApprovalScope::Always)
    }
}

impl std::fmt::Display for ApprovalScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalScope::Once => write!(f, "once"),
            ApprovalScope::Session => write!(f, "session"),
            ApprovalScope::Always => write!(f, "always"),
        }
    }
}

impl FromStr for ApprovalScope {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "once" => Ok(ApprovalScope::Once),
            "session" => Ok(ApprovalScope::Session),
            "always" => Ok(ApprovalScope::Always),
            other => Err(GovernanceError::invalid_value(format!(
                "unknown approval scope: {}",
                other
            ))),
        }
    }
}

/// Outcome of checking a target
///
/// `approved` stays `None` until a human has answered an `Ask`.
#[derive(Debug, Clone)]
pub struct PermissionResult {
    /// Action decided for the target
    pub action: PermissionAction,
    /// The rule that produced the decision, if any
    pub rule: Option<PermissionRule>,
    /// The target that was checked
    pub target: String,
    /// Human-readable reason for the decision
    pub reason: String,
    /// Human answer to an `Ask`
    pub approved: Option<bool>,
}

impl PermissionResult {
    /// Create a result that was not produced by a rule
    pub fn new(
        action: PermissionAction,
        target: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action,
            rule: None,
            target: target.into(),
            reason: reason.into(),
            approved: None,
        }
    }

    /// Create a result produced by a matching rule
    pub fn from_rule(rule: &PermissionRule, target: impl Into<String>) -> Self {
        let reason = if rule.description().is_empty() {
            format!("Matched rule: {}", rule.pattern())
        } else {
            rule.description().to_string()
        };
        Self {
            action: rule.action(),
            rule: Some(rule.clone()),
            target: target.into(),
            reason,
            approved: None,
        }
    }

    /// Allowed outright, or asked and approved
    pub fn is_allowed(&self) -> bool {
        match self.action {
            PermissionAction::Allow => true,
            PermissionAction::Ask => self.approved == Some(true),
            PermissionAction::Deny => false,
        }
    }

    /// Denied outright, or asked and refused
    pub fn is_denied(&self) -> bool {
        match self.action {
            PermissionAction::Deny => true,
            PermissionAction::Ask => self.approved == Some(false),
            PermissionAction::Allow => false,
        }
    }

    /// Asked and not yet answered
    pub fn needs_approval(&self) -> bool {
        self.action == PermissionAction::Ask && self.approved.is_none()
    }
}

impl std::fmt::Display for PermissionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.approved {
            Some(true) => " (approved)",
            Some(false) => " (rejected)",
            None => "",
        };
        write!(f, "{}{} {}: {}", self.action, state, self.target, self.reason)
    }
}
