//! Permission rules
//!
//! A rule is a static policy statement: a pattern, the action to take when a
//! target matches it, a priority and an optional agent scope. Rules are
//! built with the `with_*` methods and are not mutated afterwards.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::{compile_glob, compile_prefix_regex, glob_match};
use super::types::PermissionAction;
use crate::core::GovernanceResult;

/// A single policy statement
///
/// Serializes to the flat record stored in `rules.json`. Fields missing from
/// older files fall back to defaults (`ask`, enabled, priority 0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    #[serde(default = "generate_id")]
    id: String,

    pattern: String,

    #[serde(default)]
    action: PermissionAction,

    #[serde(default)]
    description: String,

    #[serde(default)]
    is_regex: bool,

    /// Higher values are checked first
    #[serde(default)]
    priority: i32,

    /// Applies to every agent when absent or empty
    #[serde(default)]
    agent_name: Option<String>,

    #[serde(default = "default_enabled")]
    enabled: bool,

    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,

    /// Compiled form of a regex pattern; `None` inside when it fails to compile
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

impl PermissionRule {
    /// Create an enabled glob rule with priority 0
    pub fn new(pattern: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            id: generate_id(),
            pattern: pattern.into(),
            action,
            description: String::new(),
            is_regex: false,
            priority: 0,
            agent_name: None,
            enabled: true,
            created_at: Utc::now(),
            compiled: OnceLock::new(),
        }
    }

    /// Create a rule that allows matching targets
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self::new(pattern, PermissionAction::Allow)
    }

    /// Create a rule that denies matching targets
    pub fn deny(pattern: impl Into<String>) -> Self {
        Self::new(pattern, PermissionAction::Deny)
    }

    /// Create a rule that escalates matching targets to a human
    pub fn ask(pattern: impl Into<String>) -> Self {
        Self::new(pattern, PermissionAction::Ask)
    }

    /// Create a rule whose pattern is a start-anchored regex
    pub fn regex(pattern: impl Into<String>, action: PermissionAction) -> Self {
        Self {
            is_regex: true,
            ..Self::new(pattern, action)
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Restrict the rule to one agent
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    /// Set the description, used as the decision reason
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Enable or disable the rule
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Disable the rule
    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn action(&self) -> PermissionAction {
        self.action
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_regex(&self) -> bool {
        self.is_regex
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn agent_name(&self) -> Option<&str> {
        self.agent_name.as_deref().filter(|name| !name.is_empty())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check whether the target matches this rule
    ///
    /// Disabled rules never match. A regex that fails to compile never
    /// matches either; that failure is logged once per rule.
    pub fn matches(&self, target: &str) -> bool {
        if !self.enabled {
            return false;
        }

        if self.is_regex {
            self.compiled_regex()
                .map(|re| re.is_match(target))
                .unwrap_or(false)
        } else {
            glob_match(&self.pattern, target)
        }
    }

    /// Whether the rule is in scope for the given agent
    ///
    /// Unscoped rules apply to everyone; scoped rules only to their agent.
    pub fn applies_to(&self, agent_name: Option<&str>) -> bool {
        match self.agent_name() {
            None => true,
            Some(scope) => agent_name == Some(scope),
        }
    }

    /// Check that the pattern compiles
    pub fn validate(&self) -> GovernanceResult<()> {
        if self.is_regex {
            compile_prefix_regex(&self.pattern).map(|_| ())
        } else {
            compile_glob(&self.pattern).map(|_| ())
        }
    }

    fn compiled_regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| match compile_prefix_regex(&self.pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(
                        "Permission rule {} has an invalid regex and will never match: {}",
                        self.id,
                        e
                    );
                    None
                }
            })
            .as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_glob_rule_matches() {
        let rule = PermissionRule::allow("bash:git *");

        assert!(rule.matches("bash:git status"));
        assert!(rule.matches("bash:git log --oneline"));
        assert!(!rule.matches("bash:rm -rf /"));
    }

    #[test]
    fn test_regex_rule_matches_prefix() {
        let rule = PermissionRule::regex(r"bash:(rm|mv)\s", PermissionAction::Deny);

        assert!(rule.matches("bash:rm -rf /tmp"));
        assert!(rule.matches("bash:mv a b"));
        assert!(!rule.matches("bash:echo rm x"));
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let glob = PermissionRule::allow("*").disabled();
        let regex = PermissionRule::regex(".*", PermissionAction::Allow).disabled();

        for target in ["", "bash:ls", "write:/etc/passwd"] {
            assert!(!glob.matches(target));
            assert!(!regex.matches(target));
        }
    }

    #[test]
    fn test_invalid_regex_does_not_match() {
        let rule = PermissionRule::regex("bash:(rm", PermissionAction::Deny);

        assert!(!rule.matches("bash:(rm"));
        assert!(!rule.matches("bash:rm -rf /"));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_good_patterns() {
        assert!(PermissionRule::allow("bash:*").validate().is_ok());
        assert!(PermissionRule::regex("bash:.*", PermissionAction::Allow)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_applies_to() {
        let global = PermissionRule::allow("bash:*");
        assert!(global.applies_to(None));
        assert!(global.applies_to(Some("coder")));

        let scoped = PermissionRule::allow("bash:*").with_agent("coder");
        assert!(scoped.applies_to(Some("coder")));
        assert!(!scoped.applies_to(Some("researcher")));
        assert!(!scoped.applies_to(None));

        // an empty scope is the same as no scope
        let empty = PermissionRule::allow("bash:*").with_agent("");
        assert!(empty.applies_to(Some("researcher")));
        assert_eq!(empty.agent_name(), None);
    }

    #[test]
    fn test_record_fields() {
        let rule = PermissionRule::deny("bash:rm *")
            .with_priority(10)
            .with_agent("coder")
            .with_description("No deletions");

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["pattern"], "bash:rm *");
        assert_eq!(value["action"], "deny");
        assert_eq!(value["priority"], 10);
        assert_eq!(value["agent_name"], "coder");
        assert_eq!(value["is_regex"], false);
        assert_eq!(value["enabled"], true);
        assert!(value.get("id").is_some());
        assert!(value.get("created_at").is_some());
        assert!(value.get("compiled").is_none());
    }

    #[test]
    fn test_load_with_missing_fields() {
        let rule: PermissionRule = serde_json::from_value(json!({ "pattern": "bash:*" })).unwrap();

        assert_eq!(rule.action(), PermissionAction::Ask);
        assert!(rule.is_enabled());
        assert_eq!(rule.priority(), 0);
        assert!(!rule.is_regex());
        assert!(!rule.id().is_empty());
        assert!(rule.matches("bash:ls"));
    }
}
