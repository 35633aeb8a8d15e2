//! Remembered human decisions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pattern::glob_match;
use super::types::ApprovalScope;

/// A human decision recorded for a target pattern
///
/// Approvals only support glob patterns. Session and always scoped
/// approvals are mirrored to `approvals.json`; once scoped approvals live
/// in memory for the rest of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentApproval {
    #[serde(default = "generate_id")]
    pub id: String,

    pub pattern: String,

    pub approved: bool,

    #[serde(default)]
    pub scope: ApprovalScope,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// No longer consulted once this has passed
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Applies to every agent when absent or empty
    #[serde(default)]
    pub agent_name: Option<String>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl PersistentApproval {
    /// Record a decision for a pattern
    pub fn new(pattern: impl Into<String>, approved: bool, scope: ApprovalScope) -> Self {
        Self {
            id: generate_id(),
            pattern: pattern.into(),
            approved,
            scope,
            created_at: Utc::now(),
            expires_at: None,
            agent_name: None,
        }
    }

    /// Restrict the decision to one agent
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    /// Set an absolute expiry time
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expire after the given duration from now
    pub fn expires_in(self, ttl: Duration) -> Self {
        self.with_expiry(Utc::now() + ttl)
    }

    /// False once the expiry time has passed
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Validity at a given instant
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }

    /// Whether this approval is mirrored to disk
    pub fn is_persistent(&self) -> bool {
        self.scope.is_persistent()
    }

    /// Check whether this decision covers the target for the given agent
    ///
    /// An agent-scoped approval is skipped only when the caller names a
    /// different agent; anonymous callers are still covered.
    pub fn matches(&self, target: &str, agent_name: Option<&str>) -> bool {
        if !self.is_valid() {
            return false;
        }

        let own = self.agent_name.as_deref().filter(|a| !a.is_empty());
        let caller = agent_name.filter(|a| !a.is_empty());
        if let (Some(own), Some(caller)) = (own, caller) {
            if own != caller {
                return false;
            }
        }

        glob_match(&self.pattern, target)
    }
}
