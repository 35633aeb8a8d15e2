//! Escalation to a human
//!
//! The manager does not render prompts. It hands the target and the reason to
//! an `ApprovalSource` and records the yes/no answer.

use std::sync::Arc;

/// Something that can answer "may this target run?"
///
/// Called synchronously from `PermissionManager::check_and_approve`, so the
/// calling thread blocks for as long as the source takes to answer. Sources
/// that talk to a person should enforce their own timeout and answer `false`
/// when it elapses.
pub trait ApprovalSource: Send + Sync {
    /// Ask whether the target may proceed
    fn ask(&self, target: &str, reason: &str) -> bool;
}

/// Implement ApprovalSource for closures
impl<F> ApprovalSource for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn ask(&self, target: &str, reason: &str) -> bool {
        (self)(target, reason)
    }
}

/// Type alias for stored approval sources
pub type ArcApprovalSource = Arc<dyn ApprovalSource>;
