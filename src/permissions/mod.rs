//! Permission system for agent actions
//!
//! Decides whether an action target (a string such as `bash:rm -rf /tmp` or
//! `write:/etc/hosts`) may run:
//! - **Approvals**: remembered human decisions, consulted first
//! - **Rules**: prioritized glob or regex patterns mapping targets to allow/deny/ask
//! - **Ask**: the fallback when nothing matches
//!
//! Rules and session/always approvals are mirrored to JSON files so they
//! survive restarts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_governance::permissions::{ApprovalScope, PermissionManager, PermissionRule};
//!
//! let manager = PermissionManager::with_storage_dir("/tmp/permissions");
//! manager.add_rule(PermissionRule::allow("bash:*"));
//! manager.add_rule(PermissionRule::ask("bash:rm *").with_priority(10));
//!
//! let result = manager.check("bash:rm -rf /tmp", None);
//! if result.needs_approval() {
//!     let approved = prompt_user(&result.reason);
//!     manager.approve("bash:rm -rf /tmp", approved, ApprovalScope::Session, None);
//! }
//! ```

mod approval;
mod config;
mod manager;
mod pattern;
mod rule;
mod source;
mod storage;
mod types;

pub use approval::PersistentApproval;
pub use config::PermissionConfig;
pub use manager::{PermissionManager, PermissionState, NO_MATCH_REASON};
pub use pattern::{glob_match, regex_prefix_match};
pub use rule::PermissionRule;
pub use source::{ApprovalSource, ArcApprovalSource};
pub use storage::{default_storage_dir, PermissionStorage};
pub use types::{ApprovalScope, PermissionAction, PermissionMode, PermissionResult};
