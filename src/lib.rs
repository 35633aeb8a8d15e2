//! Permission and safety governance for autonomous agents
//!
//! - `permissions` decides whether an agent action may run, using
//!   prioritized rules and remembered human approvals
//! - `doom_loop` flags agents stuck repeating the same tool call

pub mod core;
pub mod doom_loop;
pub mod permissions;

// Optional components
pub mod logging;

pub use crate::core::{GovernanceError, GovernanceResult};
pub use doom_loop::{DoomLoopConfig, DoomLoopDetector, DoomLoopResult};
pub use permissions::{
    ApprovalScope, PermissionAction, PermissionConfig, PermissionManager, PermissionMode,
    PermissionResult, PermissionRule, PersistentApproval,
};
