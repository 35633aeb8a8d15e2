//! Core types shared by the governance engine
//!
//! - `GovernanceError` / `GovernanceResult` - Error types
//! - lock helpers that survive poisoning

pub mod error;
pub(crate) mod sync;

pub use error::{GovernanceError, GovernanceResult};
