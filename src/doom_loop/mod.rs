//! Doom loop detection
//!
//! Flags agents that keep invoking the same tool with the same arguments, or
//! that make an unreasonable number of tool calls, using a sliding time
//! window over recorded invocations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agent_governance::doom_loop::{DoomLoopConfig, DoomLoopDetector};
//! use serde_json::json;
//!
//! let detector = DoomLoopDetector::with_config(DoomLoopConfig::default());
//! let args = json!({ "command": "cargo build" });
//!
//! let result = detector.record_and_check("bash", Some(&args));
//! if result.is_loop {
//!     // feed result.message() back to the model instead of running the tool
//! }
//! ```

mod clock;
mod detector;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::{DoomLoopDetector, UNHASHABLE};
pub use types::{DoomLoopConfig, DoomLoopResult, DoomLoopStats, ToolCallRecord};
