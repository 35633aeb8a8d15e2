//! Doom loop detection types

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Thresholds for doom loop detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoomLoopConfig {
    /// Identical calls (same tool, same arguments) inside the window that count as a loop
    pub loop_threshold: usize,
    /// Length of the sliding window in seconds
    pub window_seconds: u64,
    /// Ceiling on total calls inside the window
    /// Half of this is also the lifetime ceiling for any single tool.
    pub max_tool_calls: usize,
    /// Session stamped on every recorded call
    pub session_id: Option<String>,
}

impl DoomLoopConfig {
    pub fn with_loop_threshold(mut self, loop_threshold: usize) -> Self {
        self.loop_threshold = loop_threshold;
        self
    }

    pub fn with_window_seconds(mut self, window_seconds: u64) -> Self {
        self.window_seconds = window_seconds;
        self
    }

    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = max_tool_calls;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Lifetime ceiling on calls to a single tool
    pub fn per_tool_limit(&self) -> usize {
        self.max_tool_calls / 2
    }
}

impl Default for DoomLoopConfig {
    fn default() -> Self {
        Self {
            loop_threshold: 3,
            window_seconds: 60,
            max_tool_calls: 50,
            session_id: None,
        }
    }
}

/// One recorded tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    /// Hash of the canonicalized arguments
    pub arguments_hash: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<String>,
}

/// Outcome of a doom loop check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoomLoopResult {
    pub is_loop: bool,
    pub reason: String,
    /// Count behind the signal that fired; the identical-call count otherwise
    pub loop_count: usize,
    pub tool_name: String,
    /// Suggested corrective action, empty when no loop was found
    pub recommendation: String,
}

impl DoomLoopResult {
    /// No loop; carries the identical-call count for observability
    pub fn clear(tool_name: impl Into<String>, identical_count: usize) -> Self {
        Self {
            is_loop: false,
            reason: String::new(),
            loop_count: identical_count,
            tool_name: tool_name.into(),
            recommendation: String::new(),
        }
    }

    /// A detected loop
    pub fn detected(
        tool_name: impl Into<String>,
        loop_count: usize,
        reason: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            is_loop: true,
            reason: reason.into(),
            loop_count,
            tool_name: tool_name.into(),
            recommendation: recommendation.into(),
        }
    }

    /// Message suitable for showing to a user or feeding back to the model
    pub fn message(&self) -> Option<String> {
        if !self.is_loop {
            return None;
        }
        Some(format!("{}. {}", self.reason, self.recommendation))
    }
}

/// Snapshot of the detector's counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoomLoopStats {
    /// Records currently inside the window
    pub calls_in_window: usize,
    /// Distinct tool names inside the window
    pub unique_tools_in_window: usize,
    /// Cumulative calls per tool since creation or the last reset
    pub tool_counts: HashMap<String, usize>,
    pub loop_threshold: usize,
    pub window_seconds: u64,
    pub max_tool_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DoomLoopConfig::default();
        assert_eq!(config.loop_threshold, 3);
        assert_eq!(config.window_seconds, 60);
        assert_eq!(config.max_tool_calls, 50);
        assert_eq!(config.per_tool_limit(), 25);
    }

    #[test]
    fn test_per_tool_limit_rounds_down() {
        let config = DoomLoopConfig::default().with_max_tool_calls(7);
        assert_eq!(config.per_tool_limit(), 3);
    }

    #[test]
    fn test_result_message() {
        let clear = DoomLoopResult::clear("read", 1);
        assert!(clear.message().is_none());
        assert_eq!(clear.loop_count, 1);

        let detected = DoomLoopResult::detected(
            "read",
            3,
            "Tool 'read' called 3 times with same arguments",
            "Try something else",
        );
        assert_eq!(
            detected.message().unwrap(),
            "Tool 'read' called 3 times with same arguments. Try something else"
        );
    }
}
