//! Doom loop detector
//!
//! Three independent signals, checked in this order:
//! 1. the same tool called with the same arguments `loop_threshold` times
//!    inside the window, counting the call being checked
//! 2. `max_tool_calls` calls of any kind inside the window
//! 3. a single tool called `max_tool_calls / 2` times since the detector was
//!    created
//!
//! The third counter is not window-bounded: it keeps flagging a tool that
//! has been overused this session even after the window has rolled past
//! the burst.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::clock::{Clock, SystemClock};
use super::types::{DoomLoopConfig, DoomLoopResult, DoomLoopStats, ToolCallRecord};
use crate::core::sync::lock;

/// Hash used for arguments that cannot be serialized
pub const UNHASHABLE: &str = "unhashable";

/// Mutable state, guarded by one lock so check-then-record is atomic
#[derive(Debug, Default)]
struct DetectorState {
    /// Calls inside the window, oldest first
    records: VecDeque<ToolCallRecord>,
    /// Calls per tool since creation or the last reset
    tool_counts: HashMap<String, usize>,
}

impl DetectorState {
    fn evict_before(&mut self, cutoff: DateTime<Utc>) {
        self.records.retain(|r| r.timestamp >= cutoff);
    }

    fn identical_count(&self, tool_name: &str, arguments_hash: &str) -> usize {
        self.records
            .iter()
            .filter(|r| r.tool_name == tool_name && r.arguments_hash == arguments_hash)
            .count()
    }

    fn push(&mut self, record: ToolCallRecord) {
        *self.tool_counts.entry(record.tool_name.clone()).or_insert(0) += 1;
        self.records.push_back(record);
    }

    fn evaluate(
        &self,
        config: &DoomLoopConfig,
        tool_name: &str,
        arguments_hash: &str,
    ) -> DoomLoopResult {
        // the call under evaluation counts as one of the repeats
        let identical = self.identical_count(tool_name, arguments_hash) + 1;
        if identical >= config.loop_threshold {
            return DoomLoopResult::detected(
                tool_name,
                identical,
                format!(
                    "Tool '{}' called {} times with same arguments",
                    tool_name, identical
                ),
                "Stop repeating this call; change the arguments or try a different approach",
            );
        }

        let total = self.records.len();
        if total >= config.max_tool_calls {
            return DoomLoopResult::detected(
                tool_name,
                total,
                format!("Excessive tool calls ({}) in time window", total),
                "Pause and reassess the plan before making more tool calls",
            );
        }

        let cumulative = self.tool_counts.get(tool_name).copied().unwrap_or(0);
        if cumulative >= config.per_tool_limit() {
            return DoomLoopResult::detected(
                tool_name,
                cumulative,
                format!("Tool '{}' called excessively ({} times)", tool_name, cumulative),
                "Consider a different tool or ask the user for guidance",
            );
        }

        DoomLoopResult::clear(tool_name, identical)
    }
}

/// Detects agents that are stuck repeating themselves
///
/// Safe to share between threads; every operation takes one internal lock.
pub struct DoomLoopDetector {
    config: DoomLoopConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<DetectorState>,
}

impl DoomLoopDetector {
    /// Create a detector with default thresholds
    pub fn new() -> Self {
        Self::with_config(DoomLoopConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(config: DoomLoopConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a detector that reads time from the given clock
    pub fn with_clock(config: DoomLoopConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(DetectorState::default()),
        }
    }

    pub fn config(&self) -> &DoomLoopConfig {
        &self.config
    }

    /// Record a call without checking it
    pub fn record(&self, tool_name: &str, arguments: Option<&Value>) -> ToolCallRecord {
        let now = self.clock.now();
        let record = self.new_record(tool_name, arguments, now);

        let mut state = lock(&self.state);
        state.evict_before(self.cutoff(now));
        state.push(record.clone());

        record
    }

    /// Check a call against the signals without recording it
    ///
    /// The identical-repeat count includes the call being checked, so after
    /// two recorded calls a third identical one reports "called 3 times".
    pub fn check(&self, tool_name: &str, arguments: Option<&Value>) -> DoomLoopResult {
        let now = self.clock.now();
        let arguments_hash = Self::hash_arguments(arguments);

        let mut state = lock(&self.state);
        state.evict_before(self.cutoff(now));
        state.evaluate(&self.config, tool_name, &arguments_hash)
    }

    /// Check a call and record it only if it is not a loop
    ///
    /// Calls flagged as a loop are not recorded, so a stuck agent cannot
    /// keep inflating the counters; the key clears once the window rolls
    /// past the recorded calls or the detector is reset.
    pub fn record_and_check(&self, tool_name: &str, arguments: Option<&Value>) -> DoomLoopResult {
        let now = self.clock.now();
        let record = self.new_record(tool_name, arguments, now);

        let mut state = lock(&self.state);
        state.evict_before(self.cutoff(now));
        let result = state.evaluate(&self.config, tool_name, &record.arguments_hash);

        if result.is_loop {
            tracing::warn!("Doom loop detected for '{}': {}", tool_name, result.reason);
        } else {
            state.push(record);
        }

        result
    }

    /// Current counters
    pub fn get_stats(&self) -> DoomLoopStats {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.evict_before(self.cutoff(now));

        let unique_tools: HashSet<&str> =
            state.records.iter().map(|r| r.tool_name.as_str()).collect();

        DoomLoopStats {
            calls_in_window: state.records.len(),
            unique_tools_in_window: unique_tools.len(),
            tool_counts: state.tool_counts.clone(),
            loop_threshold: self.config.loop_threshold,
            window_seconds: self.config.window_seconds,
            max_tool_calls: self.config.max_tool_calls,
        }
    }

    /// Records currently inside the window, oldest first
    pub fn records(&self) -> Vec<ToolCallRecord> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        state.evict_before(self.cutoff(now));
        state.records.iter().cloned().collect()
    }

    /// Forget every record and counter
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.records.clear();
        state.tool_counts.clear();
    }

    /// Forget the records and counter of one tool
    pub fn reset_tool(&self, tool_name: &str) {
        let mut state = lock(&self.state);
        state.records.retain(|r| r.tool_name != tool_name);
        state.tool_counts.remove(tool_name);
    }

    /// Stable hash of a set of arguments
    ///
    /// Object keys are sorted before hashing, so argument sets that differ
    /// only in key order hash the same. `None` hashes like an empty object.
    /// Arguments that fail to serialize hash to [`UNHASHABLE`].
    pub fn hash_arguments<T: Serialize + ?Sized>(arguments: Option<&T>) -> String {
        let value = match arguments {
            Some(arguments) => match serde_json::to_value(arguments) {
                Ok(value) => value,
                Err(e) => {
                    tracing::debug!("Tool arguments are not serializable: {}", e);
                    return UNHASHABLE.to_string();
                }
            },
            None => Value::Object(serde_json::Map::new()),
        };

        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }

    fn new_record(
        &self,
        tool_name: &str,
        arguments: Option<&Value>,
        now: DateTime<Utc>,
    ) -> ToolCallRecord {
        ToolCallRecord {
            tool_name: tool_name.to_string(),
            arguments_hash: Self::hash_arguments(arguments),
            timestamp: now,
            session_id: self.config.session_id.clone(),
        }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let window = i64::try_from(self.config.window_seconds).unwrap_or(i64::MAX);
        Duration::try_seconds(window)
            .and_then(|w| now.checked_sub_signed(w))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for DoomLoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DoomLoopDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoomLoopDetector")
            .field("config", &self.config)
            .field("state", &*lock(&self.state))
            .finish()
    }
}

/// JSON with object keys in sorted order
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::from(key.as_str()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doom_loop::ManualClock;
    use serde_json::json;

    fn detector_with_clock(config: DoomLoopConfig) -> (DoomLoopDetector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let detector = DoomLoopDetector::with_clock(config, clock.clone());
        (detector, clock)
    }

    #[test]
    fn test_threshold_call_is_flagged_and_not_recorded() {
        let detector = DoomLoopDetector::new();
        let args = json!({"a": 1});

        let first = detector.record_and_check("x", Some(&args));
        let second = detector.record_and_check("x", Some(&args));
        assert!(!first.is_loop);
        assert!(!second.is_loop);
        assert_eq!(first.loop_count, 1);
        assert_eq!(second.loop_count, 2);

        let third = detector.record_and_check("x", Some(&args));
        assert!(third.is_loop);
        assert_eq!(third.loop_count, 3);
        assert_eq!(third.reason, "Tool 'x' called 3 times with same arguments");
        assert_eq!(detector.records().len(), 2);

        // further attempts never grow the buffer
        for _ in 0..5 {
            assert!(detector.record_and_check("x", Some(&args)).is_loop);
        }
        assert_eq!(detector.records().len(), 2);
    }

    #[test]
    fn test_window_eviction_clears_loop() {
        let (detector, clock) = detector_with_clock(DoomLoopConfig::default());
        let args = json!({"path": "/tmp/a"});

        detector.record_and_check("read", Some(&args));
        detector.record_and_check("read", Some(&args));
        assert!(detector.record_and_check("read", Some(&args)).is_loop);

        clock.advance(Duration::seconds(61));

        let result = detector.record_and_check("read", Some(&args));
        assert!(!result.is_loop);
        assert_eq!(result.loop_count, 1);
        assert_eq!(detector.records().len(), 1);
    }

    #[test]
    fn test_records_inside_window_are_kept() {
        let (detector, clock) = detector_with_clock(DoomLoopConfig::default());

        detector.record("read", None);
        clock.advance(Duration::seconds(30));
        detector.record("read", None);
        clock.advance(Duration::seconds(31));

        // the first record is now 61s old, the second 31s
        assert_eq!(detector.records().len(), 1);
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let detector = DoomLoopDetector::new();

        detector.record_and_check("x", Some(&json!({"a": 1, "b": 2})));
        detector.record_and_check("x", Some(&json!({"b": 2, "a": 1})));
        let third = detector.record_and_check("x", Some(&json!({"a": 1, "b": 2})));

        assert!(third.is_loop);
        assert_eq!(
            DoomLoopDetector::hash_arguments(Some(&json!({"a": {"y": 1, "x": [1, 2]}, "b": 2}))),
            DoomLoopDetector::hash_arguments(Some(&json!({"b": 2, "a": {"x": [1, 2], "y": 1}})))
        );
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            DoomLoopDetector::hash_arguments(Some(&json!([1, 2]))),
            DoomLoopDetector::hash_arguments(Some(&json!([2, 1])))
        );
    }

    #[test]
    fn test_different_arguments_are_not_a_loop() {
        let detector = DoomLoopDetector::new();

        for i in 0..10 {
            let args = json!({"file": format!("test{}.txt", i)});
            assert!(!detector.record_and_check("read", Some(&args)).is_loop);
        }
    }

    #[test]
    fn test_same_arguments_different_tools_are_not_identical() {
        let detector = DoomLoopDetector::new();
        let args = json!({"path": "a"});

        for tool in ["read", "write", "edit", "grep"] {
            assert!(!detector.record_and_check(tool, Some(&args)).is_loop);
        }
    }

    #[test]
    fn test_missing_arguments_hash_like_empty_object() {
        assert_eq!(
            DoomLoopDetector::hash_arguments::<Value>(None),
            DoomLoopDetector::hash_arguments(Some(&json!({})))
        );
    }

    #[test]
    fn test_unserializable_arguments_use_sentinel() {
        let mut args: HashMap<Vec<u8>, u32> = HashMap::new();
        args.insert(vec![1, 2], 3);

        assert_eq!(DoomLoopDetector::hash_arguments(Some(&args)), UNHASHABLE);
    }

    #[test]
    fn test_excessive_total_calls_in_window() {
        let config = DoomLoopConfig::default()
            .with_loop_threshold(10)
            .with_max_tool_calls(4);
        let detector = DoomLoopDetector::with_config(config);

        for tool in ["a", "b", "c", "d"] {
            assert!(!detector.record_and_check(tool, None).is_loop);
        }

        let result = detector.record_and_check("e", None);
        assert!(result.is_loop);
        assert_eq!(result.loop_count, 4);
        assert_eq!(result.reason, "Excessive tool calls (4) in time window");
    }

    #[test]
    fn test_identical_signal_wins_over_volume() {
        let config = DoomLoopConfig::default()
            .with_loop_threshold(2)
            .with_max_tool_calls(2);
        let detector = DoomLoopDetector::with_config(config);

        detector.record("x", None);
        detector.record("x", None);

        let result = detector.check("x", None);
        assert_eq!(result.reason, "Tool 'x' called 3 times with same arguments");
    }

    #[test]
    fn test_per_tool_counter_is_lifetime_cumulative() {
        let config = DoomLoopConfig::default()
            .with_loop_threshold(10)
            .with_max_tool_calls(6);
        let (detector, clock) = detector_with_clock(config);

        for i in 0..3 {
            let args = json!({ "i": i });
            assert!(!detector.record_and_check("read", Some(&args)).is_loop);
        }

        let result = detector.check("read", Some(&json!({ "i": 99 })));
        assert!(result.is_loop);
        assert_eq!(result.reason, "Tool 'read' called excessively (3 times)");

        // the window rolling forward does not clear this signal
        clock.advance(Duration::seconds(600));
        assert!(detector.records().is_empty());
        let result = detector.check("read", Some(&json!({ "i": 100 })));
        assert!(result.is_loop);
        assert_eq!(result.loop_count, 3);

        // other tools are unaffected
        assert!(!detector.check("write", None).is_loop);
    }

    #[test]
    fn test_check_does_not_record() {
        let detector = DoomLoopDetector::new();

        for _ in 0..5 {
            assert!(!detector.check("x", None).is_loop);
        }
        assert!(detector.records().is_empty());
        assert!(detector.get_stats().tool_counts.is_empty());
    }

    #[test]
    fn test_check_counts_the_call_being_checked() {
        let detector = DoomLoopDetector::new();
        let args = json!({"path": "src/lib.rs"});

        detector.record("read", Some(&args));
        detector.record("read", Some(&args));

        let result = detector.check("read", Some(&args));
        assert!(result.is_loop);
        assert_eq!(result.loop_count, 3);
        assert_eq!(result.reason, "Tool 'read' called 3 times with same arguments");
        assert_eq!(detector.records().len(), 2);
    }

    #[test]
    fn test_record_stamps_session() {
        let config = DoomLoopConfig::default().with_session_id("session-1");
        let detector = DoomLoopDetector::with_config(config);

        let record = detector.record("bash", Some(&json!({"command": "ls"})));
        assert_eq!(record.session_id.as_deref(), Some("session-1"));
        assert_eq!(record.tool_name, "bash");
        assert_eq!(record.arguments_hash.len(), 64);
    }

    #[test]
    fn test_stats() {
        let (detector, clock) = detector_with_clock(DoomLoopConfig::default());

        detector.record("read", None);
        detector.record("read", Some(&json!({"a": 1})));
        detector.record("write", None);

        let stats = detector.get_stats();
        assert_eq!(stats.calls_in_window, 3);
        assert_eq!(stats.unique_tools_in_window, 2);
        assert_eq!(stats.tool_counts.get("read"), Some(&2));
        assert_eq!(stats.loop_threshold, 3);

        clock.advance(Duration::seconds(120));
        let stats = detector.get_stats();
        assert_eq!(stats.calls_in_window, 0);
        assert_eq!(stats.tool_counts.get("read"), Some(&2));
    }

    #[test]
    fn test_reset() {
        let detector = DoomLoopDetector::new();
        let args = json!({"a": 1});

        detector.record("x", Some(&args));
        detector.record("x", Some(&args));
        detector.record("x", Some(&args));
        assert!(detector.check("x", Some(&args)).is_loop);

        detector.reset();
        assert!(!detector.check("x", Some(&args)).is_loop);
        assert_eq!(detector.get_stats().calls_in_window, 0);
    }

    #[test]
    fn test_reset_tool() {
        let detector = DoomLoopDetector::new();

        for _ in 0..3 {
            detector.record("x", None);
            detector.record("y", None);
        }
        assert!(detector.check("x", None).is_loop);

        detector.reset_tool("x");
        assert!(!detector.check("x", None).is_loop);
        assert!(detector.check("y", None).is_loop);

        let stats = detector.get_stats();
        assert_eq!(stats.calls_in_window, 3);
        assert!(!stats.tool_counts.contains_key("x"));
    }

    #[test]
    fn test_concurrent_record_and_check_respects_threshold() {
        let detector = Arc::new(DoomLoopDetector::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let detector = detector.clone();
            handles.push(std::thread::spawn(move || {
                let args = json!({"command": "make"});
                for _ in 0..10 {
                    detector.record_and_check("bash", Some(&args));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(detector.records().len(), 2);
        assert_eq!(detector.get_stats().tool_counts.get("bash"), Some(&2));
    }
}
