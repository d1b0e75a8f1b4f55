//! Loop detection
//!
//! Keeps a bounded ring of recent action signatures and flags repetition:
//! the same action three times in a row, or a short repeating cycle.
//! The history is deliberately not cleared after a detection; the injected
//! corrective message changes subsequent signatures instead.

use std::collections::VecDeque;

use serde_json::Value;

const HISTORY_SIZE: usize = 20;

/// Heuristic detector over recent agent actions.
#[derive(Debug, Default)]
pub struct LoopDetector {
    history: VecDeque<String>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a tool call as `tool_call|name|k1=v1|k2=v2` with sorted keys.
    pub fn record_tool_call(&mut self, name: &str, args: &Value) {
        let mut signature = format!("tool_call|{}", name);
        if let Some(object) = args.as_object() {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            for key in keys {
                signature.push_str(&format!("|{}={}", key, object[key]));
            }
        } else if !args.is_null() {
            signature.push_str(&format!("|{}", args));
        }
        self.record(signature);
    }

    /// Record a text response as `response|text`.
    pub fn record_response(&mut self, text: &str) {
        self.record(format!("response|{}", text));
    }

    fn record(&mut self, signature: String) {
        self.history.push_back(signature);
        while self.history.len() > HISTORY_SIZE {
            self.history.pop_front();
        }
    }

    /// A reason string when the recent history looks like a loop.
    pub fn check_for_loop(&self) -> Option<String> {
        let items: Vec<&String> = self.history.iter().collect();
        let len = items.len();

        if len >= 3 && items[len - 1] == items[len - 2] && items[len - 2] == items[len - 3] {
            return Some("Same action repeated 3 times".to_string());
        }

        for cycle_len in 2..=3usize {
            if len < cycle_len * 2 {
                continue;
            }
            let tail = &items[len - cycle_len..];
            let previous = &items[len - cycle_len * 2..len - cycle_len];
            if tail == previous {
                return Some(format!("Detected repeating cycle of length {}", cycle_len));
            }
        }

        None
    }

    #[cfg(test)]
    fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn triple_repeat_detected() {
        let mut detector = LoopDetector::new();
        for _ in 0..3 {
            detector.record_tool_call("grep", &json!({"pattern": "x"}));
        }
        assert_eq!(
            detector.check_for_loop().as_deref(),
            Some("Same action repeated 3 times")
        );
    }

    #[test]
    fn two_repeats_not_enough() {
        let mut detector = LoopDetector::new();
        detector.record_tool_call("grep", &json!({"pattern": "x"}));
        detector.record_tool_call("grep", &json!({"pattern": "x"}));
        assert!(detector.check_for_loop().is_none());
    }

    #[test]
    fn ababab_is_cycle_of_two() {
        let mut detector = LoopDetector::new();
        for _ in 0..3 {
            detector.record_tool_call("read_file", &json!({"path": "a"}));
            detector.record_tool_call("read_file", &json!({"path": "b"}));
        }
        assert_eq!(
            detector.check_for_loop().as_deref(),
            Some("Detected repeating cycle of length 2")
        );
    }

    #[test]
    fn abcabc_is_cycle_of_three() {
        let mut detector = LoopDetector::new();
        for _ in 0..2 {
            detector.record_tool_call("a", &json!({}));
            detector.record_tool_call("b", &json!({}));
            detector.record_tool_call("c", &json!({}));
        }
        assert_eq!(
            detector.check_for_loop().as_deref(),
            Some("Detected repeating cycle of length 3")
        );
    }

    #[test]
    fn signature_keys_are_order_insensitive() {
        let mut a = LoopDetector::new();
        a.record_tool_call("t", &json!({"b": 2, "a": 1}));
        let mut b = LoopDetector::new();
        b.record_tool_call("t", &json!({"a": 1, "b": 2}));
        assert_eq!(a.history.front(), b.history.front());
    }

    #[test]
    fn distinct_actions_do_not_trip() {
        let mut detector = LoopDetector::new();
        for i in 0..10 {
            detector.record_tool_call("read_file", &json!({ "path": format!("f{}", i) }));
        }
        assert!(detector.check_for_loop().is_none());
    }

    #[test]
    fn ring_is_bounded() {
        let mut detector = LoopDetector::new();
        for i in 0..50 {
            detector.record_response(&format!("r{}", i));
        }
        assert_eq!(detector.history_len(), HISTORY_SIZE);
    }

    #[test]
    fn responses_participate_in_detection() {
        let mut detector = LoopDetector::new();
        for _ in 0..3 {
            detector.record_response("same text");
        }
        assert!(detector.check_for_loop().is_some());
    }
}
