/// Detects when a model is stuck in a repetition loop during streaming.
/// Triggers when: pattern_length * repetitions > 100 AND repetitions >= 3.
pub struct RepetitionDetector {
    buffer: String,
    max_buffer_size: usize,
    score_threshold: usize,
    min_repetitions: usize,
}

impl RepetitionDetector {
    /// Create a new repetition detector with default thresholds.
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            max_buffer_size: 1000,
            score_threshold: 100,
            min_repetitions: 3,
        }
    }

    /// Add new text to the rolling buffer.
    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
        
        // Keep the buffer size within limits by removing old content from the start.
        if self.buffer.len() > self.max_buffer_size {
            let excess = self.buffer.len() - self.max_buffer_size;
            // Find the first valid char boundary to avoid panicking on multi-byte chars
            let mut start = excess;
            while start < self.buffer.len() && !self.buffer.is_char_boundary(start) {
                start += 1;
            }
            if start < self.buffer.len() {
                self.buffer = self.buffer[start..].to_string();
            }
        }
    }

    /// Returns (pattern, repetitions) if a loop is detected, None otherwise.
    pub fn detect_loop(&self) -> Option<(String, usize)> {
        let buf = &self.buffer;
        let buf_len = buf.len();
        
        if buf_len < self.min_repetitions {
            return None;
        }

        // Try pattern lengths from 1 up to buf_len / min_reps.
        // We start from 1 to catch single character repetition quickly.
        for pattern_len in 1..=(buf_len / self.min_repetitions) {
            let pattern_end = buf_len;
            let pattern_start = buf_len - pattern_len;
            
            // Check if pattern_start is a valid char boundary
            if !buf.is_char_boundary(pattern_start) {
                continue;
            }
            
            let pattern = &buf[pattern_start..pattern_end];
            let mut reps = 1;
            let mut pos = pattern_start;
            
            // Count consecutive occurrences backwards.
            while pos >= pattern_len {
                let prev_pos = pos - pattern_len;
                if !buf.is_char_boundary(prev_pos) {
                    break;
                }
                
                if &buf[prev_pos..pos] == pattern {
                    reps += 1;
                    pos = prev_pos;
                } else {
                    break;
                }
            }
            
            // Formula: pattern_length * repetitions > score_threshold AND repetitions >= min_repetitions
            // Using chars().count() for length to be more accurate with multi-byte chars, 
            // though byte length is usually fine for these thresholds.
            let pattern_char_len = pattern.chars().count();
            if reps >= self.min_repetitions && pattern_char_len * reps > self.score_threshold {
                return Some((pattern.to_string(), reps));
            }
        }
        None
    }
    
    /// Reset the detector's state.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Detects a model stuck re-issuing the same tool call iteration after iteration.
///
/// Complements `RepetitionDetector`, which scans raw streamed text; this scans
/// the parsed call stream across agentic-loop iterations instead, matching on
/// (tool name, arguments) identity rather than character patterns.
pub struct ToolCallRepetitionTracker {
    window: std::collections::VecDeque<String>,
    window_size: usize,
    min_repetitions: usize,
}

impl ToolCallRepetitionTracker {
    /// Default thresholds: a 5-iteration window, stuck after 5 identical in a row.
    pub fn new() -> Self {
        Self::with_thresholds(5, 5)
    }

    pub fn with_thresholds(window_size: usize, min_repetitions: usize) -> Self {
        Self {
            window: std::collections::VecDeque::new(),
            window_size,
            min_repetitions,
        }
    }

    /// Record the set of calls made in one loop iteration. Returns the repeated
    /// signature if the most recent `min_repetitions` iterations are identical.
    pub fn record(&mut self, calls: &[(String, serde_json::Value)]) -> Option<String> {
        let mut parts: Vec<String> = calls
            .iter()
            .map(|(tool, args)| format!("{}::{}", tool, args))
            .collect();
        parts.sort();
        let signature = parts.join("|");

        self.window.push_back(signature.clone());
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        if signature.is_empty() {
            return None;
        }

        let recent_identical = self.window.len() >= self.min_repetitions
            && self
                .window
                .iter()
                .rev()
                .take(self.min_repetitions)
                .all(|s| *s == signature);

        if recent_identical {
            Some(signature)
        } else {
            None
        }
    }
}

impl Default for ToolCallRepetitionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tool_call_repetition_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_identical_consecutive_calls() {
        let mut tracker = ToolCallRepetitionTracker::new();
        let call = vec![("get_time".to_string(), json!({}))];

        assert_eq!(tracker.record(&call), None);
        assert_eq!(tracker.record(&call), None);
        assert_eq!(tracker.record(&call), None);
        assert_eq!(tracker.record(&call), None);
        assert_eq!(tracker.record(&call), Some("get_time::{}".to_string()));
    }

    #[test]
    fn does_not_flag_varying_arguments() {
        let mut tracker = ToolCallRepetitionTracker::with_thresholds(5, 3);
        assert_eq!(
            tracker.record(&[("get_time".to_string(), json!({"tz": "UTC"}))]),
            None
        );
        assert_eq!(
            tracker.record(&[("get_time".to_string(), json!({"tz": "PST"}))]),
            None
        );
        assert_eq!(
            tracker.record(&[("get_time".to_string(), json!({"tz": "EST"}))]),
            None
        );
    }

    #[test]
    fn empty_iteration_never_flags() {
        let mut tracker = ToolCallRepetitionTracker::new();
        for _ in 0..5 {
            assert_eq!(tracker.record(&[]), None);
        }
    }
}
