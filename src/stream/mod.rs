// src/stream/mod.rs
// NDJSON encoding for in-flight run events. One JSON object per line;
// `count` is monotonic across the whole response and `ts` is unix
// milliseconds at encode time.

use chrono::Utc;
use serde_json::{json, Value};

use crate::repair::{FinalOutcome, RunEvent};

pub struct NdjsonEncoder {
    count: u64,
    text_total: u64,
    finished: bool,
}

impl Default for NdjsonEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NdjsonEncoder {
    pub fn new() -> Self {
        Self {
            count: 0,
            text_total: 0,
            finished: false,
        }
    }

    fn line(&mut self, event_type: &str, mut payload: Value) -> String {
        self.count += 1;
        payload["type"] = json!(event_type);
        payload["count"] = json!(self.count);
        payload["ts"] = json!(Utc::now().timestamp_millis());
        let mut line = payload.to_string();
        line.push('\n');
        line
    }

    pub fn encode(&mut self, event: &RunEvent) -> String {
        match event {
            RunEvent::TextDelta { delta } => {
                self.text_total += delta.chars().count() as u64;
                self.line(
                    "text-delta",
                    json!({ "delta": delta, "total": self.text_total }),
                )
            }
            RunEvent::ToolCall { name, arguments } => {
                self.line("tool-call", json!({ "name": name, "arguments": arguments }))
            }
            RunEvent::ToolResult { name, output } => {
                self.line("tool-result", json!({ "name": name, "output": output }))
            }
            RunEvent::Error { message } => self.line("error", json!({ "message": message })),
        }
    }

    /// The terminal line. Returns None on any call after the first, so
    /// a response carries exactly one finish regardless of how the run
    /// ended.
    pub fn finish(&mut self, outcome: &FinalOutcome) -> Option<String> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.line("finish", json!({ "outcome": outcome })))
    }

    /// Terminal line for a run that failed before producing an outcome.
    pub fn finish_error(&mut self, message: &str) -> Option<String> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.line("finish", json!({ "error": message })))
    }
}
