//! Incremental SSE decoding.
//!
//! Chunks are buffered and split on a configurable delimiter (default
//! `\n\n`). Each message strips an optional `data:` prefix; `[DONE]`
//! ends the stream; everything else is JSON carrying
//! `choices[0].delta.content` or `choices[0].delta.reasoning_content`.
//!
//! A payload that fails to parse is NOT a terminator: it is carried and
//! re-attempted once more data arrives, which tolerates servers that
//! split JSON across delimiter boundaries.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use ca_domain::stream::StreamEvent;

pub struct SseDecoder {
    delimiter: String,
    buffer: String,
    /// Unparseable payload pieces awaiting continuation.
    carry: String,
    done: bool,
}

impl SseDecoder {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
            buffer: String::new(),
            carry: String::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of response bytes; returns decoded events.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let payloads = drain_messages(&mut self.buffer, &self.delimiter);
        let mut events = Vec::new();
        for payload in payloads {
            self.handle_payload(&payload, &mut events);
        }
        events
    }

    /// Flush at end of stream: process any remaining complete messages,
    /// then best-effort extract content from the unparsed tail.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.buffer.trim().is_empty() {
            let mut rest = std::mem::take(&mut self.buffer);
            rest.push_str(&self.delimiter);
            let payloads = drain_messages(&mut rest, &self.delimiter);
            for payload in payloads {
                self.handle_payload(&payload, &mut events);
            }
            self.carry.push_str(&rest);
        }

        if !self.carry.trim().is_empty() {
            let tail = std::mem::take(&mut self.carry);
            let text = extract_tail(&tail, "content");
            if !text.is_empty() {
                events.push(StreamEvent::Token { text });
            } else {
                let reasoning = extract_tail(&tail, "reasoning_content");
                if !reasoning.is_empty() {
                    events.push(StreamEvent::Thinking { text: reasoning });
                } else {
                    tracing::debug!(tail_chars = tail.len(), "discarding undecodable SSE tail");
                }
            }
        }

        events
    }

    fn handle_payload(&mut self, payload: &str, events: &mut Vec<StreamEvent>) {
        if self.done {
            return;
        }
        if payload.trim() == "[DONE]" {
            self.done = true;
            events.push(StreamEvent::Done {
                finish_reason: Some("stop".into()),
            });
            return;
        }

        // Try the carried fragment + this payload first, then the
        // payload alone (the carry may be junk).
        let candidate = if self.carry.is_empty() {
            payload.to_owned()
        } else {
            format!("{}{payload}", self.carry)
        };

        let value: Value = match serde_json::from_str(&candidate) {
            Ok(v) => {
                self.carry.clear();
                v
            }
            Err(_) => match serde_json::from_str(payload) {
                Ok(v) => {
                    self.carry.clear();
                    v
                }
                Err(_) => {
                    self.carry = candidate;
                    return;
                }
            },
        };

        decode_delta(&value, events);
    }
}

/// Extract complete messages from the buffer, draining them in place.
/// Each message strips optional `data:` prefixes; a message without any
/// `data:` line is used whole (non-standard servers omit the prefix).
fn drain_messages(buffer: &mut String, delimiter: &str) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find(delimiter) {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..delimiter.len());

        let mut data_lines = Vec::new();
        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_owned());
                }
            }
        }
        if data_lines.is_empty() {
            let whole = block.trim();
            if !whole.is_empty() {
                payloads.push(whole.to_owned());
            }
        } else {
            payloads.extend(data_lines);
        }
    }

    payloads
}

fn decode_delta(value: &Value, events: &mut Vec<StreamEvent>) {
    let Some(delta) = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("delta"))
    else {
        return;
    };

    if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(StreamEvent::Thinking {
                text: text.to_owned(),
            });
        }
    }
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(StreamEvent::Token {
                text: text.to_owned(),
            });
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tail extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tail_re(field: &str) -> Regex {
    Regex::new(&format!(
        r#""{field}"\s*:\s*"((?:[^"\\]|\\.)*)""#
    ))
    .unwrap()
}

fn content_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tail_re("content"))
}

fn reasoning_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tail_re("reasoning_content"))
}

/// Pull every `"<field>":"…"` string out of an undecodable tail and
/// concatenate them, JSON-unescaped.
fn extract_tail(tail: &str, field: &str) -> String {
    let re = match field {
        "content" => content_re(),
        _ => reasoning_re(),
    };
    let mut out = String::new();
    for caps in re.captures_iter(tail) {
        let escaped = &caps[1];
        match serde_json::from_str::<String>(&format!("\"{escaped}\"")) {
            Ok(unescaped) => out.push_str(&unescaped),
            Err(_) => out.push_str(escaped),
        }
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
