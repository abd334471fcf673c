//! Messages — entries of the ordered task memory.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Developer,
}

/// Structured annotations attached to a message.
///
/// `tool_call_key` exists only on assistant tool-call messages;
/// `prune_hash` is set on both the call and its adjacent result, and the
/// two share the same value within one occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMeta {
    /// The originating action (type + params) when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    /// Compact XML rendering of action + result for memorized summaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_memory: Option<String>,
    /// 16-hex digest grouping a tool call with its result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_hash: Option<String>,
    /// Same digest, present only on the assistant tool-call message.
    #[serde(
        rename = "toolCallKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call_key: Option<String>,
    /// Digest of normalized assistant content, used for anti-loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_hash: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pruned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pruned_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(
        rename = "exitCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exit_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_path: Option<String>,
    /// Tool-specific annotations not covered by the named fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessageMeta {
    /// Explicit action type override, when a caller sets one in `extra`.
    pub fn explicit_action_type(&self) -> Option<&str> {
        self.extra.get("action_type").and_then(|v| v.as_str())
    }
}

/// One entry of the ordered memory.
///
/// A pruned message retains its index and role but has empty `content`
/// and `memorized = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Logical tool name, or empty.
    #[serde(default)]
    pub action_type: String,
    /// When true, the message contributes to the memorized-content
    /// summary shown in prompts.
    #[serde(default)]
    pub memorized: bool,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            action_type: String::new(),
            memorized: false,
            meta: MessageMeta::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::new(Role::Developer, content)
    }

    /// Whether this message is an assistant tool call (carries a
    /// `toolCallKey`).
    pub fn is_tool_call(&self) -> bool {
        self.role == Role::Assistant && self.meta.tool_call_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_serializes_wire_names() {
        let mut meta = MessageMeta::default();
        meta.tool_call_key = Some("abcd".into());
        meta.exit_code = Some(1);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["toolCallKey"], "abcd");
        assert_eq!(json["exitCode"], 1);
        assert!(json.get("prune_hash").is_none());
    }

    #[test]
    fn meta_extra_flattens() {
        let raw = serde_json::json!({
            "prune_hash": "1234",
            "custom_field": "kept"
        });
        let meta: MessageMeta = serde_json::from_value(raw).unwrap();
        assert_eq!(meta.prune_hash.as_deref(), Some("1234"));
        assert_eq!(meta.extra["custom_field"], "kept");
    }

    #[test]
    fn pruned_false_omitted() {
        let meta = MessageMeta::default();
        let json = serde_json::to_value(&meta).unwrap();
        assert!(json.get("pruned").is_none());
    }

    #[test]
    fn message_roundtrip() {
        let mut msg = Message::assistant("<read_file><path>a.txt</path></read_file>");
        msg.action_type = "read_file".into();
        msg.meta.tool_call_key = Some("ffff".into());
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::Assistant);
        assert!(back.is_tool_call());
    }
}
