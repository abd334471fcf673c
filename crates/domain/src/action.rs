//! Actions and action results — the canonical tool-invocation model.
//!
//! Every tool call the model emits, in whatever wire shape, resolves to
//! an [`Action`]; every execution yields an [`ActionResult`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ActionKind — the closed tool set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of tools the parser recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Finish,
    PatchCode,
    WriteCode,
    ReplaceCodeBlock,
    WriteFile,
    ReadFile,
    RevisePlan,
    TerminalRun,
    WebSearch,
    ReadUrl,
    Browser,
    McpTool,
    Evaluation,
    DocumentQuery,
    DocumentUpload,
    PatchComplete,
    Information,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[
        ActionKind::Finish,
        ActionKind::PatchCode,
        ActionKind::WriteCode,
        ActionKind::ReplaceCodeBlock,
        ActionKind::WriteFile,
        ActionKind::ReadFile,
        ActionKind::RevisePlan,
        ActionKind::TerminalRun,
        ActionKind::WebSearch,
        ActionKind::ReadUrl,
        ActionKind::Browser,
        ActionKind::McpTool,
        ActionKind::Evaluation,
        ActionKind::DocumentQuery,
        ActionKind::DocumentUpload,
        ActionKind::PatchComplete,
        ActionKind::Information,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Finish => "finish",
            ActionKind::PatchCode => "patch_code",
            ActionKind::WriteCode => "write_code",
            ActionKind::ReplaceCodeBlock => "replace_code_block",
            ActionKind::WriteFile => "write_file",
            ActionKind::ReadFile => "read_file",
            ActionKind::RevisePlan => "revise_plan",
            ActionKind::TerminalRun => "terminal_run",
            ActionKind::WebSearch => "web_search",
            ActionKind::ReadUrl => "read_url",
            ActionKind::Browser => "browser",
            ActionKind::McpTool => "mcp_tool",
            ActionKind::Evaluation => "evaluation",
            ActionKind::DocumentQuery => "document_query",
            ActionKind::DocumentUpload => "document_upload",
            ActionKind::PatchComplete => "patch_complete",
            ActionKind::Information => "information",
        }
    }

    /// Resolve a tool name to its kind. Case-sensitive: tool names are
    /// emitted lowercase by contract.
    pub fn from_name(name: &str) -> Option<ActionKind> {
        ActionKind::ALL.iter().copied().find(|k| k.as_str() == name)
    }

    /// Tools whose target is a workspace file path.
    pub fn is_file_tool(&self) -> bool {
        matches!(
            self,
            ActionKind::PatchCode
                | ActionKind::WriteCode
                | ActionKind::ReplaceCodeBlock
                | ActionKind::WriteFile
                | ActionKind::ReadFile
        )
    }

    /// Tools handled entirely inside the control loop — never routed to
    /// the runtime dispatcher.
    pub fn is_local_only(&self) -> bool {
        matches!(self, ActionKind::Information | ActionKind::PatchComplete)
    }

    /// Fields whose values carry raw payloads: wrapped in CDATA on the
    /// wire and exempt from deep-trimming.
    pub fn payload_fields(&self) -> &'static [&'static str] {
        match self {
            ActionKind::WriteCode | ActionKind::WriteFile => &["content"],
            ActionKind::PatchCode => &["diff"],
            ActionKind::ReplaceCodeBlock => &["code_block"],
            ActionKind::Finish | ActionKind::Information | ActionKind::PatchComplete => {
                &["message"]
            }
            ActionKind::McpTool => &["arguments"],
            _ => &[],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured tool invocation derived from model output.
///
/// Params hold the tool's declared fields plus derived fields the
/// dispatcher injects before execution (`origin_path`, `origin_cwd`,
/// `origin_command`, `run_id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_owned(), value.into());
        self
    }

    pub fn set_param(&mut self, name: &str, value: impl Into<Value>) {
        self.params.insert(name.to_owned(), value.into());
    }

    /// String value of a param, if present and a string.
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(|v| v.as_str())
    }

    /// String value of a param, empty string when absent.
    pub fn str_param_or_empty(&self, name: &str) -> &str {
        self.str_param(name).unwrap_or("")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ActionResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failure,
}

/// The outcome of executing one action.
///
/// `content` is the primary human-readable payload and is non-empty
/// whenever possible; the dispatcher synthesizes a diagnostic block when
/// a tool legitimately produced nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ActionResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            content: content.into(),
            stdout: None,
            stderr: None,
            error: None,
            comments: None,
            meta: Map::new(),
        }
    }

    pub fn failure(content: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Failure,
            content: content.into(),
            stdout: None,
            stderr: None,
            error: None,
            comments: None,
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(name.to_owned(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    /// Exit code from meta, when present.
    pub fn exit_code(&self) -> Option<i64> {
        self.meta.get("exitCode").and_then(|v| v.as_i64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_name_roundtrip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::from_name(kind.as_str()), Some(*kind));
        }
    }

    #[test]
    fn unknown_name_rejected() {
        assert_eq!(ActionKind::from_name("rm_rf"), None);
        assert_eq!(ActionKind::from_name("Finish"), None);
    }

    #[test]
    fn local_only_set() {
        assert!(ActionKind::Information.is_local_only());
        assert!(ActionKind::PatchComplete.is_local_only());
        assert!(!ActionKind::TerminalRun.is_local_only());
    }

    #[test]
    fn action_param_accessors() {
        let action = Action::new(ActionKind::WriteCode)
            .with_param("path", "a.py")
            .with_param("content", "print(1)\n");
        assert_eq!(action.str_param("path"), Some("a.py"));
        assert_eq!(action.str_param_or_empty("missing"), "");
    }

    #[test]
    fn action_serde_uses_type_tag() {
        let action = Action::new(ActionKind::ReadFile).with_param("path", "x.txt");
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "read_file");
        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn result_exit_code_accessor() {
        let result = ActionResult::success("ok").with_meta("exitCode", 0);
        assert_eq!(result.exit_code(), Some(0));
        assert!(ActionResult::failure("boom").exit_code().is_none());
    }
}
