//! Prune-key derivation.
//!
//! A tool call and its result are grouped by a 16-hex digest of
//! `toolName || stableKey`, where the stable key normalizes the call's
//! identity: the target basename for file tools, the
//! `command args||cwd` tuple for terminal runs.

use sha1::{Digest, Sha1};

use ca_domain::message::Message;

/// Tools whose assistant calls get a `toolCallKey`.
pub const KEYED_TOOLS: &[&str] = &[
    "read_file",
    "write_code",
    "patch_code",
    "replace_code_block",
    "terminal_run",
];

/// First 16 hex chars of the SHA-1 of `input`.
pub fn sha1_16(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_owned()
}

/// Digest for a tool call: `sha1(toolName || stableKey)`, 16 hex.
pub fn tool_call_key(tool: &str, stable_key: &str) -> String {
    sha1_16(&format!("{tool}{stable_key}"))
}

/// Derive the stable key for an assistant tool-call message, or `None`
/// when the tool is not keyed or no identity can be recovered.
pub fn stable_key(msg: &Message) -> Option<String> {
    let tool = msg.action_type.as_str();
    if !KEYED_TOOLS.contains(&tool) {
        return None;
    }

    if tool == "terminal_run" {
        let (command, args, cwd) = msg
            .meta
            .action
            .as_ref()
            .map(|a| {
                (
                    a.str_param_or_empty("command").to_owned(),
                    a.str_param_or_empty("args").to_owned(),
                    a.str_param_or_empty("cwd").to_owned(),
                )
            })
            .unwrap_or_else(|| {
                (
                    field_from_xml(&msg.content, "command").unwrap_or_default(),
                    field_from_xml(&msg.content, "args").unwrap_or_default(),
                    field_from_xml(&msg.content, "cwd").unwrap_or_default(),
                )
            });
        return Some(format!("{command} {args}||{cwd}"));
    }

    // File tools: basename of origin_path / path, then the XML <path>
    // in the content, then meta.filepath.
    let from_action = msg.meta.action.as_ref().and_then(|a| {
        a.str_param("origin_path")
            .or_else(|| a.str_param("path"))
            .map(str::to_owned)
    });
    let path = from_action
        .or_else(|| field_from_xml(&msg.content, "path"))
        .or_else(|| msg.meta.filepath.clone())?;

    Some(basename(&path))
}

/// Last path segment.
pub fn basename(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_owned()
}

/// Minimal `<field>…</field>` lookup inside message content.
fn field_from_xml(content: &str, field: &str) -> Option<String> {
    let open = format!("<{field}>");
    let close = format!("</{field}>");
    let start = content.find(&open)? + open.len();
    let end = content[start..].find(&close)? + start;
    let value = content[start..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_domain::action::{Action, ActionKind};

    #[test]
    fn sha1_16_is_16_hex() {
        let digest = sha1_16("hello");
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn same_identity_same_key() {
        assert_eq!(
            tool_call_key("write_code", "a.py"),
            tool_call_key("write_code", "a.py")
        );
        assert_ne!(
            tool_call_key("write_code", "a.py"),
            tool_call_key("read_file", "a.py")
        );
    }

    #[test]
    fn file_tool_key_uses_basename() {
        let mut msg = Message::assistant("<write_code><path>src/pkg/a.py</path></write_code>");
        msg.action_type = "write_code".into();
        msg.meta.action = Some(
            Action::new(ActionKind::WriteCode).with_param("path", "src/pkg/a.py"),
        );
        assert_eq!(stable_key(&msg).as_deref(), Some("a.py"));
    }

    #[test]
    fn origin_path_preferred() {
        let mut msg = Message::assistant("");
        msg.action_type = "write_code".into();
        msg.meta.action = Some(
            Action::new(ActionKind::WriteCode)
                .with_param("path", "Conversation_x/a.py")
                .with_param("origin_path", "a.py"),
        );
        assert_eq!(stable_key(&msg).as_deref(), Some("a.py"));
    }

    #[test]
    fn xml_path_fallback() {
        let mut msg = Message::assistant("<read_file>\n<path>notes/todo.md</path>\n</read_file>");
        msg.action_type = "read_file".into();
        assert_eq!(stable_key(&msg).as_deref(), Some("todo.md"));
    }

    #[test]
    fn filepath_meta_fallback() {
        let mut msg = Message::assistant("unstructured");
        msg.action_type = "read_file".into();
        msg.meta.filepath = Some("x/y.txt".into());
        assert_eq!(stable_key(&msg).as_deref(), Some("y.txt"));
    }

    #[test]
    fn terminal_run_tuple_key() {
        let mut msg = Message::assistant("");
        msg.action_type = "terminal_run".into();
        msg.meta.action = Some(
            Action::new(ActionKind::TerminalRun)
                .with_param("command", "pytest")
                .with_param("args", "-q")
                .with_param("cwd", "pkg"),
        );
        assert_eq!(stable_key(&msg).as_deref(), Some("pytest -q||pkg"));
    }

    #[test]
    fn unkeyed_tool_returns_none() {
        let mut msg = Message::assistant("x");
        msg.action_type = "web_search".into();
        assert!(stable_key(&msg).is_none());
    }
}
