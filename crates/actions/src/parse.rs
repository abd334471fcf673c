//! Per-block action resolution — stream-parse one extracted tool block
//! into a canonical [`Action`].

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use ca_domain::action::{Action, ActionKind};
use ca_workspace::cdata;

use crate::extract::RawBlock;

/// Fields exempt from deep-trimming: their payloads are significant
/// byte-for-byte.
const NO_TRIM_FIELDS: &[&str] = &["content", "code_block"];

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

/// Parse one extracted block into an action.
pub fn parse_block(block: &RawBlock) -> Result<Action, String> {
    let xml = block.xml.as_str();
    let tool = block.tool;

    // ── Opener: collect attributes, find the body span ───────────
    let opener_gt = xml
        .find('>')
        .ok_or_else(|| format!("malformed {tool} opener"))?;
    let opener = &xml[..opener_gt];

    let close_tag = format!("</{}>", tool.as_str());
    let body_end = xml
        .rfind(&close_tag)
        .ok_or_else(|| format!("missing {close_tag}"))?;
    if body_end < opener_gt {
        return Err(format!("malformed {tool} block"));
    }
    let body = &xml[opener_gt + 1..body_end];

    let mut action = Action::new(tool);

    for caps in attr_re().captures_iter(opener) {
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        action.set_param(&caps[1], value.trim());
    }

    // ── Body: walk top-level child elements ──────────────────────
    parse_fields(body, &mut action)?;

    // ── Tool-specific coercions ──────────────────────────────────
    coerce(&mut action);

    Ok(action)
}

/// Collect `<field>value</field>` children into params.
fn parse_fields(body: &str, action: &mut Action) -> Result<(), String> {
    let mut pos = 0;

    while pos < body.len() {
        let Some(rel) = body[pos..].find('<') else {
            break;
        };
        let at = pos + rel;

        if cdata::starts_section(body, at) {
            pos = cdata::skip_section(body, at);
            continue;
        }

        let Some(field) = match_field_opener(body, at) else {
            pos = at + 1;
            continue;
        };
        let value_start = at + field.len() + 2; // past `<field>`
        let close = format!("</{field}>");
        let Some(close_at) = find_skipping_cdata(body, value_start, &close) else {
            return Err(format!("missing {close} inside tool block"));
        };

        let raw_value = &body[value_start..close_at];
        let unwrapped = cdata::unwrap(raw_value);
        let value = if NO_TRIM_FIELDS.contains(&field.as_str()) {
            unwrapped
        } else {
            unwrapped.trim().to_owned()
        };
        action.set_param(&field, value);

        pos = close_at + close.len();
    }

    Ok(())
}

/// Match a `<field>` opener at `at`; returns the field name. Fields are
/// simple lowercase identifiers with no attributes.
fn match_field_opener(body: &str, at: usize) -> Option<String> {
    let after = &body[at + 1..];
    let mut name = String::new();
    for ch in after.chars() {
        if ch == '>' {
            return if name.is_empty() { None } else { Some(name) };
        }
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' {
            name.push(ch);
        } else {
            return None;
        }
    }
    None
}

fn find_skipping_cdata(text: &str, from: usize, needle: &str) -> Option<usize> {
    let mut pos = from;
    while pos < text.len() {
        let rel = text[pos..].find('<')?;
        let at = pos + rel;
        if cdata::starts_section(text, at) {
            pos = cdata::skip_section(text, at);
            continue;
        }
        if text[at..].starts_with(needle) {
            return Some(at);
        }
        pos = at + 1;
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coercions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn coerce(action: &mut Action) {
    match action.kind {
        ActionKind::TerminalRun => {
            coerce_args(action);
            split_command(action);
        }
        ActionKind::Finish => {
            if let Some(status) = action.str_param("status") {
                let upper = status.to_ascii_uppercase();
                action.set_param("status", upper);
            }
        }
        ActionKind::McpTool => {
            // `arguments` arrives as JSON text in CDATA; resolve to an
            // object so validation and dispatch see structure.
            if let Some(raw) = action.str_param("arguments").map(str::to_owned) {
                if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw) {
                    action.set_param("arguments", Value::Object(map));
                }
            }
        }
        _ => {}
    }
}

/// Coerce `args` (JSON array, JSON-string array, or plain string) to a
/// single shell string.
fn coerce_args(action: &mut Action) {
    let Some(raw) = action.str_param("args").map(str::to_owned) else {
        return;
    };
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') {
        return;
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        let joined = items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        action.set_param("args", joined);
    }
}

/// A `command` that embeds its own arguments splits at the first
/// whitespace when no `args` was given.
fn split_command(action: &mut Action) {
    let has_args = action
        .str_param("args")
        .map(|a| !a.trim().is_empty())
        .unwrap_or(false);
    if has_args {
        return;
    }
    let Some(command) = action.str_param("command").map(str::to_owned) else {
        return;
    };
    if let Some((head, tail)) = command.trim().split_once(char::is_whitespace) {
        let head = head.to_owned();
        let tail = tail.trim().to_owned();
        action.set_param("command", head);
        action.set_param("args", tail);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
