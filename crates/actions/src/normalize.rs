//! Normalization — rewrite every recognized output shape into tool XML.
//!
//! Runs before block extraction. The pipeline is idempotent: applying
//! it to its own output changes nothing.

use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use ca_workspace::cdata;

/// Fields whose bodies commonly contain `<` or `&` and therefore travel
/// in CDATA.
const CDATA_FIELDS: &[&str] = &["content", "code_block", "diff", "message", "arguments"];

/// Normalize one raw LLM output into canonical tool XML plus prose.
pub fn normalize(raw: &str) -> String {
    let text = strip_think(raw);
    let (text, hint) = strip_envelopes(&text);
    let text = match json_to_xml(&text, hint.as_deref()) {
        Some(xml) => xml,
        None => text,
    };
    let text = expand_finish_attr(&text);
    wrap_payload_cdata(&text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Think sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remove closed `<think>…</think>` sections so example tool XML inside
/// reasoning never executes. Unclosed sections are left alone.
fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("<think>") {
        match rest[open..].find("</think>") {
            Some(rel_close) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + rel_close + "</think>".len()..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel envelopes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const CHANNEL: &str = "<|channel|>";
const MESSAGE: &str = "<|message|>";
/// Markers that terminate an envelope payload.
const TERMINATORS: &[&str] = &["<|end|>", "<|return|>", "<|channel|>", "<|start|>"];

fn hint_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"to=(?:functions\.)?([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

/// Strip `<|channel|>…<|message|>` envelopes, keeping each payload and
/// capturing a `to=<tool>` hint from the last header that carries one.
fn strip_envelopes(text: &str) -> (String, Option<String>) {
    if !text.contains(MESSAGE) {
        return (remove_stray_markers(text), None);
    }

    let mut out = String::with_capacity(text.len());
    let mut hint = None;
    let mut rest = text;

    loop {
        let Some(ch) = rest.find(CHANNEL) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..ch]);
        let after_channel = &rest[ch + CHANNEL.len()..];
        let Some(msg) = after_channel.find(MESSAGE) else {
            // Header with no message marker: drop the marker itself.
            rest = after_channel;
            continue;
        };
        let header = &after_channel[..msg];
        if let Some(caps) = hint_re().captures(header) {
            hint = Some(caps[1].to_owned());
        }

        let payload_start = &after_channel[msg + MESSAGE.len()..];
        let payload_end = TERMINATORS
            .iter()
            .filter_map(|t| payload_start.find(t))
            .min()
            .unwrap_or(payload_start.len());
        out.push_str(&payload_start[..payload_end]);

        rest = &payload_start[payload_end..];
        // Consume a terminating <|end|>/<|return|>/<|start|> marker;
        // a following <|channel|> loops back around.
        for t in ["<|end|>", "<|return|>"] {
            if let Some(stripped) = rest.strip_prefix(t) {
                rest = stripped;
                break;
            }
        }
        if let Some(start) = rest.strip_prefix("<|start|>") {
            // `<|start|>assistant` style role prefix; drop through the
            // next channel marker or whitespace.
            rest = start.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        }
    }

    (remove_stray_markers(&out), hint)
}

fn remove_stray_markers(text: &str) -> String {
    let mut out = text.to_owned();
    for marker in ["<|end|>", "<|return|>", "<|start|>", "<|message|>", "<|channel|>"] {
        out = out.replace(marker, "");
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON tool calls → XML
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a JSON-only tool call payload to tool XML. Returns `None`
/// when the payload is not entirely JSON or matches no known shape.
fn json_to_xml(text: &str, hint: Option<&str>) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;

    // {type:"tool_call", name, arguments}
    if obj.get("type").and_then(Value::as_str) == Some("tool_call") {
        if let Some(name) = obj.get("name").and_then(Value::as_str) {
            return tool_xml(name, obj.get("arguments"));
        }
    }

    // {tool_calls:[{function:{name, arguments}}]}
    if let Some(calls) = obj.get("tool_calls").and_then(Value::as_array) {
        return convert_call_list(calls);
    }

    // {choices:[{message:{tool_calls:[…]}}]}
    if let Some(calls) = obj
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
    {
        return convert_call_list(calls);
    }

    // {output:[{type:"tool_call", name, arguments}…]}
    if let Some(items) = obj.get("output").and_then(Value::as_array) {
        let mut blocks = Vec::new();
        for item in items {
            if item.get("type").and_then(Value::as_str) != Some("tool_call") {
                continue;
            }
            let name = item.get("name").and_then(Value::as_str)?;
            blocks.push(tool_xml(name, item.get("arguments"))?);
        }
        if !blocks.is_empty() {
            return Some(blocks.join("\n"));
        }
    }

    // {name, arguments|params}
    if let Some(name) = obj.get("name").and_then(Value::as_str) {
        let args = obj.get("arguments").or_else(|| obj.get("params"));
        if args.is_some() {
            return tool_xml(name, args);
        }
    }

    // Envelope hinted a tool and the body is bare JSON params.
    if let Some(tool) = hint {
        return tool_xml(tool, Some(&value));
    }

    None
}

fn convert_call_list(calls: &[Value]) -> Option<String> {
    let mut blocks = Vec::new();
    for call in calls {
        let func = call.get("function").unwrap_or(call);
        let name = func.get("name").and_then(Value::as_str)?;
        blocks.push(tool_xml(name, func.get("arguments"))?);
    }
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n"))
    }
}

/// Render one `<name>…</name>` block from an arguments value, which may
/// be an object or a JSON string encoding one.
fn tool_xml(name: &str, arguments: Option<&Value>) -> Option<String> {
    let parsed;
    let args = match arguments {
        None => None,
        Some(Value::Object(map)) => Some(map),
        Some(Value::String(s)) => {
            if s.trim().is_empty() {
                None
            } else {
                parsed = serde_json::from_str::<Value>(s).ok()?;
                Some(parsed.as_object()?)
            }
        }
        Some(Value::Null) => None,
        Some(_) => return None,
    };

    let mut xml = String::new();
    let _ = write!(xml, "<{name}>");
    if let Some(args) = args {
        for (field, value) in args {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            let _ = write!(xml, "\n<{field}>{rendered}</{field}>");
        }
    }
    let _ = write!(xml, "\n</{name}>");
    Some(xml)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// finish attribute form
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn finish_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<finish\b([^>]*?)/>").unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

/// Convert `<finish status="…" message="…"/>` into the element form.
fn expand_finish_attr(text: &str) -> String {
    finish_attr_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let mut status = String::new();
            let mut message = String::new();
            for attr in attr_re().captures_iter(&caps[1]) {
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .map(|m| m.as_str())
                    .unwrap_or("");
                match &attr[1] {
                    "status" => status = value.to_owned(),
                    "message" => message = value.to_owned(),
                    _ => {}
                }
            }
            format!(
                "<finish>\n<status>{status}</status>\n<message>{}</message>\n</finish>",
                cdata::wrap(&message)
            )
        })
        .into_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CDATA wrapping of payload fields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn payload_field_res() -> &'static Vec<(String, Regex)> {
    static RES: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    RES.get_or_init(|| {
        CDATA_FIELDS
            .iter()
            .map(|field| {
                (
                    field.to_string(),
                    Regex::new(&format!(r"(?s)<{field}>\n?(.*?)\n?</{field}>")).unwrap(),
                )
            })
            .collect()
    })
}

/// Wrap unwrapped payload fields in CDATA so `<` and `&` inside them
/// survive block extraction.
fn wrap_payload_cdata(text: &str) -> String {
    let mut out = text.to_owned();
    for (field, re) in payload_field_res() {
        out = re
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let inner = &caps[1];
                if inner.trim_start().starts_with("<![CDATA[") {
                    caps[0].to_owned()
                } else {
                    format!("<{field}>{}</{field}>", cdata::wrap(inner))
                }
            })
            .into_owned();
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
