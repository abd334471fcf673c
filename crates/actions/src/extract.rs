//! Block extraction — locate tool XML blocks inside arbitrary
//! surrounding text, skipping CDATA while searching for closing tags.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use ca_domain::action::ActionKind;
use ca_workspace::cdata;

/// One extracted tool block.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub tool: ActionKind,
    /// Full block text, opener through closing tag (or to end-of-text
    /// when the closing tag is missing).
    pub xml: String,
    pub start: usize,
    pub end: usize,
    pub error: Option<String>,
}

/// Field names that appear as child elements; used to separate unknown
/// tools from ordinary fields when diagnosing unsupported output.
const FIELD_NAMES: &[&str] = &[
    "path", "content", "diff", "code_block", "command", "args", "cwd", "query", "num_results",
    "topic", "url", "question", "name", "arguments", "status", "message", "comments", "mode",
    "reason", "tasks", "think",
];

/// Scan for tool blocks, tolerating arbitrary text between them.
pub fn extract_blocks(text: &str) -> Vec<RawBlock> {
    let mut blocks = Vec::new();
    let mut pos = 0;

    while pos < text.len() {
        let Some(rel) = text[pos..].find('<') else {
            break;
        };
        let at = pos + rel;

        if cdata::starts_section(text, at) {
            pos = cdata::skip_section(text, at);
            continue;
        }

        let Some((tool, opener_end)) = match_opener(text, at) else {
            pos = at + 1;
            continue;
        };

        let close_tag = format!("</{}>", tool.as_str());
        match find_skipping_cdata(text, opener_end, &close_tag) {
            Some(close_start) => {
                let end = close_start + close_tag.len();
                blocks.push(RawBlock {
                    tool,
                    xml: text[at..end].to_owned(),
                    start: at,
                    end,
                    error: None,
                });
                pos = end;
            }
            None => {
                blocks.push(RawBlock {
                    tool,
                    xml: text[at..].to_owned(),
                    start: at,
                    end: text.len(),
                    error: Some(format!(
                        "missing closing tag {close_tag} for tool block"
                    )),
                });
                pos = opener_end;
            }
        }
    }

    blocks
}

/// Try to match a known tool opener at `at` (which points at `<`).
/// Returns the kind and the index just past the opener's `>`.
fn match_opener(text: &str, at: usize) -> Option<(ActionKind, usize)> {
    let after_lt = &text[at + 1..];
    for kind in ActionKind::ALL {
        let name = kind.as_str();
        if !after_lt.starts_with(name) {
            continue;
        }
        let boundary = after_lt.as_bytes().get(name.len()).copied();
        match boundary {
            Some(b'>') => return Some((*kind, at + 1 + name.len() + 1)),
            Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                // Attribute (or self-closing) form: opener runs to `>`.
                let rest = &after_lt[name.len()..];
                let gt = rest.find('>')?;
                return Some((*kind, at + 1 + name.len() + gt + 1));
            }
            _ => continue,
        }
    }
    None
}

/// Find `needle` in `text[from..]`, skipping CDATA sections.
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
// Unknown-tool diagnosis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([a-z][a-z0-9_]*)>").unwrap())
}

/// When extraction found nothing, look for closed tags that resemble
/// tool invocations but are not in the recognized set. Tags nested
/// inside an already-reported unknown block are its fields, not tools.
pub fn find_unknown_tools(text: &str) -> Vec<String> {
    let fields: HashSet<&str> = FIELD_NAMES.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut unknown = Vec::new();
    let mut pos = 0;

    while let Some(caps) = tag_re().captures_at(text, pos) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        pos = whole.end();

        if ActionKind::from_name(name).is_some() || fields.contains(name) {
            continue;
        }
        let close = format!("</{name}>");
        let Some(close_rel) = text[whole.end()..].find(&close) else {
            continue;
        };
        if seen.insert(name.to_owned()) {
            unknown.push(name.to_owned());
        }
        // Skip the block body so its child fields are not reported.
        pos = whole.end() + close_rel + close.len();
    }
    unknown
}
