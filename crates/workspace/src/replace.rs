//! Anchor-based code-block replacement.
//!
//! The model sends a snippet whose first and last non-empty lines act as
//! anchors into the current file. Anchors are disambiguated
//! progressively: if the first line occurs more than once, the next
//! non-empty line is required too, and so on until the match is unique
//! or the snippet is exhausted. The END anchor resolves the same way
//! from the tail, searching only after the resolved START.

use std::fmt::Write as _;

/// Structured failure carrying a machine-readable `keyid` hint for the
/// model plus the full current file so it can re-anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceError {
    pub keyid: &'static str,
    pub message: String,
}

impl ReplaceError {
    fn new(keyid: &'static str, message: String) -> Self {
        Self { keyid, message }
    }
}

pub const KEYID_NOOP: &str = "replace_code_block_noop";
pub const KEYID_EMPTY: &str = "replace_code_block_empty";
pub const KEYID_START_NOT_FOUND: &str = "replace_code_block_start_not_found";
pub const KEYID_START_AMBIGUOUS: &str = "replace_code_block_start_ambiguous";
pub const KEYID_END_NOT_FOUND: &str = "replace_code_block_end_not_found";
pub const KEYID_END_AMBIGUOUS: &str = "replace_code_block_end_ambiguous";

/// Replace the file span anchored by `snippet` with `snippet` itself.
///
/// Returns the new file content. A snippet equal (after normalization)
/// to the current slice is an explicit no-op failure, never a silent
/// success.
pub fn replace_code_block(current: &str, snippet: &str) -> Result<String, ReplaceError> {
    let current_norm = crate::normalize_lf(current);
    let snippet_norm = crate::normalize_lf(snippet);

    let file_lines: Vec<&str> = current_norm.split('\n').collect();
    let snippet_lines: Vec<&str> = snippet_norm.split('\n').collect();

    // Anchor candidates are the snippet's non-empty lines, trimmed.
    let anchors: Vec<&str> = snippet_lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if anchors.is_empty() {
        return Err(ReplaceError::new(
            KEYID_EMPTY,
            "code_block contains no non-empty lines to anchor on".to_owned(),
        ));
    }

    // Non-empty file lines with their original indices.
    let file_nonempty: Vec<(usize, &str)> = file_lines
        .iter()
        .enumerate()
        .map(|(i, l)| (i, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    // ── START anchor: forward progressive disambiguation ─────────
    let start_ne = resolve_anchor(&file_nonempty, &anchors, Direction::Forward, 0).map_err(
        |amb| match amb {
            Ambiguity::NotFound => ReplaceError::new(
                KEYID_START_NOT_FOUND,
                fail_message("start anchor not found in file", &anchors[0], &current_norm),
            ),
            Ambiguity::Ambiguous(n) => ReplaceError::new(
                KEYID_START_AMBIGUOUS,
                fail_message(
                    &format!("start anchor matches {n} locations even with every snippet line"),
                    &anchors[0],
                    &current_norm,
                ),
            ),
        },
    )?;

    // ── END anchor: backward, restricted to after START ──────────
    let end_ne = resolve_anchor(&file_nonempty, &anchors, Direction::Backward, start_ne)
        .map_err(|amb| match amb {
            Ambiguity::NotFound => ReplaceError::new(
                KEYID_END_NOT_FOUND,
                fail_message(
                    "end anchor not found after the start anchor",
                    anchors.last().unwrap(),
                    &current_norm,
                ),
            ),
            Ambiguity::Ambiguous(n) => ReplaceError::new(
                KEYID_END_AMBIGUOUS,
                fail_message(
                    &format!("end anchor matches {n} locations even with every snippet line"),
                    anchors.last().unwrap(),
                    &current_norm,
                ),
            ),
        })?;

    let start_line = file_nonempty[start_ne].0;
    let end_line = file_nonempty[end_ne].0;

    // ── No-op detection ──────────────────────────────────────────
    let slice = file_lines[start_line..=end_line].join("\n");
    if normalize_for_compare(&slice) == normalize_for_compare(&snippet_norm) {
        return Err(ReplaceError::new(
            KEYID_NOOP,
            "no changes: the proposed block is identical to the current code".to_owned(),
        ));
    }

    // ── Splice ───────────────────────────────────────────────────
    let mut out_lines: Vec<&str> = Vec::with_capacity(file_lines.len());
    out_lines.extend_from_slice(&file_lines[..start_line]);
    out_lines.extend(snippet_norm.split('\n'));
    out_lines.extend_from_slice(&file_lines[end_line + 1..]);

    Ok(out_lines.join("\n"))
}

enum Direction {
    Forward,
    Backward,
}

enum Ambiguity {
    NotFound,
    Ambiguous(usize),
}

/// Resolve an anchor position in `file_nonempty` (indices into that
/// vec). Forward resolves the snippet head; backward resolves the tail.
/// `min_ne` restricts candidates to indices >= min_ne (used so END only
/// matches at or after START).
fn resolve_anchor(
    file_nonempty: &[(usize, &str)],
    anchors: &[&str],
    direction: Direction,
    min_ne: usize,
) -> Result<usize, Ambiguity> {
    let first = match direction {
        Direction::Forward => anchors[0],
        Direction::Backward => anchors[anchors.len() - 1],
    };

    let mut candidates: Vec<usize> = (min_ne..file_nonempty.len())
        .filter(|&i| file_nonempty[i].1 == first)
        .collect();
    if candidates.is_empty() {
        return Err(Ambiguity::NotFound);
    }

    // Require progressively more anchor lines until unique.
    let mut depth = 1;
    while candidates.len() > 1 && depth < anchors.len() {
        candidates.retain(|&c| match direction {
            Direction::Forward => file_nonempty
                .get(c + depth)
                .map(|(_, l)| *l == anchors[depth])
                .unwrap_or(false),
            Direction::Backward => c
                .checked_sub(depth)
                .and_then(|i| file_nonempty.get(i))
                .map(|(_, l)| *l == anchors[anchors.len() - 1 - depth])
                .unwrap_or(false),
        });
        depth += 1;
    }

    match candidates.len() {
        1 => Ok(candidates[0]),
        0 => Err(Ambiguity::NotFound),
        n => Err(Ambiguity::Ambiguous(n)),
    }
}

fn normalize_for_compare(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

fn fail_message(reason: &str, anchor: &str, current: &str) -> String {
    let mut msg = String::new();
    let _ = writeln!(msg, "Cannot apply replace_code_block: {reason}.");
    let _ = writeln!(msg, "Anchor line: '{anchor}'");
    let _ = writeln!(
        msg,
        "Adjust the code_block so its first and last lines match the current file uniquely."
    );
    let _ = writeln!(msg, "Current file content:");
    msg.push_str(current);
    msg
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
