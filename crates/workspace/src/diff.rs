//! Unified-diff parsing, generation, and application.
//!
//! Application is position-tolerant: when a hunk's context does not
//! match at its declared line, the original-side needle is re-anchored
//! by searching ±200 lines around the declared position and then the
//! whole file, accepting only a unique match.

use std::fmt::Write as _;

/// How far from the declared position the fuzzy search looks first.
const FUZZY_WINDOW: usize = 200;
/// Minimum needle length for fuzzy anchoring.
const MIN_NEEDLE_LINES: usize = 2;
/// Context lines emitted by the generator.
const GEN_CONTEXT: usize = 3;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hunk model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based line number on the original side.
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Original-side lines: context + removals, in order.
    fn needle(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
                HunkLine::Add(_) => None,
            })
            .collect()
    }

    /// New-side lines: context + additions, in order.
    fn replacement(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                HunkLine::Context(s) | HunkLine::Add(s) => Some(s.as_str()),
                HunkLine::Remove(_) => None,
            })
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse the hunks of a unified diff. File headers (`---`/`+++`), index
/// lines, and trailing `\ No newline` markers are tolerated and skipped.
pub fn parse_unified(diff: &str) -> Result<Vec<Hunk>, String> {
    let normalized = crate::normalize_lf(diff);
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in normalized.lines() {
        if let Some(header) = line.strip_prefix("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            current = Some(parse_hunk_header(header, line)?);
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            // Outside any hunk: headers and prose are skipped.
            continue;
        };

        if line.starts_with("\\ No newline") {
            continue;
        }
        if let Some(text) = line.strip_prefix('+') {
            hunk.lines.push(HunkLine::Add(text.to_owned()));
        } else if let Some(text) = line.strip_prefix('-') {
            // A new file header inside the stream ends the hunk.
            if text.starts_with("--") && hunk_complete(hunk) {
                hunks.push(current.take().unwrap());
                continue;
            }
            hunk.lines.push(HunkLine::Remove(text.to_owned()));
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(HunkLine::Context(text.to_owned()));
        } else if line.is_empty() {
            // Some generators drop the leading space on blank context.
            hunk.lines.push(HunkLine::Context(String::new()));
        } else if hunk_complete(hunk) {
            // Prose after a complete hunk ends it.
            hunks.push(current.take().unwrap());
        } else {
            return Err(format!("malformed diff line inside hunk: '{line}'"));
        }
    }

    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() && !normalized.trim().is_empty() {
        return Err("diff contains no hunks".to_owned());
    }
    Ok(hunks)
}

fn hunk_complete(hunk: &Hunk) -> bool {
    let (old, new) = hunk_line_counts(hunk);
    old >= hunk.old_count && new >= hunk.new_count
}

fn hunk_line_counts(hunk: &Hunk) -> (usize, usize) {
    let mut old = 0;
    let mut new = 0;
    for line in &hunk.lines {
        match line {
            HunkLine::Context(_) => {
                old += 1;
                new += 1;
            }
            HunkLine::Remove(_) => old += 1,
            HunkLine::Add(_) => new += 1,
        }
    }
    (old, new)
}

fn parse_hunk_header(header: &str, full: &str) -> Result<Hunk, String> {
    // header is the text after the leading `@@`, e.g. ` -12,3 +14,4 @@ fn x`
    let body = header
        .split("@@")
        .next()
        .ok_or_else(|| format!("malformed hunk header: '{full}'"))?
        .trim();

    let mut old = None;
    let mut new = None;
    for part in body.split_whitespace() {
        if let Some(spec) = part.strip_prefix('-') {
            old = Some(parse_range(spec, full)?);
        } else if let Some(spec) = part.strip_prefix('+') {
            new = Some(parse_range(spec, full)?);
        }
    }
    let (old_start, old_count) =
        old.ok_or_else(|| format!("hunk header missing old range: '{full}'"))?;
    let (new_start, new_count) =
        new.ok_or_else(|| format!("hunk header missing new range: '{full}'"))?;

    Ok(Hunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

fn parse_range(spec: &str, full: &str) -> Result<(usize, usize), String> {
    let mut parts = spec.splitn(2, ',');
    let start = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| format!("malformed hunk range '{spec}' in '{full}'"))?;
    let count = match parts.next() {
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| format!("malformed hunk range '{spec}' in '{full}'"))?,
        None => 1,
    };
    Ok((start, count))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Application
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Apply a unified diff to `original`, returning the patched text.
///
/// Both inputs are LF-normalized. Hunks apply in order; each hunk is
/// tried at its declared position (adjusted by the running offset) and
/// re-anchored fuzzily on mismatch.
pub fn apply_unified(original: &str, diff: &str) -> Result<String, String> {
    let hunks = parse_unified(diff)?;
    let normalized = crate::normalize_lf(original);
    // split('\n') keeps a trailing empty element for a trailing newline,
    // so join('\n') reproduces the file exactly.
    let mut lines: Vec<String> = normalized.split('\n').map(str::to_owned).collect();

    let mut offset: isize = 0;
    for hunk in &hunks {
        let needle: Vec<&str> = hunk.needle();
        let declared = (hunk.old_start.max(1) - 1) as isize + offset;
        let declared = declared.clamp(0, lines.len() as isize) as usize;

        let pos = locate_hunk(&lines, &needle, declared, hunk)?;
        let replacement: Vec<String> =
            hunk.replacement().into_iter().map(str::to_owned).collect();

        let removed = needle.len();
        lines.splice(pos..pos + removed, replacement.iter().cloned());
        offset += replacement.len() as isize - removed as isize;
    }

    Ok(lines.join("\n"))
}

fn locate_hunk(
    lines: &[String],
    needle: &[&str],
    declared: usize,
    hunk: &Hunk,
) -> Result<usize, String> {
    if needle.is_empty() {
        // Pure-insertion hunk: anchor at the declared position.
        return Ok(declared.min(lines.len()));
    }
    if matches_at(lines, declared, needle) {
        return Ok(declared);
    }

    if needle.len() < MIN_NEEDLE_LINES {
        return Err(context_mismatch(hunk, declared, "needle too short to re-anchor"));
    }

    // Windowed search around the declared position.
    let lo = declared.saturating_sub(FUZZY_WINDOW);
    let hi = (declared + FUZZY_WINDOW).min(lines.len());
    let windowed = find_matches(lines, needle, lo, hi);
    match windowed.len() {
        1 => return Ok(windowed[0]),
        n if n > 1 => {
            return Err(context_mismatch(
                hunk,
                declared,
                &format!("{n} candidate positions within ±{FUZZY_WINDOW} lines"),
            ));
        }
        _ => {}
    }

    // Global search.
    let global = find_matches(lines, needle, 0, lines.len());
    match global.len() {
        1 => Ok(global[0]),
        0 => Err(context_mismatch(hunk, declared, "context not found anywhere")),
        n => Err(context_mismatch(
            hunk,
            declared,
            &format!("{n} candidate positions in the file"),
        )),
    }
}

fn find_matches(lines: &[String], needle: &[&str], lo: usize, hi: usize) -> Vec<usize> {
    let mut found = Vec::new();
    if needle.len() > lines.len() {
        return found;
    }
    let last = hi.min(lines.len().saturating_sub(needle.len()) + 1);
    for pos in lo..last {
        if matches_at(lines, pos, needle) {
            found.push(pos);
        }
    }
    found
}

fn matches_at(lines: &[String], pos: usize, needle: &[&str]) -> bool {
    if pos + needle.len() > lines.len() {
        return false;
    }
    needle
        .iter()
        .enumerate()
        .all(|(i, expected)| lines[pos + i] == *expected)
}

fn context_mismatch(hunk: &Hunk, declared: usize, detail: &str) -> String {
    let first_needle = hunk
        .needle()
        .first()
        .map(|s| s.to_string())
        .unwrap_or_default();
    format!(
        "Patch context mismatch: hunk @@ -{},{} +{},{} @@ does not apply near line {} ({detail}); first expected line: '{first_needle}'",
        hunk.old_start,
        hunk.old_count,
        hunk.new_start,
        hunk.new_count,
        declared + 1,
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate a unified diff transforming `a` into `b`.
///
/// Produces a single hunk covering the changed span (common prefix and
/// suffix trimmed, three lines of context). Returns an empty string
/// when the LF-normalized inputs are identical.
pub fn generate_unified(a: &str, b: &str) -> String {
    let a_norm = crate::normalize_lf(a);
    let b_norm = crate::normalize_lf(b);
    if a_norm == b_norm {
        return String::new();
    }

    let a_lines: Vec<&str> = a_norm.split('\n').collect();
    let b_lines: Vec<&str> = b_norm.split('\n').collect();

    let mut prefix = 0;
    while prefix < a_lines.len()
        && prefix < b_lines.len()
        && a_lines[prefix] == b_lines[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < a_lines.len() - prefix
        && suffix < b_lines.len() - prefix
        && a_lines[a_lines.len() - 1 - suffix] == b_lines[b_lines.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let ctx_before = prefix.min(GEN_CONTEXT);
    let ctx_after = suffix.min(GEN_CONTEXT);

    let old_body_start = prefix - ctx_before;
    let old_body_end = a_lines.len() - suffix + ctx_after;
    let new_body_end = b_lines.len() - suffix + ctx_after;

    let old_count = old_body_end - old_body_start;
    let new_count = new_body_end - old_body_start;

    let mut out = String::new();
    out.push_str("--- original\n+++ modified\n");
    let _ = writeln!(
        out,
        "@@ -{},{} +{},{} @@",
        old_body_start + 1,
        old_count,
        old_body_start + 1,
        new_count,
    );

    for line in &a_lines[old_body_start..prefix] {
        let _ = writeln!(out, " {line}");
    }
    for line in &a_lines[prefix..a_lines.len() - suffix] {
        let _ = writeln!(out, "-{line}");
    }
    for line in &b_lines[prefix..b_lines.len() - suffix] {
        let _ = writeln!(out, "+{line}");
    }
    for line in &a_lines[a_lines.len() - suffix..old_body_end] {
        let _ = writeln!(out, " {line}");
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "fn main() {\n    let a = 1;\n    let b = 2;\n    println!(\"{}\", a + b);\n}\n";

    #[test]
    fn apply_at_declared_position() {
        let diff = "--- a\n+++ b\n@@ -2,2 +2,2 @@\n-    let a = 1;\n+    let a = 10;\n     let b = 2;\n";
        let patched = apply_unified(FILE, diff).unwrap();
        assert!(patched.contains("let a = 10;"));
        assert!(patched.contains("let b = 2;"));
    }

    #[test]
    fn apply_reanchors_when_position_shifted() {
        // Declared start points far away; context only matches at line 2.
        let diff = "@@ -40,2 +40,2 @@\n-    let a = 1;\n+    let a = 10;\n     let b = 2;\n";
        let patched = apply_unified(FILE, diff).unwrap();
        assert!(patched.contains("let a = 10;"));
    }

    #[test]
    fn mismatch_reports_line_numbers() {
        let diff = "@@ -2,2 +2,2 @@\n-    let z = 9;\n+    let z = 10;\n     let b = 2;\n";
        let err = apply_unified(FILE, diff).unwrap_err();
        assert!(err.contains("Patch context mismatch"), "got: {err}");
        assert!(err.contains("-2,2"), "got: {err}");
    }

    #[test]
    fn ambiguous_needle_rejected() {
        let file = "x\ny\nx\ny\nx\ny\n";
        let diff = "@@ -1,2 +1,2 @@\n-x\n-y\n+z\n+w\n";
        // Declared position matches, so this applies at line 1; force a
        // mismatch by shifting the declared start beyond all matches.
        let patched = apply_unified(file, diff).unwrap();
        assert!(patched.starts_with("z\nw\n"));

        let shifted = "@@ -2,2 +2,2 @@\n-x\n-y\n+z\n+w\n";
        let err = apply_unified(file, shifted).unwrap_err();
        assert!(err.contains("candidate positions"), "got: {err}");
    }

    #[test]
    fn multi_hunk_offsets_tracked() {
        let file = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let diff = "@@ -1,2 +1,3 @@\n a\n+a2\n b\n@@ -6,2 +7,2 @@\n-f\n+F\n g\n";
        let patched = apply_unified(file, diff).unwrap();
        assert_eq!(patched, "a\na2\nb\nc\nd\ne\nF\ng\nh\n");
    }

    #[test]
    fn generate_then_apply_roundtrip() {
        let a = "one\ntwo\nthree\nfour\nfive\n";
        let b = "one\ntwo\nTHREE\nthree-and-a-half\nfour\nfive\n";
        let diff = generate_unified(a, b);
        assert_eq!(apply_unified(a, &diff).unwrap(), b);
    }

    #[test]
    fn generate_identical_is_empty() {
        assert!(generate_unified(FILE, FILE).is_empty());
    }

    #[test]
    fn generate_roundtrip_no_trailing_newline() {
        let a = "alpha\nbeta";
        let b = "alpha\ngamma";
        let diff = generate_unified(a, b);
        assert_eq!(apply_unified(a, &diff).unwrap(), b);
    }

    #[test]
    fn generate_roundtrip_full_rewrite() {
        let a = "old\n";
        let b = "brand\nnew\ncontent\n";
        let diff = generate_unified(a, b);
        assert_eq!(apply_unified(a, &diff).unwrap(), b);
    }

    #[test]
    fn parse_rejects_garbage_inside_hunk() {
        let diff = "@@ -1,2 +1,2 @@\n-x\nnot a diff line\n";
        assert!(parse_unified(diff).is_err());
    }

    #[test]
    fn blank_context_line_without_space_tolerated() {
        let file = "a\n\nb\n";
        let diff = "@@ -1,3 +1,3 @@\n a\n\n-b\n+B\n";
        let patched = apply_unified(file, diff).unwrap();
        assert_eq!(patched, "a\n\nB\n");
    }
}
