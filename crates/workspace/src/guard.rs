//! Write-time guardrail for Python sources.
//!
//! Agent-written programs must run unattended, so `.py` files that wait
//! on interactive input are rejected at write time. The file is lexed
//! with a small state machine that neutralizes comments and string
//! literals before pattern matching, so `print("input()")` passes while
//! `x = input()` does not.

/// Lexer states for the neutralizing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    Comment,
    Sq,
    Dq,
    Tsq,
    Tdq,
}

/// Patterns that indicate the program waits for interactive input.
const INTERACTIVE_PATTERNS: &[&str] = &["input(", "sys.stdin", "readline("];

/// Whether a path should be screened by the guard.
pub fn applies_to(path: &str) -> bool {
    path.ends_with(".py")
}

/// Reject Python source that contains interactive input patterns.
///
/// Returns the offending patterns on failure.
pub fn check_python_source(source: &str) -> Result<(), Vec<&'static str>> {
    let neutralized = neutralize(source);
    let found: Vec<&'static str> = INTERACTIVE_PATTERNS
        .iter()
        .copied()
        .filter(|p| contains_pattern(&neutralized, p))
        .collect();
    if found.is_empty() {
        Ok(())
    } else {
        Err(found)
    }
}

/// Human-readable rejection message for a failed check.
pub fn rejection_message(patterns: &[&'static str]) -> String {
    format!(
        "Refusing to write Python code that waits for interactive input ({}). \
         The program must run unattended; read parameters from argv, files, or environment variables instead.",
        patterns.join(", ")
    )
}

/// Replace comment and string-literal bytes with spaces, preserving
/// newlines and everything in code position.
fn neutralize(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = LexState::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            LexState::Code => match b {
                b'#' => {
                    state = LexState::Comment;
                    out.push(b' ');
                }
                b'\'' => {
                    if bytes[i..].starts_with(b"'''") {
                        state = LexState::Tsq;
                        out.extend_from_slice(b"   ");
                        i += 3;
                        continue;
                    }
                    state = LexState::Sq;
                    out.push(b' ');
                }
                b'"' => {
                    if bytes[i..].starts_with(b"\"\"\"") {
                        state = LexState::Tdq;
                        out.extend_from_slice(b"   ");
                        i += 3;
                        continue;
                    }
                    state = LexState::Dq;
                    out.push(b' ');
                }
                _ => out.push(b),
            },
            LexState::Comment => {
                if b == b'\n' {
                    state = LexState::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            LexState::Sq | LexState::Dq => {
                let quote = if state == LexState::Sq { b'\'' } else { b'"' };
                if b == b'\\' && i + 1 < bytes.len() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == quote || b == b'\n' {
                    // Unterminated single-quoted strings end at newline.
                    state = LexState::Code;
                    out.push(if b == b'\n' { b'\n' } else { b' ' });
                } else {
                    out.push(b' ');
                }
            }
            LexState::Tsq | LexState::Tdq => {
                let close: &[u8] = if state == LexState::Tsq {
                    b"'''"
                } else {
                    b"\"\"\""
                };
                if bytes[i..].starts_with(close) {
                    state = LexState::Code;
                    out.extend_from_slice(b"   ");
                    i += 3;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
        }
        i += 1;
    }

    String::from_utf8(out).unwrap_or_default()
}

/// Match a pattern in neutralized source. For call patterns the
/// character before the name must not be part of an identifier, so
/// `my_input(` does not count as `input(`.
fn contains_pattern(neutralized: &str, pattern: &str) -> bool {
    let bytes = neutralized.as_bytes();
    let pat = pattern.as_bytes();
    let mut from = 0;
    while let Some(pos) = find_from(bytes, pat, from) {
        let boundary_ok = if pattern.starts_with(|c: char| c.is_ascii_alphabetic()) {
            pos == 0 || !is_ident_byte(bytes[pos - 1])
        } else {
            true
        };
        if boundary_ok {
            return true;
        }
        from = pos + 1;
    }
    false
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
