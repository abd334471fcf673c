//! CDATA wrapping and unwrapping for payload-bearing XML fields.
//!
//! Payload fields (`content`, `code_block`, `diff`, message bodies)
//! routinely contain `<` and `&`; they travel wrapped in CDATA so the
//! block parser never has to escape them.

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Whether a value is already a single CDATA section.
pub fn is_wrapped(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.starts_with(CDATA_OPEN) && trimmed.ends_with(CDATA_CLOSE)
}

/// Wrap a value in CDATA.
///
/// A literal `]]>` inside the payload would terminate the section early,
/// so it is split across two adjacent sections.
pub fn wrap(value: &str) -> String {
    let safe = value.replace(CDATA_CLOSE, "]]]]><![CDATA[>");
    format!("{CDATA_OPEN}{safe}{CDATA_CLOSE}")
}

/// Unwrap all CDATA sections in a value, concatenating their contents
/// with any text between them. A value without CDATA is returned as-is.
pub fn unwrap(value: &str) -> String {
    if !value.contains(CDATA_OPEN) {
        return value.to_owned();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(open) = rest.find(CDATA_OPEN) {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + CDATA_OPEN.len()..];
        match after_open.find(CDATA_CLOSE) {
            Some(close) => {
                out.push_str(&after_open[..close]);
                rest = &after_open[close + CDATA_CLOSE.len()..];
            }
            None => {
                // Unterminated section: take everything.
                out.push_str(after_open);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Skip past a CDATA section starting at `pos` (which must point at
/// `<![CDATA[`). Returns the index just after the closing `]]>`, or the
/// end of the text for an unterminated section.
pub fn skip_section(text: &str, pos: usize) -> usize {
    debug_assert!(text[pos..].starts_with(CDATA_OPEN));
    match text[pos + CDATA_OPEN.len()..].find(CDATA_CLOSE) {
        Some(close) => pos + CDATA_OPEN.len() + close + CDATA_CLOSE.len(),
        None => text.len(),
    }
}

/// Whether `text[pos..]` starts a CDATA section.
pub fn starts_section(text: &str, pos: usize) -> bool {
    text[pos..].starts_with(CDATA_OPEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_roundtrip() {
        let payload = "a<b and b>c && x";
        assert_eq!(unwrap(&wrap(payload)), payload);
    }

    #[test]
    fn wrap_splits_cdata_close() {
        let payload = "if x ]]> y";
        let wrapped = wrap(payload);
        assert!(wrapped.contains("]]]]><![CDATA[>"));
        assert_eq!(unwrap(&wrapped), payload);
    }

    #[test]
    fn unwrap_passes_plain_text() {
        assert_eq!(unwrap("no cdata here"), "no cdata here");
    }

    #[test]
    fn unwrap_unterminated_takes_rest() {
        assert_eq!(unwrap("<![CDATA[open ended"), "open ended");
    }

    #[test]
    fn is_wrapped_detects() {
        assert!(is_wrapped("  <![CDATA[x]]>  "));
        assert!(!is_wrapped("x"));
        assert!(!is_wrapped("<![CDATA[x"));
    }

    #[test]
    fn skip_section_advances_past_close() {
        let text = "<![CDATA[</fake>]]>tail";
        let end = skip_section(text, 0);
        assert_eq!(&text[end..], "tail");
    }
}
