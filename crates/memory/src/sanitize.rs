//! Path sanitization — conversation-workspace fragments never reach
//! stored content or user-visible text.

use std::sync::OnceLock;

use regex::Regex;

fn full_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:/[\w.\-/]*)?workspace/user_\d+/Conversation_[A-Za-z0-9_\-]+/").unwrap()
    })
}

fn conversation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Conversation_[A-Za-z0-9_\-]+/").unwrap())
}

/// Strip conversation-workspace path fragments from text.
pub fn sanitize(text: &str) -> String {
    let pass1 = full_path_re().replace_all(text, "");
    conversation_re().replace_all(&pass1, "").into_owned()
}
