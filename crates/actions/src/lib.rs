//! Tool-call parsing and normalization.
//!
//! The model emits tool calls in several shapes: canonical XML, plain
//! OpenAI-style JSON, channel envelopes, or wrapper-hinted bare params.
//! This crate funnels all of them into one canonical, validated
//! [`Action`](ca_domain::action::Action) stream:
//!
//! 1. [`normalize`] — rewrite every recognized shape into tool XML
//! 2. [`extract_blocks`] — locate tool blocks in the surrounding text
//! 3. [`parse_block`] — stream-parse one block into an `Action`
//! 4. [`validate_structure`] / [`validate_args`] — reject malformed calls
//!
//! [`resolve_actions`] runs the whole pipeline; structurally invalid
//! blocks come back as synthetic `evaluation(failure)` actions so the
//! control loop can surface the reason without throwing.

mod extract;
mod normalize;
mod parse;
mod serialize;
mod validate;

pub use extract::{extract_blocks, RawBlock};
pub use normalize::normalize;
pub use parse::parse_block;
pub use serialize::action_to_xml;
pub use validate::{validate_args, validate_structure};

use ca_domain::action::{Action, ActionKind};

/// The outcome of resolving one raw LLM output.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    /// Canonical actions, in emission order. Structurally invalid blocks
    /// appear as synthetic `evaluation(failure)` actions.
    pub actions: Vec<Action>,
    /// Block-level errors (also mirrored in the synthetic evaluations).
    pub errors: Vec<String>,
    /// Tool-looking names that are not in the recognized set. Used by
    /// the control loop to emit a stricter correction.
    pub unknown_tools: Vec<String>,
}

/// Run the full pipeline over one raw LLM output.
pub fn resolve_actions(raw: &str) -> ResolveOutcome {
    let normalized = normalize(raw);
    let blocks = extract_blocks(&normalized);

    let mut outcome = ResolveOutcome::default();

    for block in &blocks {
        if let Some(err) = &block.error {
            outcome.errors.push(err.clone());
            outcome.actions.push(synthetic_failure(block.tool, err));
            continue;
        }
        match parse_block(block) {
            Ok(action) => match validate_structure(&action) {
                Ok(()) => outcome.actions.push(action),
                Err(err) => {
                    outcome.errors.push(err.clone());
                    outcome.actions.push(synthetic_failure(block.tool, &err));
                }
            },
            Err(err) => {
                outcome.errors.push(err.clone());
                outcome.actions.push(synthetic_failure(block.tool, &err));
            }
        }
    }

    if outcome.actions.is_empty() {
        outcome.unknown_tools = extract::find_unknown_tools(&normalized);
        if !outcome.unknown_tools.is_empty() {
            tracing::debug!(tools = ?outcome.unknown_tools, "unsupported tool names in output");
        }
    }

    outcome
}

fn synthetic_failure(kind: ActionKind, reason: &str) -> Action {
    Action::new(ActionKind::Evaluation)
        .with_param("status", "failure")
        .with_param("comments", format!("invalid {kind} call: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_canonical_xml() {
        let raw = "<read_file>\n<path>src/main.py</path>\n</read_file>";
        let outcome = resolve_actions(raw);
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].kind, ActionKind::ReadFile);
        assert_eq!(outcome.actions[0].str_param("path"), Some("src/main.py"));
    }

    #[test]
    fn resolves_multiple_blocks_in_order() {
        let raw = "First I'll write the file.\n\
                   <write_code><path>a.py</path><content><![CDATA[x = 1\n]]></content></write_code>\n\
                   Then run it.\n\
                   <terminal_run><command>python</command><args>a.py</args></terminal_run>";
        let outcome = resolve_actions(raw);
        assert_eq!(outcome.actions.len(), 2);
        assert_eq!(outcome.actions[0].kind, ActionKind::WriteCode);
        assert_eq!(outcome.actions[1].kind, ActionKind::TerminalRun);
    }

    #[test]
    fn structural_violation_becomes_evaluation() {
        let raw = "<terminal_run><command>ls</command><path>/etc</path></terminal_run>";
        let outcome = resolve_actions(raw);
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].kind, ActionKind::Evaluation);
        assert_eq!(outcome.actions[0].str_param("status"), Some("failure"));
        assert!(outcome.actions[0]
            .str_param("comments")
            .unwrap()
            .contains("terminal_run"));
    }

    #[test]
    fn openai_json_resolves() {
        let raw = r#"{"tool_calls":[{"function":{"name":"read_file","arguments":"{\"path\":\"x.txt\"}"}}]}"#;
        let outcome = resolve_actions(raw);
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].kind, ActionKind::ReadFile);
        assert_eq!(outcome.actions[0].str_param("path"), Some("x.txt"));
    }

    #[test]
    fn unknown_tool_reported() {
        let raw = "<run_shell><cmd>ls</cmd></run_shell>";
        let outcome = resolve_actions(raw);
        assert!(outcome.actions.is_empty());
        assert_eq!(outcome.unknown_tools, vec!["run_shell".to_owned()]);
    }

    #[test]
    fn tool_xml_inside_think_ignored() {
        let raw = "<think>I could call <read_file><path>a</path></read_file></think>done";
        let outcome = resolve_actions(raw);
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn parser_roundtrip_canonical_actions() {
        let actions = vec![
            Action::new(ActionKind::WriteCode)
                .with_param("path", "pkg/mod.py")
                .with_param("content", "a < b and c & d\nline2\n"),
            Action::new(ActionKind::TerminalRun)
                .with_param("command", "pytest")
                .with_param("args", "-q tests/")
                .with_param("cwd", "pkg"),
            Action::new(ActionKind::Finish)
                .with_param("status", "SUCCESS")
                .with_param("message", "all done"),
        ];
        for action in actions {
            let xml = action_to_xml(&action);
            let outcome = resolve_actions(&xml);
            assert_eq!(outcome.actions.len(), 1, "xml: {xml}");
            assert_eq!(outcome.actions[0], action, "xml: {xml}");
        }
    }

    #[test]
    fn normalization_converges() {
        let inputs = [
            "<write_code><path>a.py</path><content>x<1</content></write_code>",
            r#"{"name":"read_file","arguments":{"path":"f.txt"}}"#,
            "<finish status=\"SUCCESS\" message=\"ok\"/>",
            "plain prose with no calls",
        ];
        for raw in inputs {
            let once = normalize(raw);
            let twice = normalize(&once);
            assert_eq!(once, twice, "input: {raw}");
        }
    }
}
