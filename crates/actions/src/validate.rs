//! Structural and per-tool argument validation.
//!
//! Structural violations are hard rejects applied during resolution;
//! argument validation runs in the control loop per action so that one
//! invalid action in a multi-action turn does not abort the rest.

use serde_json::Value;

use ca_domain::action::{Action, ActionKind};

/// Hard structural rejects — field combinations that indicate the model
/// confused one tool's shape with another's.
pub fn validate_structure(action: &Action) -> Result<(), String> {
    match action.kind {
        ActionKind::TerminalRun => {
            if action.params.contains_key("path") || action.params.contains_key("content") {
                return Err(
                    "terminal_run must not carry 'path' or 'content'; use write_code for files"
                        .to_owned(),
                );
            }
        }
        ActionKind::WriteCode | ActionKind::WriteFile => {
            if action.params.contains_key("command") {
                return Err(format!(
                    "{} must not carry 'command'; use terminal_run to run commands",
                    action.kind
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Per-tool argument validation.
pub fn validate_args(action: &Action) -> Result<(), String> {
    match action.kind {
        ActionKind::WebSearch => {
            require_non_empty(action, "query")?;
            if let Some(n) = action.params.get("num_results") {
                let ok = match n {
                    Value::Number(num) => num.as_i64().map(|v| v > 0).unwrap_or(false),
                    Value::String(s) => s.trim().parse::<i64>().map(|v| v > 0).unwrap_or(false),
                    _ => false,
                };
                if !ok {
                    return Err("web_search num_results must be a positive integer".to_owned());
                }
            }
            Ok(())
        }
        ActionKind::ReadUrl => {
            let url = action.str_param_or_empty("url");
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err("read_url requires a url starting with http:// or https://".to_owned())
            }
        }
        ActionKind::TerminalRun => {
            require_non_empty(action, "command")?;
            for field in ["args", "cwd"] {
                if let Some(v) = action.params.get(field) {
                    if !v.is_string() {
                        return Err(format!("terminal_run {field} must be a string"));
                    }
                }
            }
            Ok(())
        }
        ActionKind::WriteCode | ActionKind::WriteFile => {
            require_non_empty(action, "path")?;
            if let Some(v) = action.params.get("content") {
                if !v.is_string() {
                    return Err(format!("{} content must be a string", action.kind));
                }
            }
            Ok(())
        }
        ActionKind::PatchCode => {
            require_non_empty(action, "path")?;
            require_non_empty(action, "diff")
        }
        ActionKind::ReplaceCodeBlock => {
            require_non_empty(action, "path")?;
            require_non_empty(action, "code_block")
        }
        ActionKind::ReadFile => require_non_empty(action, "path"),
        ActionKind::McpTool => {
            require_non_empty(action, "name")?;
            if let Some(v) = action.params.get("arguments") {
                if !v.is_object() {
                    return Err("mcp_tool arguments must be a JSON object".to_owned());
                }
            }
            Ok(())
        }
        ActionKind::Finish => {
            require_non_empty(action, "message")?;
            let status = action.str_param_or_empty("status");
            if status.eq_ignore_ascii_case("SUCCESS") || status.eq_ignore_ascii_case("FAILED") {
                Ok(())
            } else {
                Err("finish requires status SUCCESS or FAILED".to_owned())
            }
        }
        _ => Ok(()),
    }
}

fn require_non_empty(action: &Action, field: &str) -> Result<(), String> {
    let present = action
        .str_param(field)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false);
    if present {
        Ok(())
    } else {
        Err(format!("{} requires a non-empty '{field}'", action.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_run_rejects_file_fields() {
        let action = Action::new(ActionKind::TerminalRun)
            .with_param("command", "ls")
            .with_param("path", "x");
        assert!(validate_structure(&action).is_err());
    }

    #[test]
    fn write_code_rejects_command() {
        let action = Action::new(ActionKind::WriteCode)
            .with_param("path", "a.py")
            .with_param("command", "ls");
        assert!(validate_structure(&action).is_err());
    }

    #[test]
    fn web_search_requires_query() {
        let action = Action::new(ActionKind::WebSearch);
        assert!(validate_args(&action).is_err());
        let action = action.with_param("query", "rust");
        assert!(validate_args(&action).is_ok());
    }

    #[test]
    fn web_search_num_results_positive() {
        let base = Action::new(ActionKind::WebSearch).with_param("query", "q");
        assert!(validate_args(&base.clone().with_param("num_results", "5")).is_ok());
        assert!(validate_args(&base.clone().with_param("num_results", "0")).is_err());
        assert!(validate_args(&base.with_param("num_results", "many")).is_err());
    }

    #[test]
    fn read_url_scheme_checked() {
        let ok = Action::new(ActionKind::ReadUrl).with_param("url", "https://example.com");
        assert!(validate_args(&ok).is_ok());
        let bad = Action::new(ActionKind::ReadUrl).with_param("url", "ftp://example.com");
        assert!(validate_args(&bad).is_err());
    }

    #[test]
    fn write_code_allows_empty_content() {
        let action = Action::new(ActionKind::WriteCode)
            .with_param("path", "empty.txt")
            .with_param("content", "");
        assert!(validate_args(&action).is_ok());
    }

    #[test]
    fn finish_status_case_insensitive() {
        let base = Action::new(ActionKind::Finish).with_param("message", "done");
        assert!(validate_args(&base.clone().with_param("status", "success")).is_ok());
        assert!(validate_args(&base.clone().with_param("status", "FAILED")).is_ok());
        assert!(validate_args(&base.clone().with_param("status", "DONE")).is_err());
        assert!(validate_args(&base).is_err());
    }

    #[test]
    fn mcp_tool_arguments_must_be_object() {
        let base = Action::new(ActionKind::McpTool).with_param("name", "fetch");
        assert!(validate_args(&base.clone()).is_ok());
        assert!(validate_args(
            &base
                .clone()
                .with_param("arguments", serde_json::json!({"a": 1}))
        )
        .is_ok());
        assert!(validate_args(&base.with_param("arguments", "not json")).is_err());
    }

    #[test]
    fn information_unconstrained() {
        assert!(validate_args(&Action::new(ActionKind::Information)).is_ok());
    }
}
