//! Canonical XML serialization of actions.
//!
//! Used when a multi-action turn is re-appended to memory one action at
//! a time, and for the parser round-trip law: parsing the serialized
//! form of a canonical action yields the same action.

use std::fmt::Write as _;

use serde_json::Value;

use ca_domain::action::Action;
use ca_workspace::cdata;

/// Render one action as a single canonical tool-XML block.
pub fn action_to_xml(action: &Action) -> String {
    let name = action.kind.as_str();
    let payload_fields = action.kind.payload_fields();

    let mut xml = String::new();
    let _ = write!(xml, "<{name}>");
    for (field, value) in &action.params {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let body = if payload_fields.contains(&field.as_str()) || needs_cdata(&rendered) {
            cdata::wrap(&rendered)
        } else {
            rendered
        };
        let _ = write!(xml, "\n<{field}>{body}</{field}>");
    }
    let _ = write!(xml, "\n</{name}>");
    xml
}

fn needs_cdata(value: &str) -> bool {
    value.contains('<') || value.contains('&')
}

#[cfg(test)]
mod tests {
    use super::*;
    use ca_domain::action::ActionKind;

    #[test]
    fn payload_wrapped_in_cdata() {
        let action = Action::new(ActionKind::WriteCode)
            .with_param("path", "a.py")
            .with_param("content", "x = 1\n");
        let xml = action_to_xml(&action);
        assert!(xml.contains("<content><![CDATA[x = 1\n]]></content>"));
        assert!(xml.contains("<path>a.py</path>"));
        assert!(xml.starts_with("<write_code>"));
        assert!(xml.ends_with("</write_code>"));
    }

    #[test]
    fn angle_bracket_value_wrapped_even_outside_payload() {
        let action = Action::new(ActionKind::WebSearch).with_param("query", "a < b");
        let xml = action_to_xml(&action);
        assert!(xml.contains("<![CDATA[a < b]]>"));
    }

    #[test]
    fn object_param_serialized_as_json() {
        let action = Action::new(ActionKind::McpTool)
            .with_param("name", "fetch")
            .with_param("arguments", serde_json::json!({"url": "https://x"}));
        let xml = action_to_xml(&action);
        assert!(xml.contains("<![CDATA[{\"url\":\"https://x\"}]]>"));
    }
}
