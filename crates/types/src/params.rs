//! Flat parameter maps passed between chains, skills and templates.

use serde_json::{Map, Value};

/// Parameter name → JSON value. Values are strings in practice; other JSON
/// scalars are accepted and stringified when substituted into text.
pub type ParamMap = Map<String, Value>;

/// Render a parameter value the way it is substituted into command text.
///
/// Strings are used verbatim, `null` becomes the empty string and every other
/// value is rendered as compact JSON (`110`, `true`, `{"a":1}`).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Look up `key` and return its text form when it is present and non-empty.
pub fn non_empty_text(params: &ParamMap, key: &str) -> Option<String> {
    params.get(key).map(value_to_text).filter(|text| !text.is_empty())
}

/// Parse `key=value` pairs into a parameter map; the value is kept as a string.
pub fn parse_assignment(assignment: &str) -> Option<(String, Value)> {
    let (key, value) = assignment.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), Value::String(value.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalars_render_without_quotes() {
        assert_eq!(value_to_text(&json!("10.0.0.5")), "10.0.0.5");
        assert_eq!(value_to_text(&json!(110)), "110");
        assert_eq!(value_to_text(&json!(false)), "false");
        assert_eq!(value_to_text(&Value::Null), "");
    }

    #[test]
    fn non_empty_text_skips_blank_values() {
        let mut params = ParamMap::new();
        params.insert("dhcp_ip".into(), json!(""));
        params.insert("mgmt_ip".into(), json!("10.1.1.9"));
        assert_eq!(non_empty_text(&params, "dhcp_ip"), None);
        assert_eq!(non_empty_text(&params, "mgmt_ip").as_deref(), Some("10.1.1.9"));
        assert_eq!(non_empty_text(&params, "target_host"), None);
    }

    #[test]
    fn assignment_keeps_equals_signs_in_value() {
        let (key, value) = parse_assignment("token=abc=def").unwrap();
        assert_eq!(key, "token");
        assert_eq!(value, json!("abc=def"));
        assert!(parse_assignment("novalue").is_none());
        assert!(parse_assignment("=x").is_none());
    }
}
