//! Skill command templates.
//!
//! Skill steps reference running parameters by bare name (`{{pool_name}}`).
//! Unlike chain context paths there is no nesting: every parameter is
//! substituted by exact placeholder, and whatever is left over is optional
//! and removed.

use once_cell::sync::Lazy;
use regex::Regex;

use opschain_types::{ParamMap, TransportKind, value_to_text};

static LEFTOVER_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{[^}]+\}\}").expect("leftover pattern compiles"));
static REPEATED_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").expect("space pattern compiles"));

/// Substitute `params` into a step's command template.
///
/// For device REST commands, a value is JSON-escaped where its placeholder
/// directly follows a double quote, i.e. sits inside a JSON string of the
/// payload. Placeholders without a parameter are stripped, runs of spaces are
/// collapsed and the result is trimmed.
pub fn resolve_command(template: &str, params: &ParamMap, transport: TransportKind) -> String {
    let escape_in_strings = transport == TransportKind::IcontrolRest;
    let mut command = template.to_string();

    for (key, value) in params {
        let placeholder = format!("{{{{{key}}}}}");
        if !command.contains(&placeholder) {
            continue;
        }
        let text = value_to_text(value);
        command = if escape_in_strings {
            substitute_json_aware(&command, &placeholder, &text)
        } else {
            command.replace(&placeholder, &text)
        };
    }

    let command = LEFTOVER_PLACEHOLDER.replace_all(&command, "");
    let command = REPEATED_SPACES.replace_all(&command, " ");
    command.trim().to_string()
}

fn substitute_json_aware(command: &str, placeholder: &str, text: &str) -> String {
    let mut resolved = String::with_capacity(command.len() + text.len());
    let mut cursor = 0;
    for (index, _) in command.match_indices(placeholder) {
        let before = &command[cursor..index];
        resolved.push_str(before);
        if command[..index].ends_with('"') {
            resolved.push_str(&escape_json_string(text));
        } else {
            resolved.push_str(text);
        }
        cursor = index + placeholder.len();
    }
    resolved.push_str(&command[cursor..]);
    resolved
}

fn escape_json_string(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> ParamMap {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn substitutes_parameters_by_name() {
        let params = params(&[("pool", json!("web_pool")), ("vmid", json!(110))]);
        let command = resolve_command("tmsh show ltm pool {{pool}} && qm status {{vmid}}", &params, TransportKind::Ssh);
        assert_eq!(command, "tmsh show ltm pool web_pool && qm status 110");
    }

    #[test]
    fn strips_unresolved_placeholders_and_collapses_spaces() {
        let params = params(&[("virtual", json!("vs_http"))]);
        let command = resolve_command("  tmsh show ltm virtual {{virtual}} {{optional_flags}} detail ", &params, TransportKind::Ssh);
        assert_eq!(command, "tmsh show ltm virtual vs_http detail");
    }

    #[test]
    fn escapes_values_inside_rest_json_strings() {
        let params = params(&[("description", json!("line one\n\"quoted\"\tC:\\temp"))]);
        let command = resolve_command(
            r#"PATCH /mgmt/tm/ltm/pool/p1 {"description": "{{description}}"}"#,
            &params,
            TransportKind::IcontrolRest,
        );
        assert_eq!(
            command,
            r#"PATCH /mgmt/tm/ltm/pool/p1 {"description": "line one\n\"quoted\"\tC:\\temp"}"#
        );
        let payload: serde_json::Value = serde_json::from_str(&command[command.find('{').unwrap()..]).unwrap();
        assert_eq!(payload["description"], json!("line one\n\"quoted\"\tC:\\temp"));
    }

    #[test]
    fn rest_values_outside_strings_are_not_escaped() {
        let params = params(&[("name", json!("a\"b"))]);
        let command = resolve_command(
            r#"GET /mgmt/tm/ltm/pool/{{name}} {"name": "{{name}}"}"#,
            &params,
            TransportKind::IcontrolRest,
        );
        assert_eq!(command, r#"GET /mgmt/tm/ltm/pool/a"b {"name": "a\"b"}"#);
    }

    #[test]
    fn shell_commands_are_never_escaped() {
        let params = params(&[("msg", json!("say \"hi\""))]);
        let command = resolve_command(r#"echo "{{msg}}""#, &params, TransportKind::Ssh);
        assert_eq!(command, r#"echo "say "hi"""#);
    }

    #[test]
    fn null_values_substitute_as_empty() {
        let params = params(&[("partition", serde_json::Value::Null)]);
        assert_eq!(resolve_command("list /{{partition}}/pools", &params, TransportKind::Ssh), "list //pools");
    }
}
