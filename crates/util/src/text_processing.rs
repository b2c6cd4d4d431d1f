//! Text helpers shared by the executor, transports and the CLI.

use once_cell::sync::Lazy;
use regex::Regex;

/// Returns the compiled redaction patterns, most specific first.
///
/// Each pattern captures the text that must survive in group 1; everything
/// matched after it is replaced with `<redacted>`.
fn redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

    &REDACT_PATTERNS
}

fn build_redact_patterns() -> Vec<Regex> {
    [
        r"(?i)(authorization:\s*)([^\s]+(?:\s+[^\s]+)?)",
        r"(?i)(PVEAPIToken=)([^\s]+)",
        r"(?i)((?:^|\b)Bearer\s+)([A-Za-z0-9\-._~+/]+=*)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD|PASS)=)([^\s]+)",
        r#"(?i)("[A-Za-z0-9_]*(?:password|secret|token|pass)"\s*:\s*)("[^"]*")"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern compiles"))
    .collect()
}

/// Redacts values that look like secrets in a string.
///
/// Used before commands, payloads and URLs reach the logs.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in redact_patterns() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}<redacted>")
            })
            .to_string();
    }
    redacted
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_assignments_and_headers() {
        let redacted = redact_sensitive("VAULT_TOKEN=s.abc123 tmsh list ltm pool");
        assert_eq!(redacted, "VAULT_TOKEN=<redacted> tmsh list ltm pool");

        let header = redact_sensitive("Authorization: PVEAPIToken=root@pam!ops=1234-5678");
        assert!(!header.contains("1234-5678"));
    }

    #[test]
    fn redacts_json_password_fields() {
        let payload = r#"POST /mgmt/tm/auth/user {"name": "ops", "password": "hunter2"}"#;
        let redacted = redact_sensitive(payload);
        assert!(redacted.contains(r#""name": "ops""#));
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn leaves_plain_commands_alone() {
        let command = "tmsh show ltm virtual vs_http";
        assert_eq!(redact_sensitive(command), command);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
