//! # Chain Context Resolution
//!
//! This module resolves the `{{ ... }}` placeholders found in chain step
//! parameters against the shared run context. It is the bridge that lets one
//! step consume what an earlier step produced.
//!
//! ## Context Shape
//!
//! Paths are walked from a JSON tree with two roots:
//!
//! - `{{chain.<key>}}` - chain parameters, merged over cluster defaults
//! - `{{steps.<step_id>.<field>}}` - the context entry of an executed step
//!   (`output`, `status`, `execution_id`, `device`, `analysis`)
//!
//! When a step's combined output parsed as a JSON object it is stored as an
//! object, so `{{steps.step-1.output.mgmt_ip}}` descends into it directly.
//!
//! ## Semi-structured Output
//!
//! Step output is frequently log text with JSON embedded in it. When a path
//! hop lands on a string, the string is parsed as a JSON object first. If
//! that fails, every flat `{...}` fragment in the text is tried in order and
//! the walk continues in the first object that carries the requested key.
//! The number of such string hops in one path is capped by
//! [`MAX_EMBEDDED_JSON_DEPTH`].
//!
//! ## Unresolvable Paths
//!
//! A path that cannot be walked is left in the text verbatim, so a missing
//! upstream value is visible to the operator instead of turning into an
//! empty argument that looks legitimate. A missing *final* key, or a `null`
//! value, renders as the empty string.
//!
//! ## Usage
//!
//! ```rust
//! use opschain_engine::resolve::resolve;
//! use serde_json::json;
//!
//! let context = json!({
//!     "chain": { "device": "bigip01" },
//!     "steps": { "step-1": { "output": { "mgmt_ip": "10.0.0.5" } } }
//! });
//!
//! assert_eq!(resolve("ping {{steps.step-1.output.mgmt_ip}}", &context), "ping 10.0.0.5");
//! assert_eq!(resolve("{{steps.step-9.output.x}}", &context), "{{steps.step-9.output.x}}");
//! ```

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use opschain_types::value_to_text;

/// Maximum number of JSON-in-string hops taken while walking one path.
pub const MAX_EMBEDDED_JSON_DEPTH: usize = 8;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(.+?)\}\}").expect("placeholder pattern compiles"));
static EMBEDDED_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]+\}").expect("embedded object pattern compiles"));

/// Replaces every `{{path}}` in `template` with the value found in `context`.
///
/// Placeholders whose path cannot be walked are left untouched. A template
/// without placeholders is returned unchanged.
///
/// # Arguments
///
/// * `template` - Text containing zero or more `{{path}}` placeholders
/// * `context` - The `{chain, steps}` tree, usually from
///   [`RunContext::to_value`](opschain_types::RunContext::to_value)
///
/// # Examples
///
/// ```rust
/// use opschain_engine::resolve::resolve;
/// use serde_json::json;
///
/// let context = json!({ "chain": { "pool": "web_pool" }, "steps": {} });
/// assert_eq!(resolve("tmsh show ltm pool {{chain.pool}}", &context), "tmsh show ltm pool web_pool");
/// assert_eq!(resolve("{{chain.missing}}", &context), "");
/// ```
pub fn resolve(template: &str, context: &Value) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |captures: &Captures| {
            lookup_path(context, &captures[1]).unwrap_or_else(|| captures[0].to_string())
        })
        .into_owned()
}

/// Resolves a templated parameter value.
///
/// Non-string values are rendered to text first, so the result is always a
/// JSON string.
pub fn resolve_value(value: &Value, context: &Value) -> Value {
    Value::String(resolve(&value_to_text(value), context))
}

/// Walks `path` through `root`. `None` means the placeholder stays verbatim.
///
/// The context is borrowed while walking objects; only values decoded from
/// embedded JSON strings are owned.
fn lookup_path(root: &Value, path: &str) -> Option<String> {
    let mut current = Cow::Borrowed(root);
    let mut embedded_hops = 0;

    for part in path.split('.') {
        current = match current {
            Cow::Borrowed(Value::Object(map)) => map.get(part).map_or_else(|| Cow::Owned(empty_value()), Cow::Borrowed),
            Cow::Owned(Value::Object(mut map)) => Cow::Owned(map.remove(part).unwrap_or_else(empty_value)),
            Cow::Borrowed(Value::String(text)) => Cow::Owned(embedded_hop(text, part, &mut embedded_hops)?),
            Cow::Owned(Value::String(text)) => Cow::Owned(embedded_hop(&text, part, &mut embedded_hops)?),
            _ => return None,
        };
    }

    Some(value_to_text(&current))
}

fn embedded_hop(text: &str, key: &str, hops: &mut usize) -> Option<Value> {
    *hops += 1;
    if *hops > MAX_EMBEDDED_JSON_DEPTH {
        return None;
    }
    descend_embedded(text, key)
}

/// Descends into `text` as if it were a JSON object.
fn descend_embedded(text: &str, key: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(mut map)) => Some(map.remove(key).unwrap_or_else(empty_value)),
        Ok(_) => None,
        Err(_) => EMBEDDED_OBJECT.find_iter(text).find_map(|fragment| {
            match serde_json::from_str::<Value>(fragment.as_str()) {
                Ok(Value::Object(mut map)) => map.remove(key),
                _ => None,
            }
        }),
    }
}

fn empty_value() -> Value {
    Value::String(String::new())
}
