use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{Value, json};
use tracing::debug;

use opschain_types::value_to_text;
use opschain_util::redact_sensitive;

use super::{DEVICE_BASH_ENDPOINT, HypervisorCall, LocalApiCall, RestCall, TransportOutcome};

/// Methods accepted by the device management and local APIs.
const REST_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];
/// Methods accepted by the hypervisor API.
const HYPERVISOR_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];

fn parse_method(method: &str, allowed: &[&str]) -> Option<Method> {
    let upper = method.trim().to_ascii_uppercase();
    if !allowed.contains(&upper.as_str()) {
        return None;
    }
    Method::from_bytes(upper.as_bytes()).ok()
}

fn sends_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn body_or_empty(payload: Option<&Value>) -> Value {
    payload.cloned().unwrap_or_else(|| json!({}))
}

/// Turn a response into an outcome: pretty JSON when the body parses, raw text otherwise.
async fn outcome_from_response(response: Response) -> TransportOutcome {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let output = match serde_json::from_str::<Value>(&text) {
        Ok(body) => serde_json::to_string_pretty(&body).unwrap_or(text),
        Err(_) => text,
    };
    let success = status.is_success();
    TransportOutcome {
        output,
        error: (!success).then(|| format!("HTTP {}", status.as_u16())),
        exit_status: if success { 0 } else { i32::from(status.as_u16()) },
        success,
    }
}

fn timed_out(timeout_secs: u64) -> TransportOutcome {
    TransportOutcome {
        output: format!("Request timed out after {timeout_secs}s."),
        error: Some("Timeout".into()),
        exit_status: -1,
        success: false,
    }
}

/// Send `request`, mapping transport errors with the given message prefixes.
async fn send(request: RequestBuilder, timeout_secs: u64, connect_prefix: &str, other_prefix: &str) -> TransportOutcome {
    match request.timeout(Duration::from_secs(timeout_secs.max(1))).send().await {
        Ok(response) => outcome_from_response(response).await,
        Err(error) if error.is_timeout() => timed_out(timeout_secs),
        Err(error) if error.is_connect() => TransportOutcome::failed(format!("{connect_prefix}: {error}")),
        Err(error) => TransportOutcome::failed(format!("{other_prefix}: {error}")),
    }
}

pub(super) async fn device_rest(http: &Client, call: &RestCall) -> TransportOutcome {
    let Some(method) = parse_method(&call.method, REST_METHODS) else {
        return TransportOutcome::failed(format!("Unsupported method: {}", call.method));
    };
    let url = format!("https://{}:{}{}", call.host, call.port, call.endpoint);
    debug!(%method, url = %redact_sensitive(&url), "device api request");

    let mut request = http
        .request(method.clone(), url)
        .basic_auth(&call.username, Some(&call.password))
        .header(reqwest::header::CONTENT_TYPE, "application/json");
    if sends_body(&method) {
        request = request.json(&body_or_empty(call.payload.as_ref()));
    }
    send(request, call.timeout_secs, "Connection failed", "REST error").await
}

pub(super) async fn device_bash(http: &Client, mut call: RestCall, command: &str) -> TransportOutcome {
    call.method = "POST".into();
    call.endpoint = DEVICE_BASH_ENDPOINT.into();
    call.payload = Some(json!({
        "command": "run",
        "utilCmdArgs": format!("-c '{command}'"),
    }));

    let mut outcome = device_rest(http, &call).await;
    if outcome.success
        && let Ok(body) = serde_json::from_str::<Value>(&outcome.output)
        && let Some(result) = body.get("commandResult")
    {
        outcome.output = value_to_text(result);
    }
    outcome
}

pub(super) async fn hypervisor(http: &Client, call: &HypervisorCall) -> TransportOutcome {
    let Some(method) = parse_method(&call.method, HYPERVISOR_METHODS) else {
        return TransportOutcome::failed(format!("Unsupported method: {}", call.method));
    };
    let url = format!("https://{}:{}{}", call.host, call.port, call.endpoint);
    debug!(%method, %url, "hypervisor api request");

    let mut request = http
        .request(method.clone(), url)
        .header(reqwest::header::AUTHORIZATION, format!("PVEAPIToken={}={}", call.token_id, call.token_secret))
        .header(reqwest::header::CONTENT_TYPE, "application/json");
    if method == Method::DELETE {
        request = request.query(&query_pairs(call.payload.as_ref()));
    } else if sends_body(&method) {
        request = request.json(&body_or_empty(call.payload.as_ref()));
    }
    send(request, call.timeout_secs, "Proxmox connection failed", "Proxmox API error").await
}

pub(super) async fn local_api(http: &Client, base: &str, call: &LocalApiCall) -> TransportOutcome {
    let Some(method) = parse_method(&call.method, REST_METHODS) else {
        return TransportOutcome::failed(format!("Unsupported method: {}", call.method));
    };
    let url = format!("{base}{}", call.endpoint);
    debug!(%method, %url, "local api request");

    let mut request = http.request(method.clone(), url);
    if sends_body(&method) {
        request = request.json(&body_or_empty(call.payload.as_ref()));
    }
    send(request, call.timeout_secs, "Local API error", "Local API error").await
}

/// Flatten a JSON object payload into query parameters.
fn query_pairs(payload: Option<&Value>) -> Vec<(String, String)> {
    match payload {
        Some(Value::Object(map)) => map.iter().map(|(key, value)| (key.clone(), value_to_text(value))).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_checked_per_api() {
        assert_eq!(parse_method("get", REST_METHODS), Some(Method::GET));
        assert_eq!(parse_method("PATCH", REST_METHODS), Some(Method::PATCH));
        assert_eq!(parse_method("PATCH", HYPERVISOR_METHODS), None);
        assert_eq!(parse_method("LIST", REST_METHODS), None);
    }

    #[test]
    fn delete_payload_becomes_query_pairs() {
        let pairs = query_pairs(Some(&json!({"purge": 1, "destroy-unreferenced-disks": true})));
        assert!(pairs.contains(&("purge".to_string(), "1".to_string())));
        assert!(pairs.contains(&("destroy-unreferenced-disks".to_string(), "true".to_string())));
        assert!(query_pairs(None).is_empty());
    }

    #[tokio::test]
    async fn unsupported_method_fails_without_io() {
        let http = Client::new();
        let call = RestCall {
            host: "10.0.0.5".into(),
            port: 443,
            username: "admin".into(),
            password: "secret".into(),
            method: "TRACE".into(),
            endpoint: "/mgmt/tm/sys".into(),
            payload: None,
            timeout_secs: 5,
        };
        let outcome = device_rest(&http, &call).await;
        assert_eq!(outcome.error.as_deref(), Some("Unsupported method: TRACE"));
    }
}
