//! Step transports.
//!
//! A [`TransportRequest`] is a fully resolved call: host, credentials,
//! command or endpoint, and timeout. Transports never return `Err` for
//! device-side failures (bad status, non-zero exit, timeout); those come back
//! as an unsuccessful [`TransportOutcome`] carrying the error text shown to
//! operators. `Err` is reserved for faults in the transport itself.

mod http;
mod ssh;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use opschain_util::redact_sensitive;

/// HTTPS port of the device management API.
pub const DEVICE_REST_PORT: u16 = 443;
/// Default hypervisor API port.
pub const HYPERVISOR_PORT: u16 = 8006;
/// Endpoint used to run shell commands through the device management API.
pub const DEVICE_BASH_ENDPOINT: &str = "/mgmt/tm/util/bash";
/// Endpoints with this prefix are served by the local administrative API.
pub const LOCAL_API_PREFIX: &str = "/api/";

/// Remote shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// PEM private key; when present, key authentication is used instead of the password.
    pub private_key: Option<String>,
    pub command: String,
    pub timeout_secs: u64,
}

/// Device management API call with basic authentication.
#[derive(Debug, Clone, PartialEq)]
pub struct RestCall {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub method: String,
    pub endpoint: String,
    pub payload: Option<Value>,
    pub timeout_secs: u64,
}

/// Hypervisor API call authenticated with an API token.
#[derive(Debug, Clone, PartialEq)]
pub struct HypervisorCall {
    pub host: String,
    pub port: u16,
    pub token_id: String,
    pub token_secret: String,
    pub method: String,
    pub endpoint: String,
    pub payload: Option<Value>,
    pub timeout_secs: u64,
}

/// Call against the local administrative API.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalApiCall {
    pub method: String,
    pub endpoint: String,
    pub payload: Option<Value>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Shell(ShellCommand),
    DeviceRest(RestCall),
    /// Shell command run through the device management API; only the
    /// connection fields of `call` are used.
    DeviceBash { call: RestCall, command: String },
    Hypervisor(HypervisorCall),
    LocalApi(LocalApiCall),
}

impl TransportRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportRequest::Shell(_) => "ssh",
            TransportRequest::DeviceRest(_) => "icontrol_rest",
            TransportRequest::DeviceBash { .. } => "icontrol_bash",
            TransportRequest::Hypervisor(_) => "proxmox_api",
            TransportRequest::LocalApi(_) => "local_api",
        }
    }

    /// Host the request is sent to; empty for the local API.
    pub fn host(&self) -> &str {
        match self {
            TransportRequest::Shell(shell) => &shell.host,
            TransportRequest::DeviceRest(call) | TransportRequest::DeviceBash { call, .. } => &call.host,
            TransportRequest::Hypervisor(call) => &call.host,
            TransportRequest::LocalApi(_) => "",
        }
    }
}

/// Result of one transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOutcome {
    pub output: String,
    pub error: Option<String>,
    /// Process exit code, `0`/HTTP status for API calls, `-1` when nothing ran.
    pub exit_status: i32,
    pub success: bool,
}

impl TransportOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            error: None,
            exit_status: 0,
            success: true,
        }
    }

    /// A call that never produced a device response.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(error.into()),
            exit_status: -1,
            success: false,
        }
    }
}

/// Executes resolved step requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, request: TransportRequest) -> Result<TransportOutcome>;
}

/// Transport that performs no I/O and echoes the request, for previews and tests.
pub struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn run(&self, request: TransportRequest) -> Result<TransportOutcome> {
        let detail = match &request {
            TransportRequest::Shell(shell) => shell.command.clone(),
            TransportRequest::DeviceRest(call) => format!("{} {}", call.method, call.endpoint),
            TransportRequest::DeviceBash { command, .. } => command.clone(),
            TransportRequest::Hypervisor(call) => format!("{} {}", call.method, call.endpoint),
            TransportRequest::LocalApi(call) => format!("{} {}", call.method, call.endpoint),
        };
        Ok(TransportOutcome::succeeded(format!("[noop {}] {} {}", request.kind(), request.host(), detail)))
    }
}

/// Transport that reaches real devices: the system `ssh` client for shell
/// commands and HTTPS for the management and hypervisor APIs.
///
/// Device certificates are not verified; lab devices ship self-signed certs.
pub struct DeviceTransport {
    device_http: Client,
    local_http: Client,
    local_api_base: String,
    ssh: ssh::SshPrograms,
}

impl DeviceTransport {
    /// Build the HTTP clients. `local_api_base` has no trailing slash.
    pub fn new(local_api_base: impl Into<String>) -> Result<Self> {
        let device_http = Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build device http client")?;
        let local_http = Client::builder().build().context("build local api http client")?;
        Ok(Self {
            device_http,
            local_http,
            local_api_base: local_api_base.into().trim_end_matches('/').to_string(),
            ssh: ssh::SshPrograms::default(),
        })
    }
}

#[async_trait]
impl Transport for DeviceTransport {
    async fn run(&self, request: TransportRequest) -> Result<TransportOutcome> {
        debug!(transport = request.kind(), host = request.host(), "dispatching transport request");
        let outcome = match request {
            TransportRequest::Shell(shell) => {
                debug!(host = %shell.host, command = %redact_sensitive(&shell.command), "running remote shell command");
                ssh::run_shell(&self.ssh, &shell).await?
            }
            TransportRequest::DeviceRest(call) => http::device_rest(&self.device_http, &call).await,
            TransportRequest::DeviceBash { call, command } => http::device_bash(&self.device_http, call, &command).await,
            TransportRequest::Hypervisor(call) => http::hypervisor(&self.device_http, &call).await,
            TransportRequest::LocalApi(call) => http::local_api(&self.local_http, &self.local_api_base, &call).await,
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_transport_echoes_request() {
        let request = TransportRequest::DeviceRest(RestCall {
            host: "10.0.0.5".into(),
            port: DEVICE_REST_PORT,
            username: "admin".into(),
            password: "secret".into(),
            method: "GET".into(),
            endpoint: "/mgmt/tm/sys/version".into(),
            payload: None,
            timeout_secs: 30,
        });
        let outcome = NoopTransport.run(request).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "[noop icontrol_rest] 10.0.0.5 GET /mgmt/tm/sys/version");
    }

    #[test]
    fn failed_outcome_has_no_output() {
        let outcome = TransportOutcome::failed("Connection error: refused");
        assert!(!outcome.success);
        assert_eq!(outcome.exit_status, -1);
        assert!(outcome.output.is_empty());
    }
}
