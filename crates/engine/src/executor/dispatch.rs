//! Turning a resolved skill step into a transport request.

use serde_json::Value;
use tracing::info;

use opschain_api::transport::{DEVICE_BASH_ENDPOINT, DEVICE_REST_PORT, HYPERVISOR_PORT, LOCAL_API_PREFIX};
use opschain_api::{HypervisorCall, LocalApiCall, RestCall, ShellCommand, TransportRequest};
use opschain_types::device::DEFAULT_SSH_PORT;
use opschain_types::params::non_empty_text;
use opschain_types::{DeviceCredentials, ParamMap, StepDefinition, StepTarget, TransportKind};

const DEFAULT_PROXMOX_SSH_USER: &str = "root";

/// Host and credential pair a step connects with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Connection {
    pub host: String,
    pub username: String,
    pub password: String,
    pub private_key: Option<String>,
}

/// Device a skill runs against, as resolved from the credential store.
pub(crate) struct DeviceTarget<'a> {
    pub credentials: &'a DeviceCredentials,
    /// Management address of the device.
    pub host: String,
}

impl<'a> DeviceTarget<'a> {
    pub fn new(credentials: &'a DeviceCredentials, hostname: &str) -> Self {
        Self {
            credentials,
            host: credentials.host_or(hostname).to_string(),
        }
    }

    fn ssh_port(&self) -> u16 {
        if self.credentials.port == 0 { DEFAULT_SSH_PORT } else { self.credentials.port }
    }
}

/// Pick the host and credentials for `step`.
///
/// `replica` steps talk to an address produced earlier in the execution and
/// prefer credentials from the running parameters; `proxmox` shell steps talk
/// to the hypervisor itself. Every other step uses the device.
pub(crate) fn select_connection(step: &StepDefinition, device: &DeviceTarget<'_>, running: &ParamMap) -> Connection {
    let credentials = device.credentials;
    let rest_family = step.transport.uses_rest_credentials();

    match step.target {
        StepTarget::Replica if rest_family || step.transport == TransportKind::Ssh => {
            let host = ["target_host", "dhcp_ip", "mgmt_ip"]
                .iter()
                .find_map(|key| non_empty_text(running, key))
                .unwrap_or_else(|| device.host.clone());
            let (user_key, pass_key, fallback_user, fallback_pass) = if rest_family {
                ("rest_user", "rest_pass", credentials.rest_user(), credentials.rest_pass())
            } else {
                ("ssh_user", "ssh_pass", credentials.username.as_str(), credentials.password.as_str())
            };
            info!(step = %step.name, %host, "step targeting replica");
            Connection {
                host,
                username: non_empty_text(running, user_key).unwrap_or_else(|| fallback_user.to_string()),
                password: non_empty_text(running, pass_key).unwrap_or_else(|| fallback_pass.to_string()),
                private_key: None,
            }
        }
        StepTarget::Proxmox if step.transport == TransportKind::Ssh => {
            let host = non_empty_text(running, "proxmox_host").unwrap_or_else(|| device.host.clone());
            info!(step = %step.name, %host, "step targeting hypervisor host");
            Connection {
                host,
                username: non_empty_text(running, "proxmox_ssh_user").unwrap_or_else(|| DEFAULT_PROXMOX_SSH_USER.to_string()),
                password: non_empty_text(running, "proxmox_ssh_pass").unwrap_or_default(),
                private_key: None,
            }
        }
        _ => {
            let (username, password) = if rest_family {
                (credentials.rest_user(), credentials.rest_pass())
            } else {
                (credentials.username.as_str(), credentials.password.as_str())
            };
            Connection {
                host: device.host.clone(),
                username: username.to_string(),
                password: password.to_string(),
                private_key: if step.target.is_device() { credentials.private_key().map(str::to_string) } else { None },
            }
        }
    }
}

/// A REST command written as `METHOD /endpoint {json}`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ApiCommand {
    pub method: String,
    pub endpoint: String,
    pub payload: Option<Value>,
}

impl ApiCommand {
    /// Split at the first `{`: the text before it is the method and endpoint,
    /// the rest is the JSON payload. A payload that does not parse is dropped.
    pub fn parse(command: &str) -> Self {
        let (header, payload) = match command.find('{') {
            Some(start) if start > 0 => (&command[..start], serde_json::from_str(&command[start..]).ok()),
            _ => (command, None),
        };
        let header = header.trim();
        let (method, endpoint) = match header.split_once(char::is_whitespace) {
            Some((method, endpoint)) => (method, endpoint.trim()),
            None => (header, ""),
        };
        Self {
            method: if method.is_empty() { "GET".into() } else { method.to_string() },
            endpoint: if endpoint.is_empty() { "/".into() } else { endpoint.to_string() },
            payload,
        }
    }
}

/// Build the transport request for one resolved step.
pub(crate) fn build_request(
    step: &StepDefinition,
    command: &str,
    connection: Connection,
    device: &DeviceTarget<'_>,
    running: &ParamMap,
) -> TransportRequest {
    let rest_call = |method: String, endpoint: String, payload: Option<Value>, connection: Connection| RestCall {
        host: connection.host,
        port: DEVICE_REST_PORT,
        username: connection.username,
        password: connection.password,
        method,
        endpoint,
        payload,
        timeout_secs: step.timeout,
    };

    match step.transport {
        TransportKind::IcontrolRest => {
            let api = ApiCommand::parse(command);
            TransportRequest::DeviceRest(rest_call(api.method, api.endpoint, api.payload, connection))
        }
        TransportKind::IcontrolBash => TransportRequest::DeviceBash {
            call: rest_call("POST".into(), DEVICE_BASH_ENDPOINT.into(), None, connection),
            command: command.to_string(),
        },
        TransportKind::ProxmoxApi => hypervisor_request(ApiCommand::parse(command), device, running, step.timeout),
        TransportKind::Ssh | TransportKind::Unknown => TransportRequest::Shell(ShellCommand {
            host: connection.host,
            port: device.ssh_port(),
            username: connection.username,
            password: connection.password,
            private_key: connection.private_key,
            command: command.to_string(),
            timeout_secs: step.timeout,
        }),
    }
}

/// Hypervisor settings come from the device record first, then the running
/// parameters; `/api/` endpoints go to the local administrative API.
fn hypervisor_request(api: ApiCommand, device: &DeviceTarget<'_>, running: &ParamMap, timeout_secs: u64) -> TransportRequest {
    if api.endpoint.starts_with(LOCAL_API_PREFIX) {
        return TransportRequest::LocalApi(LocalApiCall {
            method: api.method,
            endpoint: api.endpoint,
            payload: api.payload,
            timeout_secs,
        });
    }

    let lookup = |key: &str| device.credentials.extra_text(key).or_else(|| non_empty_text(running, key));
    TransportRequest::Hypervisor(HypervisorCall {
        host: lookup("proxmox_host").unwrap_or_else(|| device.host.clone()),
        port: lookup("proxmox_port")
            .and_then(|port| port.trim().parse().ok())
            .unwrap_or(HYPERVISOR_PORT),
        token_id: lookup("proxmox_token_id").unwrap_or_default(),
        token_secret: lookup("proxmox_token_secret").unwrap_or_default(),
        method: api.method,
        endpoint: api.endpoint,
        payload: api.payload,
        timeout_secs,
    })
}
