//! Device credentials as returned by the credential store.

use serde::{Deserialize, Serialize};

use crate::params::{ParamMap, non_empty_text};

/// Default SSH port when the stored record carries none.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Credentials and addressing for one managed device.
///
/// Keys the store returns beyond the well-known set (for example
/// `proxmox_host` or `proxmox_token_id` on autoscaled devices) are kept in
/// `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeviceCredentials {
    #[serde(default)]
    pub mgmt_ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest_password: Option<String>,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(flatten)]
    pub extra: ParamMap,
}

impl DeviceCredentials {
    /// Management address, or `hostname` when the record has none.
    pub fn host_or<'a>(&'a self, hostname: &'a str) -> &'a str {
        if self.mgmt_ip.is_empty() { hostname } else { &self.mgmt_ip }
    }

    /// REST user, falling back to the SSH user.
    pub fn rest_user(&self) -> &str {
        self.rest_username.as_deref().filter(|user| !user.is_empty()).unwrap_or(&self.username)
    }

    /// REST password, falling back to the SSH password.
    pub fn rest_pass(&self) -> &str {
        self.rest_password
            .as_deref()
            .filter(|password| !password.is_empty())
            .unwrap_or(&self.password)
    }

    /// Private key text when one is stored.
    pub fn private_key(&self) -> Option<&str> {
        self.ssh_private_key.as_deref().filter(|key| !key.trim().is_empty())
    }

    /// Non-empty value of an extra key.
    pub fn extra_text(&self, key: &str) -> Option<String> {
        non_empty_text(&self.extra, key)
    }
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_device_type() -> String {
    "bigip".into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_keys_land_in_extra() {
        let creds: DeviceCredentials = serde_json::from_value(json!({
            "mgmt_ip": "10.0.0.10",
            "username": "root",
            "password": "default",
            "proxmox_host": "10.0.0.2",
            "tags": ["lab"]
        }))
        .unwrap();
        assert_eq!(creds.port, DEFAULT_SSH_PORT);
        assert_eq!(creds.device_type, "bigip");
        assert_eq!(creds.extra_text("proxmox_host").as_deref(), Some("10.0.0.2"));
        assert!(creds.extra.contains_key("tags"));
    }

    #[test]
    fn rest_credentials_fall_back_to_ssh_pair() {
        let mut creds = DeviceCredentials {
            username: "root".into(),
            password: "ssh-secret".into(),
            rest_username: Some(String::new()),
            ..DeviceCredentials::default()
        };
        assert_eq!(creds.rest_user(), "root");
        assert_eq!(creds.rest_pass(), "ssh-secret");
        creds.rest_username = Some("admin".into());
        creds.rest_password = Some("rest-secret".into());
        assert_eq!(creds.rest_user(), "admin");
        assert_eq!(creds.rest_pass(), "rest-secret");
    }

    #[test]
    fn host_falls_back_to_hostname() {
        let creds = DeviceCredentials::default();
        assert_eq!(creds.host_or("bigip01.lab"), "bigip01.lab");
    }
}
