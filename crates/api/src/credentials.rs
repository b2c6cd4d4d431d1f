//! Device credential lookup.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;

use opschain_types::DeviceCredentials;
use opschain_util::VaultSettings;

/// KV v2 mount holding device secrets.
const VAULT_MOUNT: &str = "secret";
/// Path under the mount where device entries live.
const DEVICE_PATH: &str = "devices";

/// Source of per-device credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `hostname`, or `None` when the vault has no entry.
    async fn get(&self, hostname: &str) -> Result<Option<DeviceCredentials>>;
}

/// Credentials stored in a KV v2 secrets engine at `secret/devices/<hostname>`.
pub struct VaultCredentialStore {
    http: Client,
    addr: String,
    token: Option<String>,
}

impl VaultCredentialStore {
    pub fn new(settings: &VaultSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build vault http client")?;
        Ok(Self {
            http,
            addr: settings.addr.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
        })
    }

    fn device_url(&self, hostname: &str) -> String {
        format!("{}/v1/{VAULT_MOUNT}/data/{DEVICE_PATH}/{hostname}", self.addr)
    }
}

#[async_trait]
impl CredentialStore for VaultCredentialStore {
    async fn get(&self, hostname: &str) -> Result<Option<DeviceCredentials>> {
        let token = self.token.as_deref().ok_or_else(|| anyhow!("no vault token configured"))?;
        let response = self
            .http
            .get(self.device_url(hostname))
            .header("X-Vault-Token", token)
            .send()
            .await
            .with_context(|| format!("vault request for '{hostname}'"))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(hostname, "no vault entry for device");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Vault read failed ({}): {}", status.as_u16(), body));
        }

        let body: Value = response.json().await.context("parse vault response")?;
        parse_secret(&body).map(Some)
    }
}

/// Extract `data.data` from a KV v2 read response.
fn parse_secret(body: &Value) -> Result<DeviceCredentials> {
    let data = body.get("data").and_then(|data| data.get("data")).cloned().unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(data).context("decode device credentials")
}

/// Fixed credential map for tests and offline runs.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    devices: Mutex<HashMap<String, DeviceCredentials>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, hostname: impl Into<String>, credentials: DeviceCredentials) {
        self.devices.lock().expect("credential store lock poisoned").insert(hostname.into(), credentials);
    }

    pub fn with_device(self, hostname: impl Into<String>, credentials: DeviceCredentials) -> Self {
        self.insert(hostname, credentials);
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, hostname: &str) -> Result<Option<DeviceCredentials>> {
        Ok(self.devices.lock().expect("credential store lock poisoned").get(hostname).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_payload_keeps_extra_fields() {
        let body = json!({
            "data": {
                "data": {
                    "username": "admin",
                    "password": "secret",
                    "mgmt_ip": "10.0.0.5",
                    "port": 22,
                    "device_type": "bigip",
                    "proxmox_host": "10.1.1.10"
                },
                "metadata": {"version": 3}
            }
        });
        let credentials = parse_secret(&body).unwrap();
        assert_eq!(credentials.username, "admin");
        assert_eq!(credentials.mgmt_ip, "10.0.0.5");
        assert_eq!(credentials.extra_text("proxmox_host").as_deref(), Some("10.1.1.10"));
    }

    #[test]
    fn device_url_follows_kv_layout() {
        let store = VaultCredentialStore::new(&VaultSettings {
            addr: "http://vault:8200/".into(),
            token: Some("s.token".into()),
        })
        .unwrap();
        assert_eq!(store.device_url("bigip01"), "http://vault:8200/v1/secret/data/devices/bigip01");
    }

    #[tokio::test]
    async fn missing_token_is_an_error() {
        let store = VaultCredentialStore::new(&VaultSettings {
            addr: "http://127.0.0.1:8200".into(),
            token: None,
        })
        .unwrap();
        assert!(store.get("bigip01").await.is_err());
    }

    #[tokio::test]
    async fn in_memory_store_returns_inserted_devices() {
        let store = InMemoryCredentialStore::new().with_device("bigip01", DeviceCredentials::default());
        assert!(store.get("bigip01").await.unwrap().is_some());
        assert!(store.get("bigip02").await.unwrap().is_none());
    }
}
