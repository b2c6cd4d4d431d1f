//! Cluster definitions flattened into chain parameters.
//!
//! A cluster file groups the hypervisor, routing, primary-device and licensing
//! settings of one scale-out deployment. Chains that run against a cluster
//! receive those settings as flat `{{key}}` parameters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use opschain_types::{ParamMap, value_to_text};
use serde_json::{Value, json};

use crate::store::{JsonDirectory, StoreError};

/// Source of flattened cluster parameters.
pub trait ClusterPool: Send + Sync {
    /// Flattened parameters for `cluster_id`, or `None` for an unknown cluster.
    fn flattened_params(&self, cluster_id: &str) -> Result<Option<ParamMap>, StoreError>;
}

/// Flatten a raw cluster document into the well-known parameter keys.
///
/// Missing sections and keys fall back to the deployment defaults
/// (`proxmox_port` 8006, `proxmox_node` pve01, `template_vmid` 9000, ...).
pub fn flatten_cluster(cluster_id: &str, cluster: &Value) -> ParamMap {
    let section = |name: &str| cluster.get(name).filter(|value| value.is_object()).cloned().unwrap_or_else(|| json!({}));
    let pve = section("proxmox");
    let bgp = section("bgp");
    let master = section("master");
    let license = section("license");

    let field = |source: &Value, key: &str, default: Value| source.get(key).filter(|value| !value.is_null()).cloned().unwrap_or(default);

    let token_id = field(&pve, "token_id", json!(""));
    let token_secret = field(&pve, "token_secret", json!(""));

    let entries = [
        ("cluster_id", json!(cluster_id)),
        ("proxmox_host", field(&pve, "host", json!(""))),
        ("proxmox_port", field(&pve, "port", json!(8006))),
        ("proxmox_node", field(&pve, "node", json!("pve01"))),
        ("proxmox_token", json!(format!("{}={}", value_to_text(&token_id), value_to_text(&token_secret)))),
        ("proxmox_token_id", token_id),
        ("proxmox_token_secret", token_secret),
        ("template_vmid", field(&pve, "template_vmid", json!(9000))),
        ("cores", field(&pve, "cores", json!(4))),
        ("memory_mb", field(&pve, "memory_mb", json!(8192))),
        ("local_asn", field(&bgp, "local_asn", json!(65001))),
        ("remote_asn", field(&bgp, "remote_asn", json!(65000))),
        ("frr_peer_ip", field(&bgp, "frr_peer_ip", json!(""))),
        ("frr_ip", field(&bgp, "frr_ip", json!(""))),
        ("frr_user", field(&bgp, "frr_user", json!("admin"))),
        ("vip_network", field(&bgp, "vip_network", json!(""))),
        ("bgp_vlan", field(&bgp, "bgp_vlan", json!(10))),
        ("client_vlan", field(&bgp, "client_vlan", json!(20))),
        ("master_ip", field(&master, "mgmt_ip", json!(""))),
        ("master_user", field(&master, "user", json!("admin"))),
        ("master_pass", field(&master, "pass", json!(""))),
        ("license_pool", field(&license, "pool_name", json!(""))),
        ("bigiq_host", field(&license, "bigiq_host", json!(""))),
        ("insight_host", field(cluster, "insight_host", json!(""))),
        ("proxmox_ssh_user", field(&pve, "ssh_user", json!("root"))),
        ("proxmox_ssh_pass", field(&pve, "ssh_pass", json!(""))),
    ];
    entries.into_iter().map(|(key, value)| (key.to_string(), value)).collect()
}

/// Cluster documents stored as `<data_dir>/clusters/<id>.json`.
pub struct JsonClusterPool {
    dir: JsonDirectory,
}

impl JsonClusterPool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: JsonDirectory::new(dir),
        }
    }
}

impl ClusterPool for JsonClusterPool {
    fn flattened_params(&self, cluster_id: &str) -> Result<Option<ParamMap>, StoreError> {
        let cluster: Option<Value> = self.dir.read(cluster_id)?;
        Ok(cluster.map(|cluster| flatten_cluster(cluster_id, &cluster)))
    }
}

/// In-memory cluster pool useful for tests.
#[derive(Default)]
pub struct InMemoryClusterPool {
    clusters: Mutex<HashMap<String, Value>>,
}

impl InMemoryClusterPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, cluster_id: impl Into<String>, cluster: Value) {
        self.clusters.lock().expect("cluster pool lock poisoned").insert(cluster_id.into(), cluster);
    }
}

impl ClusterPool for InMemoryClusterPool {
    fn flattened_params(&self, cluster_id: &str) -> Result<Option<ParamMap>, StoreError> {
        let clusters = self.clusters.lock().expect("cluster pool lock poisoned");
        Ok(clusters.get(cluster_id).map(|cluster| flatten_cluster(cluster_id, cluster)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_cluster_uses_defaults() {
        let params = flatten_cluster("c1", &json!({}));
        assert_eq!(params["cluster_id"], json!("c1"));
        assert_eq!(params["proxmox_port"], json!(8006));
        assert_eq!(params["proxmox_node"], json!("pve01"));
        assert_eq!(params["proxmox_token"], json!("="));
        assert_eq!(params["template_vmid"], json!(9000));
        assert_eq!(params["local_asn"], json!(65001));
        assert_eq!(params["remote_asn"], json!(65000));
        assert_eq!(params["frr_user"], json!("admin"));
        assert_eq!(params["bgp_vlan"], json!(10));
        assert_eq!(params["client_vlan"], json!(20));
        assert_eq!(params["master_user"], json!("admin"));
        assert_eq!(params["proxmox_ssh_user"], json!("root"));
        assert_eq!(params.len(), 26);
    }

    #[test]
    fn sections_are_flattened() {
        let cluster = json!({
            "proxmox": {"host": "10.1.1.10", "token_id": "root@pam!ops", "token_secret": "abc", "cores": 8},
            "bgp": {"frr_peer_ip": "10.2.0.1", "local_asn": 64512},
            "master": {"mgmt_ip": "10.0.0.5", "user": "ops", "pass": "secret"},
            "license": {"pool_name": "ve-pool", "bigiq_host": "10.0.0.9"},
            "insight_host": "10.0.0.20"
        });
        let params = flatten_cluster("edge", &cluster);
        assert_eq!(params["proxmox_host"], json!("10.1.1.10"));
        assert_eq!(params["proxmox_token"], json!("root@pam!ops=abc"));
        assert_eq!(params["cores"], json!(8));
        assert_eq!(params["local_asn"], json!(64512));
        assert_eq!(params["master_ip"], json!("10.0.0.5"));
        assert_eq!(params["master_user"], json!("ops"));
        assert_eq!(params["license_pool"], json!("ve-pool"));
        assert_eq!(params["insight_host"], json!("10.0.0.20"));
    }

    #[test]
    fn json_pool_reads_cluster_files() {
        let dir = tempdir().unwrap();
        JsonDirectory::new(dir.path()).write("edge", &json!({"proxmox": {"host": "pve.lab"}})).unwrap();
        let pool = JsonClusterPool::new(dir.path());
        let params = pool.flattened_params("edge").unwrap().unwrap();
        assert_eq!(params["proxmox_host"], json!("pve.lab"));
        assert!(pool.flattened_params("missing").unwrap().is_none());
    }
}
