//! Built-in chain templates offered to operators as starting points.

use crate::chain::{ChainDraft, ChainStep, ChainTrigger, FailurePolicy, Gate, ParamSpec};

/// The stock chain templates, in presentation order.
pub fn builtin_templates() -> Vec<ChainDraft> {
    vec![
        troubleshoot_connectivity(),
        pool_member_maintenance(),
        ecmp_scale_out(),
        ecmp_scale_in(),
    ]
}

fn troubleshoot_connectivity() -> ChainDraft {
    ChainDraft {
        name: "Troubleshoot Connectivity".into(),
        description: "Discover VS config, capture traffic, check ARP table, then analyze".into(),
        tags: tags(&["troubleshooting", "network"]),
        trigger: ChainTrigger::Manual,
        parameters: vec![
            ParamSpec::new("device", "Target Device", "device", true),
            ParamSpec::new("virtual_server", "Virtual Server", "string", true),
            ParamSpec::new("vip", "VIP Address", "string", false),
        ],
        steps: vec![
            ChainStep::new("bigip-vs-config", "Discover VS Config").with_param("virtual_server", "{{chain.virtual_server}}"),
            ChainStep::new("bigip-tcpdump", "Capture Traffic")
                .with_param("vip", "{{chain.vip}}")
                .with_param("duration", "10")
                .with_param("interface", "0.0:nnnp")
                .with_param("max_packets", "100")
                .with_failure_policy(FailurePolicy::Skip),
            ChainStep::new("bigip-arp-table", "Check ARP Table").with_failure_policy(FailurePolicy::Skip),
        ],
    }
}

fn pool_member_maintenance() -> ChainDraft {
    ChainDraft {
        name: "Pool Member Maintenance".into(),
        description: "Check pool status, disable member, verify drain".into(),
        tags: tags(&["maintenance", "pool"]),
        trigger: ChainTrigger::Manual,
        parameters: vec![
            ParamSpec::new("device", "Target Device", "device", true),
            ParamSpec::new("pool_name", "Pool Name", "string", true),
            ParamSpec::new("member", "Member to Disable", "string", true),
        ],
        steps: vec![
            ChainStep::new("bigip-pool-status", "Check Pool Health").with_param("pool_name", "{{chain.pool_name}}"),
            ChainStep::new("bigip-node-toggle", "Disable Pool Member")
                .with_param("node_name", "{{chain.member}}")
                .with_param("action", "disable")
                .with_gate(Gate::Approve),
            ChainStep::new("bigip-connection-table", "Monitor Drain").with_failure_policy(FailurePolicy::Skip),
        ],
    }
}

fn ecmp_scale_out() -> ChainDraft {
    ChainDraft {
        name: "ECMP Scale-Out".into(),
        description: "Provision VE, license, sync config, verify BGP, join fleet".into(),
        tags: tags(&["autoscale", "bgp", "ecmp"]),
        trigger: ChainTrigger::Webhook,
        parameters: vec![
            ParamSpec::new("device", "Master BIG-IP", "device", true),
            ParamSpec::new("cluster_id", "ECMP Cluster ID", "string", true),
        ],
        steps: vec![
            ChainStep::new("bigip-ve-provision", "Provision VE on Proxmox").with_param("cluster_id", "{{chain.cluster_id}}"),
            ChainStep::new("bigip-ve-license", "License from Pool")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("mgmt_ip", "{{steps.step-1.output.mgmt_ip}}"),
            ChainStep::new("bigip-config-sync", "Sync Config + BGP")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("mgmt_ip", "{{steps.step-1.output.mgmt_ip}}")
                .with_param("self_ip", "{{steps.step-1.output.self_ip}}"),
            ChainStep::new("bigip-bgp-verify", "Verify BGP Session")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("self_ip", "{{steps.step-1.output.self_ip}}")
                .with_param("mgmt_ip", "{{steps.step-1.output.mgmt_ip}}"),
            ChainStep::new("bigip-fleet-join", "Join Fleet")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("mgmt_ip", "{{steps.step-1.output.mgmt_ip}}")
                .with_param("hostname", "bigip-{{chain.cluster_id}}-{{steps.step-1.output.vmid}}")
                .with_gate(Gate::Approve),
        ],
    }
}

fn ecmp_scale_in() -> ChainDraft {
    ChainDraft {
        name: "ECMP Scale-In".into(),
        description: "Withdraw BGP, drain connections, leave fleet, destroy VE".into(),
        tags: tags(&["autoscale", "bgp", "ecmp"]),
        trigger: ChainTrigger::Webhook,
        parameters: vec![
            ParamSpec::new("device", "BIG-IP to Remove", "device", true),
            ParamSpec::new("cluster_id", "ECMP Cluster ID", "string", true),
            ParamSpec::new("hostname", "Device Hostname", "string", true),
            ParamSpec::new("vmid", "Proxmox VMID", "string", true),
            ParamSpec::new("mgmt_ip", "Management IP", "string", true),
            ParamSpec::new("self_ip", "Self-IP", "string", true),
        ],
        steps: vec![
            ChainStep::new("bigip-bgp-withdraw", "Withdraw BGP Route")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("self_ip", "{{chain.self_ip}}")
                .with_gate(Gate::Approve),
            ChainStep::new("bigip-connection-drain", "Drain Connections")
                .with_param("threshold", "10")
                .with_param("timeout_minutes", "10")
                .with_failure_policy(FailurePolicy::Skip),
            ChainStep::new("bigip-ve-license-revoke", "Revoke License")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("mgmt_ip", "{{chain.mgmt_ip}}")
                .with_failure_policy(FailurePolicy::Skip),
            ChainStep::new("bigip-fleet-leave", "Leave Fleet")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("hostname", "{{chain.hostname}}")
                .with_param("mgmt_ip", "{{chain.mgmt_ip}}")
                .with_param("self_ip", "{{chain.self_ip}}"),
            ChainStep::new("bigip-ve-deprovision", "Destroy VM")
                .with_param("cluster_id", "{{chain.cluster_id}}")
                .with_param("vmid", "{{chain.vmid}}")
                .with_gate(Gate::Approve),
        ],
    }
}

fn tags(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_are_listed_in_order() {
        let names: Vec<_> = builtin_templates().into_iter().map(|draft| draft.name).collect();
        assert_eq!(
            names,
            vec![
                "Troubleshoot Connectivity",
                "Pool Member Maintenance",
                "ECMP Scale-Out",
                "ECMP Scale-In"
            ]
        );
    }

    #[test]
    fn scale_out_forwards_provisioned_address() {
        let scale_out = builtin_templates().remove(2);
        assert_eq!(scale_out.trigger, ChainTrigger::Webhook);
        let license = &scale_out.steps[1];
        assert_eq!(
            license.parameters.get("mgmt_ip").and_then(|value| value.as_str()),
            Some("{{steps.step-1.output.mgmt_ip}}")
        );
        assert_eq!(scale_out.steps[4].gate, Gate::Approve);
    }

    #[test]
    fn scale_in_gates_its_first_step() {
        let scale_in = builtin_templates().remove(3);
        assert_eq!(scale_in.steps[0].gate, Gate::Approve);
        assert_eq!(scale_in.steps[1].on_failure, FailurePolicy::Skip);
        assert_eq!(scale_in.parameters.len(), 6);
    }
}
