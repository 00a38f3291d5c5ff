//! Security policies of node groups.
//!
//! Talos nodes need two ports reachable from wherever the cluster is administered: the
//! Kubernetes API (6443) and the Talos API (50000-50001). Between nodes of the same group all
//! traffic is allowed.
//!
//! Traffic between different groups is never allowed implicitly. If two groups use different
//! policies, the composing code has to call [`allow_mutual_traffic`] (see
//! [`crate::cluster::assemble_cluster`]).
use serde::{Deserialize, Serialize};

use crate::{
    constants::{KUBERNETES_API_PORT, TALOS_API_PORT_END, TALOS_API_PORT_START},
    provision::{
        IngressRule, NetworkHandle, Peer, Ports, Provisioner, Result, SecurityPolicyHandle,
        SecurityPolicyProps,
    },
};

pub const NODE_SECURITY_POLICY_DESCRIPTION: &str = "Talos Control Plane Security Group";
pub const WORKER_SECURITY_POLICY_DESCRIPTION: &str = "Talos Security Group";

/// Where the security policy of a node group comes from.
///
/// Written as `{type: managed, allowTrafficFrom: <peer>}` or
/// `{type: existing, securityPolicy: <id>}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", deny_unknown_fields, rename_all = "camelCase")]
pub enum SecurityPolicySource {
    /// Declare a policy opening the Kubernetes and Talos APIs to `allow_traffic_from`.
    #[serde(rename_all = "camelCase")]
    Managed {
        #[serde(default)]
        allow_traffic_from: Peer,
    },

    /// Use a policy declared elsewhere as-is.
    #[serde(rename_all = "camelCase")]
    Existing {
        security_policy: SecurityPolicyHandle,
    },
}

impl Default for SecurityPolicySource {
    fn default() -> Self {
        Self::Managed {
            allow_traffic_from: Peer::AnyIpv4,
        }
    }
}

/// Returns the policy described by `source`, declaring it first if it is managed.
pub fn resolve_security_policy<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    id: &str,
    network: &NetworkHandle,
    source: &SecurityPolicySource,
) -> Result<SecurityPolicyHandle> {
    match source {
        SecurityPolicySource::Managed { allow_traffic_from } => {
            declare_node_security_policy(provisioner, id, network, allow_traffic_from)
        }
        SecurityPolicySource::Existing { security_policy } => Ok(security_policy.clone()),
    }
}

/// Declares the default policy of Talos nodes.
pub fn declare_node_security_policy<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    id: &str,
    network: &NetworkHandle,
    allow_traffic_from: &Peer,
) -> Result<SecurityPolicyHandle> {
    let policy = provisioner.declare_security_policy(
        id,
        SecurityPolicyProps {
            network: network.clone(),
            description: NODE_SECURITY_POLICY_DESCRIPTION.to_owned(),
            allow_all_outbound: true,
        },
    )?;

    provisioner.add_ingress_rule(
        &policy,
        IngressRule {
            peer: allow_traffic_from.clone(),
            ports: Ports::tcp(KUBERNETES_API_PORT),
            description: "Kubernetes API".to_owned(),
        },
    )?;
    provisioner.add_ingress_rule(
        &policy,
        IngressRule {
            peer: allow_traffic_from.clone(),
            ports: Ports::Tcp {
                from: TALOS_API_PORT_START,
                to: TALOS_API_PORT_END,
            },
            description: "Talos API".to_owned(),
        },
    )?;
    provisioner.add_ingress_rule(
        &policy,
        IngressRule {
            peer: Peer::SecurityPolicy {
                security_policy: policy.clone(),
            },
            ports: Ports::AllTraffic,
            description: "Allow all internal traffic".to_owned(),
        },
    )?;

    Ok(policy)
}

/// Declares a policy for worker nodes that doesn't expose any port, only traffic between the
/// workers themselves is allowed.
pub fn declare_worker_security_policy<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    id: &str,
    network: &NetworkHandle,
) -> Result<SecurityPolicyHandle> {
    let policy = provisioner.declare_security_policy(
        id,
        SecurityPolicyProps {
            network: network.clone(),
            description: WORKER_SECURITY_POLICY_DESCRIPTION.to_owned(),
            allow_all_outbound: true,
        },
    )?;

    provisioner.add_ingress_rule(
        &policy,
        IngressRule {
            peer: Peer::SecurityPolicy {
                security_policy: policy.clone(),
            },
            ports: Ports::AllTraffic,
            description: "Allow all internal traffic between worker nodes".to_owned(),
        },
    )?;

    Ok(policy)
}

/// Allows all traffic from `a` to `b` and from `b` to `a`.
pub fn allow_mutual_traffic<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    a: &SecurityPolicyHandle,
    b: &SecurityPolicyHandle,
    description: &str,
) -> Result<()> {
    for (policy, peer) in [(a, b), (b, a)] {
        provisioner.add_ingress_rule(
            policy,
            IngressRule {
                peer: Peer::SecurityPolicy {
                    security_policy: peer.clone(),
                },
                ports: Ports::AllTraffic,
                description: description.to_owned(),
            },
        )?;
    }

    Ok(())
}
