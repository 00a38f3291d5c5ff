use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{
    config::merge::Atomic,
    provision::{ElasticAddressHandle, LoadBalancerHandle},
};

/// The resource that makes a node group reachable.
///
/// Written as `{type: loadBalancer, internetFacing: <bool>}`, `{type: elasticAddress}` or
/// `{type: none}`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EndpointKind {
    /// A network load balancer forwarding the Kubernetes API port to all nodes of the group.
    #[serde(rename_all = "camelCase")]
    LoadBalancer {
        #[serde(default = "internet_facing_default")]
        internet_facing: bool,
    },

    /// A static public address associated with the single instance of the group.
    ElasticAddress,

    /// No endpoint resource is declared. The endpoint address has to be provided as
    /// `overwriteValue` if the bootstrap document is rewritten.
    None,
}

fn internet_facing_default() -> bool {
    true
}

impl Atomic for EndpointKind {}

/// Whether, and how, the endpoint placeholder in the bootstrap document is replaced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EndpointTransform {
    Disabled,
    Rewrite {
        /// The placeholder, never empty.
        from: String,

        /// Explicit replacement. If [`None`], the address of the [`ClusterEndpoint`] is used,
        /// which is only known once the endpoint resource has been declared.
        overwrite_value: Option<String>,
    },
}

/// The address nodes use to reach the cluster.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClusterEndpoint {
    /// A hostname that is known up front (for example the address of another node group).
    External { hostname: String },

    #[serde(rename_all = "camelCase")]
    LoadBalancer {
        handle: LoadBalancerHandle,
        dns_name: String,
    },

    ElasticAddress {
        handle: ElasticAddressHandle,
        address: String,
    },
}

impl ClusterEndpoint {
    pub fn address(&self) -> &str {
        match self {
            Self::External { hostname } => hostname,
            Self::LoadBalancer { dns_name, .. } => dns_name,
            Self::ElasticAddress { address, .. } => address,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(
    display(
        "no endpoint is available to replace {from:?} with, either set overwriteValue or declare an endpoint"
    ),
    visibility(pub(super))
)]
pub struct UnboundEndpointError {
    from: String,
}
