//! Node groups and the resolution of their configuration.
//!
//! A node group is a homogeneous set of instances sharing one bootstrap document, image, sizing
//! and identity. Its configuration is written as a sparse [`NodeGroupConfigFragment`] and
//! resolved in two phases:
//!
//! 1. [`resolve_node_group`] applies the defaults of the [`NodeRole`] and validates the result
//!    into a [`NodeGroupConfig`]. Everything is known at this point, except for the address the
//!    endpoint placeholder is replaced with (unless it was given explicitly).
//! 2. [`NodeGroupConfig::bind_endpoint`] takes the [`ClusterEndpoint`] once the endpoint resource
//!    has been declared and produces the [`ResolvedNodeGroup`], including the rewritten bootstrap
//!    document.
//!
//! A [`ResolvedNodeGroup`] can't be built in any other way, so it is impossible to declare
//! compute resources with a bootstrap document that still contains the placeholder.
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::{
    bootstrap::rewrite_endpoint,
    config::{
        fragment::{ValidationError, Validator, validate_field},
        merge::{Atomic, Merge},
    },
    constants::{DEFAULT_CLUSTER_NAME, DEFAULT_IMAGE_NAME_PATTERN, DEFAULT_NODE_NAME, TALOS_IMAGE_OWNER},
    identity::IdentitySource,
    provision::NetworkRef,
    security::SecurityPolicySource,
    tags::{Tag, well_known},
};

mod capacity;
mod endpoint;
mod image;

pub use capacity::{Capacity, CapacityFragment};
pub use endpoint::{ClusterEndpoint, EndpointKind, EndpointTransform, UnboundEndpointError};
pub use image::{ImageSelector, ImageSelectorFragment, InstanceType, InstanceTypeError};

/// The function of the nodes in a group, which decides the defaults of its configuration.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "kebab-case")]
pub enum NodeRole {
    /// Control plane nodes behind a load balancer, run by a scaling group.
    ControlPlane,

    /// Worker nodes run by a scaling group.
    Worker,

    /// A single control plane instance reachable through an elastic address.
    SingleNode,
}

impl NodeRole {
    /// Whether nodes of this role are run by a scaling group (as opposed to a single instance).
    pub fn uses_scaling_group(self) -> bool {
        !matches!(self, Self::SingleNode)
    }

    /// The defaults applied to node groups of this role.
    pub fn defaults(self) -> NodeGroupConfigFragment {
        let (identity, endpoint, network) = match self {
            Self::ControlPlane => (
                IdentitySource::ControlPlanePolicy,
                EndpointKind::LoadBalancer {
                    internet_facing: true,
                },
                None,
            ),
            Self::Worker => (
                IdentitySource::WorkerPolicy,
                EndpointKind::LoadBalancer {
                    internet_facing: true,
                },
                None,
            ),
            Self::SingleNode => (
                IdentitySource::ControlPlanePolicy,
                EndpointKind::ElasticAddress,
                Some(NetworkRef::Default),
            ),
        };

        NodeGroupConfigFragment {
            cluster_name: Some(DEFAULT_CLUSTER_NAME.to_owned()),
            node_name: Some(DEFAULT_NODE_NAME.to_owned()),
            node_config: None,
            transform_config: Some(true),
            endpoint_to_overwrite: None,
            overwrite_value: None,
            instance_type: Some(InstanceType::default()),
            image: ImageSelectorFragment {
                name_pattern: Some(DEFAULT_IMAGE_NAME_PATTERN.to_owned()),
                owner: Some(TALOS_IMAGE_OWNER.to_owned()),
                explicit_mapping: None,
            },
            network,
            subnets: Some(SubnetType::Public),
            capacity: CapacityFragment::default(),
            identity: Some(identity),
            security_policy: Some(SecurityPolicySource::default()),
            endpoint: Some(endpoint),
        }
    }
}

/// The class of subnets instances are placed in.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum SubnetType {
    /// Subnets with a route to an internet gateway.
    #[default]
    Public,

    /// Subnets with outbound internet access through a NAT gateway.
    Private,

    /// Subnets without any internet access.
    Isolated,
}

impl Atomic for SubnetType {}
impl Atomic for NetworkRef {}
impl Atomic for IdentitySource {}
impl Atomic for SecurityPolicySource {}

/// The sparse configuration of a node group, as written by users.
///
/// ```
/// # use talos_topology::node_group::{NodeGroupConfigFragment, NodeRole, resolve_node_group};
/// let fragment: NodeGroupConfigFragment = serde_yaml::from_str(r#"
/// nodeConfig: "endpoint: https://talos.cluster:6443"
/// endpointToOverwrite: talos.cluster
/// network: vpc-0a1b2c
/// capacity:
///   min: 3
/// "#).unwrap();
///
/// let config = resolve_node_group(fragment, NodeRole::ControlPlane).unwrap();
/// assert_eq!(config.cluster_name, "talos");
/// assert_eq!((config.capacity.min, config.capacity.max), (3, 3));
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct NodeGroupConfigFragment {
    /// Used for the `kubernetes.io/cluster/<name>=owned` tag.
    pub cluster_name: Option<String>,

    /// Instance name, only used by single-node groups.
    pub node_name: Option<String>,

    /// The bootstrap document (`controlplane.yaml` or `join.yaml`).
    pub node_config: Option<String>,

    /// Replace `endpoint_to_overwrite` in the bootstrap document.
    pub transform_config: Option<bool>,

    /// The endpoint passed to `talosctl gen config`, without scheme and port.
    pub endpoint_to_overwrite: Option<String>,

    /// Defaults to the address of the endpoint of the group.
    pub overwrite_value: Option<String>,

    pub instance_type: Option<InstanceType>,

    #[serde(default)]
    pub image: ImageSelectorFragment,

    pub network: Option<NetworkRef>,
    pub subnets: Option<SubnetType>,

    #[serde(default)]
    pub capacity: CapacityFragment,

    pub identity: Option<IdentitySource>,
    pub security_policy: Option<SecurityPolicySource>,
    pub endpoint: Option<EndpointKind>,
}

impl Merge for NodeGroupConfigFragment {
    fn merge(&mut self, defaults: &Self) {
        self.cluster_name.merge(&defaults.cluster_name);
        self.node_name.merge(&defaults.node_name);
        self.node_config.merge(&defaults.node_config);
        self.transform_config.merge(&defaults.transform_config);
        self.endpoint_to_overwrite
            .merge(&defaults.endpoint_to_overwrite);
        self.overwrite_value.merge(&defaults.overwrite_value);
        self.instance_type.merge(&defaults.instance_type);
        self.image.merge(&defaults.image);
        self.network.merge(&defaults.network);
        self.subnets.merge(&defaults.subnets);
        self.capacity.merge(&defaults.capacity);
        self.identity.merge(&defaults.identity);
        self.security_policy.merge(&defaults.security_policy);
        self.endpoint.merge(&defaults.endpoint);
    }
}

/// A node group configuration with all defaults applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeGroupConfig {
    pub role: NodeRole,
    pub cluster_name: String,
    pub node_name: String,
    pub node_config: String,
    pub endpoint_transform: EndpointTransform,
    pub instance_type: InstanceType,
    pub image: ImageSelector,
    pub network: NetworkRef,
    pub subnets: SubnetType,
    pub capacity: Capacity,
    pub identity: IdentitySource,
    pub security_policy: SecurityPolicySource,
    pub endpoint: EndpointKind,

    /// `kubernetes.io/cluster/<cluster_name>=owned`
    pub ownership_tag: Tag,
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("invalid {role} node group configuration"))]
pub struct ConfigurationError {
    role: NodeRole,
    source: ValidationError,
}

impl ConfigurationError {
    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn validation_error(&self) -> &ValidationError {
        &self.source
    }
}

/// Applies the defaults of `role` to `fragment` and validates the result.
///
/// Defaults are applied in a fixed order: cluster name, image, network, instance type, identity,
/// endpoint transform, and then the remaining fields. A configuration that can't be used fails
/// right away, before anything is declared.
pub fn resolve_node_group(
    mut fragment: NodeGroupConfigFragment,
    role: NodeRole,
) -> Result<NodeGroupConfig, ConfigurationError> {
    let defaults = role.defaults();

    apply_default(&mut fragment.cluster_name, &defaults.cluster_name, "clusterName");
    // An explicit mapping always wins, so the pattern is only needed without one
    if fragment.image.explicit_mapping.is_none() {
        apply_default(
            &mut fragment.image.name_pattern,
            &defaults.image.name_pattern,
            "image.namePattern",
        );
        apply_default(&mut fragment.image.owner, &defaults.image.owner, "image.owner");
    }
    apply_default(&mut fragment.network, &defaults.network, "network");
    apply_default(&mut fragment.instance_type, &defaults.instance_type, "instanceType");
    apply_default(&mut fragment.identity, &defaults.identity, "identity");
    apply_default(
        &mut fragment.transform_config,
        &defaults.transform_config,
        "transformConfig",
    );
    apply_default(&mut fragment.node_name, &defaults.node_name, "nodeName");
    apply_default(&mut fragment.subnets, &defaults.subnets, "subnets");
    apply_default(
        &mut fragment.security_policy,
        &defaults.security_policy,
        "securityPolicy",
    );
    apply_default(&mut fragment.endpoint, &defaults.endpoint, "endpoint");

    let config = NodeGroupConfig::from_fragment(fragment, role, &Validator::root())
        .context(ConfigurationSnafu { role })?;
    debug!(
        %role,
        cluster_name = %config.cluster_name,
        capacity = ?config.capacity,
        endpoint = ?config.endpoint,
        "resolved node group configuration"
    );

    Ok(config)
}

fn apply_default<T: Clone + Debug>(field: &mut Option<T>, default: &Option<T>, name: &str) {
    if field.is_none() && default.is_some() {
        debug!(field = name, default = ?default, "applying default");
        field.clone_from(default);
    }
}

impl NodeGroupConfig {
    fn from_fragment(
        fragment: NodeGroupConfigFragment,
        role: NodeRole,
        validator: &Validator,
    ) -> Result<Self, ValidationError> {
        let cluster_name: String =
            validate_field(fragment.cluster_name, validator, &"clusterName")?;
        let ownership_tag = well_known::cluster_ownership(&cluster_name).map_err(|err| {
            validator
                .field(&"clusterName")
                .error_invalid(format!("not usable as ownership tag: {err}"))
        })?;

        let node_config = validate_field(fragment.node_config, validator, &"nodeConfig")?;

        let endpoint: EndpointKind = validate_field(fragment.endpoint, validator, &"endpoint")?;
        match endpoint {
            EndpointKind::ElasticAddress if role != NodeRole::SingleNode => {
                return Err(validator
                    .field(&"endpoint")
                    .error_invalid("only single-node groups can use an elastic address"));
            }
            EndpointKind::LoadBalancer { .. } if role == NodeRole::SingleNode => {
                return Err(validator
                    .field(&"endpoint")
                    .error_invalid("single-node groups can't be placed behind a load balancer"));
            }
            _ => {}
        }

        let transform_config: bool =
            validate_field(fragment.transform_config, validator, &"transformConfig")?;
        let endpoint_transform = if transform_config {
            let from = match fragment.endpoint_to_overwrite {
                None => {
                    return Err(validator
                        .field(&"endpointToOverwrite")
                        .error_required_when("transformConfig is enabled"));
                }
                Some(from) if from.is_empty() => {
                    return Err(validator
                        .field(&"endpointToOverwrite")
                        .error_invalid("the placeholder must not be empty"));
                }
                Some(from) => from,
            };

            match &fragment.overwrite_value {
                Some(value) if value.is_empty() => {
                    return Err(validator
                        .field(&"overwriteValue")
                        .error_invalid("the replacement must not be empty"));
                }
                None if endpoint == EndpointKind::None => {
                    return Err(validator.field(&"overwriteValue").error_required_when(
                        "transformConfig is enabled and the group has no endpoint",
                    ));
                }
                _ => {}
            }

            EndpointTransform::Rewrite {
                from,
                overwrite_value: fragment.overwrite_value,
            }
        } else {
            EndpointTransform::Disabled
        };

        Ok(Self {
            role,
            cluster_name,
            node_name: validate_field(fragment.node_name, validator, &"nodeName")?,
            node_config,
            endpoint_transform,
            instance_type: validate_field(fragment.instance_type, validator, &"instanceType")?,
            image: validate_field(fragment.image, validator, &"image")?,
            network: validate_field(fragment.network, validator, &"network")?,
            subnets: validate_field(fragment.subnets, validator, &"subnets")?,
            capacity: validate_field(fragment.capacity, validator, &"capacity")?,
            identity: validate_field(fragment.identity, validator, &"identity")?,
            security_policy: validate_field(
                fragment.security_policy,
                validator,
                &"securityPolicy",
            )?,
            endpoint,
            ownership_tag,
        })
    }

    /// Binds the configuration to the endpoint of the cluster and rewrites the bootstrap
    /// document.
    ///
    /// The placeholder is replaced with the explicit `overwriteValue` if one was configured,
    /// otherwise with the address of `endpoint`. Without either, the rewrite can't happen and
    /// [`UnboundEndpointError`] is returned.
    pub fn bind_endpoint(
        self,
        endpoint: Option<ClusterEndpoint>,
    ) -> Result<ResolvedNodeGroup, UnboundEndpointError> {
        let (user_data, endpoint) = match &self.endpoint_transform {
            EndpointTransform::Disabled => (self.node_config.clone(), endpoint),
            EndpointTransform::Rewrite {
                from,
                overwrite_value: Some(value),
            } => {
                let endpoint = endpoint.or_else(|| {
                    Some(ClusterEndpoint::External {
                        hostname: value.clone(),
                    })
                });
                (rewrite_endpoint(&self.node_config, from, value), endpoint)
            }
            EndpointTransform::Rewrite {
                from,
                overwrite_value: None,
            } => {
                let Some(endpoint) = endpoint else {
                    return endpoint::UnboundEndpointSnafu { from: from.as_str() }.fail();
                };
                let user_data = rewrite_endpoint(&self.node_config, from, endpoint.address());
                (user_data, Some(endpoint))
            }
        };

        debug!(
            role = %self.role,
            endpoint = ?endpoint.as_ref().map(ClusterEndpoint::address),
            "bound node group to cluster endpoint"
        );

        Ok(ResolvedNodeGroup {
            config: self,
            endpoint,
            user_data,
        })
    }
}

/// A node group that is ready to be declared.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedNodeGroup {
    pub config: NodeGroupConfig,

    /// The endpoint the bootstrap document points at, if any.
    pub endpoint: Option<ClusterEndpoint>,

    /// The bootstrap document with the endpoint placeholder replaced. This is passed to the
    /// instances as user data.
    pub user_data: String,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::{
        config::{fragment::ValidationProblem, merge::merge},
        provision::Peer,
    };

    const NODE_CONFIG: &str = "endpoint: https://talos.cluster:6443";

    fn fragment() -> NodeGroupConfigFragment {
        NodeGroupConfigFragment {
            node_config: Some(NODE_CONFIG.to_owned()),
            endpoint_to_overwrite: Some("talos.cluster".to_owned()),
            network: Some(NetworkRef::Id("vpc-0a1b2c".to_owned())),
            ..Default::default()
        }
    }

    fn load_balancer(dns_name: &str) -> ClusterEndpoint {
        ClusterEndpoint::LoadBalancer {
            handle: "cp/LoadBalancer".parse().unwrap(),
            dns_name: dns_name.to_owned(),
        }
    }

    #[test]
    fn control_plane_defaults() {
        let config = resolve_node_group(fragment(), NodeRole::ControlPlane).unwrap();

        assert_eq!(config.cluster_name, "talos");
        assert_eq!(
            config.ownership_tag.to_string(),
            "kubernetes.io/cluster/talos=owned"
        );
        assert_eq!(config.instance_type.to_string(), "t3.small");
        assert_eq!(
            config.image,
            ImageSelector::NamePattern {
                pattern: "talos-v0.11.2-*-amd64".to_owned(),
                owner: "540036508848".to_owned(),
            }
        );
        assert_eq!(config.subnets, SubnetType::Public);
        assert_eq!(config.identity, IdentitySource::ControlPlanePolicy);
        assert_eq!(
            config.security_policy,
            SecurityPolicySource::Managed {
                allow_traffic_from: Peer::AnyIpv4
            }
        );
        assert_eq!(
            config.endpoint,
            EndpointKind::LoadBalancer {
                internet_facing: true
            }
        );
        assert_eq!(
            config.endpoint_transform,
            EndpointTransform::Rewrite {
                from: "talos.cluster".to_owned(),
                overwrite_value: None,
            }
        );
        assert_eq!(
            config.capacity,
            Capacity {
                min: 1,
                max: 1,
                desired: None
            }
        );
    }

    #[rstest]
    #[case(NodeRole::ControlPlane, IdentitySource::ControlPlanePolicy)]
    #[case(NodeRole::Worker, IdentitySource::WorkerPolicy)]
    #[case(NodeRole::SingleNode, IdentitySource::ControlPlanePolicy)]
    fn identity_depends_on_role(#[case] role: NodeRole, #[case] identity: IdentitySource) {
        assert_eq!(resolve_node_group(fragment(), role).unwrap().identity, identity);
    }

    #[test]
    fn single_node_defaults() {
        let config = resolve_node_group(
            NodeGroupConfigFragment {
                network: None,
                ..fragment()
            },
            NodeRole::SingleNode,
        )
        .unwrap();

        assert_eq!(config.network, NetworkRef::Default);
        assert_eq!(config.node_name, "talos-node");
        assert_eq!(config.endpoint, EndpointKind::ElasticAddress);
    }

    #[rstest]
    #[case(NodeRole::ControlPlane)]
    #[case(NodeRole::Worker)]
    #[case(NodeRole::SingleNode)]
    fn transform_requires_placeholder(#[case] role: NodeRole) {
        for transform_config in [None, Some(true)] {
            let err = resolve_node_group(
                NodeGroupConfigFragment {
                    transform_config,
                    endpoint_to_overwrite: None,
                    ..fragment()
                },
                role,
            )
            .unwrap_err();

            assert_eq!(err.role(), role);
            assert_eq!(err.validation_error().path(), "endpointToOverwrite");
            assert!(matches!(
                err.validation_error().problem(),
                ValidationProblem::RequiredWhen { .. }
            ));
        }
    }

    #[test]
    fn empty_placeholder_is_rejected() {
        let err = resolve_node_group(
            NodeGroupConfigFragment {
                endpoint_to_overwrite: Some(String::new()),
                ..fragment()
            },
            NodeRole::Worker,
        )
        .unwrap_err();
        assert_eq!(err.validation_error().path(), "endpointToOverwrite");
    }

    #[test]
    fn transform_can_be_disabled() {
        let config = resolve_node_group(
            NodeGroupConfigFragment {
                transform_config: Some(false),
                endpoint_to_overwrite: None,
                ..fragment()
            },
            NodeRole::Worker,
        )
        .unwrap();
        assert_eq!(config.endpoint_transform, EndpointTransform::Disabled);

        let resolved = config.bind_endpoint(None).unwrap();
        assert_eq!(resolved.user_data, NODE_CONFIG);
    }

    #[rstest]
    #[case::node_config(NodeGroupConfigFragment { node_config: None, ..fragment() }, "nodeConfig")]
    #[case::network(NodeGroupConfigFragment { network: None, ..fragment() }, "network")]
    fn required_fields(#[case] fragment: NodeGroupConfigFragment, #[case] path: &str) {
        let err = resolve_node_group(fragment, NodeRole::ControlPlane).unwrap_err();
        assert_eq!(err.validation_error().path(), path);
        assert_eq!(
            err.validation_error().problem(),
            &ValidationProblem::FieldRequired
        );
        assert_eq!(err.to_string(), "invalid control-plane node group configuration");
    }

    #[test]
    fn capacity_max_mirrors_min() {
        let config = resolve_node_group(
            NodeGroupConfigFragment {
                capacity: CapacityFragment {
                    min: Some(3),
                    ..Default::default()
                },
                ..fragment()
            },
            NodeRole::ControlPlane,
        )
        .unwrap();
        assert_eq!((config.capacity.min, config.capacity.max), (3, 3));
    }

    #[test]
    fn capacity_errors_are_attributed() {
        let err = resolve_node_group(
            NodeGroupConfigFragment {
                capacity: CapacityFragment {
                    min: Some(3),
                    max: Some(2),
                    desired: None,
                },
                ..fragment()
            },
            NodeRole::Worker,
        )
        .unwrap_err();
        assert_eq!(err.validation_error().path(), "capacity.max");
    }

    #[test]
    fn explicit_image_mapping_wins() {
        let mapping = BTreeMap::from([("us-east-1".to_owned(), "ami-0fdb2f5cb915076a3".to_owned())]);
        let config = resolve_node_group(
            NodeGroupConfigFragment {
                image: ImageSelectorFragment {
                    name_pattern: Some("p".to_owned()),
                    owner: None,
                    explicit_mapping: Some(mapping.clone()),
                },
                ..fragment()
            },
            NodeRole::ControlPlane,
        )
        .unwrap();
        assert_eq!(config.image, ImageSelector::ExplicitMapping { mapping });
    }

    #[test]
    fn invalid_cluster_name() {
        let err = resolve_node_group(
            NodeGroupConfigFragment {
                cluster_name: Some("my;cluster".to_owned()),
                ..fragment()
            },
            NodeRole::ControlPlane,
        )
        .unwrap_err();
        assert_eq!(err.validation_error().path(), "clusterName");
    }

    #[rstest]
    #[case(NodeRole::ControlPlane, EndpointKind::ElasticAddress)]
    #[case(NodeRole::Worker, EndpointKind::ElasticAddress)]
    #[case(NodeRole::SingleNode, EndpointKind::LoadBalancer { internet_facing: true })]
    fn endpoint_must_fit_role(#[case] role: NodeRole, #[case] endpoint: EndpointKind) {
        let err = resolve_node_group(
            NodeGroupConfigFragment {
                endpoint: Some(endpoint),
                ..fragment()
            },
            role,
        )
        .unwrap_err();
        assert_eq!(err.validation_error().path(), "endpoint");
    }

    #[test]
    fn endpointless_group_needs_overwrite_value() {
        let endpointless = NodeGroupConfigFragment {
            endpoint: Some(EndpointKind::None),
            ..fragment()
        };

        let err = resolve_node_group(endpointless.clone(), NodeRole::Worker).unwrap_err();
        assert_eq!(err.validation_error().path(), "overwriteValue");

        let config = resolve_node_group(
            NodeGroupConfigFragment {
                overwrite_value: Some("lb-123.example.com".to_owned()),
                ..endpointless
            },
            NodeRole::Worker,
        )
        .unwrap();
        let resolved = config.bind_endpoint(None).unwrap();
        assert_eq!(resolved.user_data, "endpoint: https://lb-123.example.com:6443");
        assert_eq!(
            resolved.endpoint,
            Some(ClusterEndpoint::External {
                hostname: "lb-123.example.com".to_owned()
            })
        );
    }

    #[test]
    fn bind_to_load_balancer() {
        let fragment: NodeGroupConfigFragment = serde_yaml::from_str(indoc! {r#"
            clusterName: talos
            nodeConfig: "endpoint: https://talos.cluster:6443"
            transformConfig: true
            endpointToOverwrite: talos.cluster
            network: default
            capacity:
              min: 3
        "#})
        .unwrap();

        let config = resolve_node_group(fragment, NodeRole::ControlPlane).unwrap();
        let resolved = config
            .bind_endpoint(Some(load_balancer("lb-123.example.com")))
            .unwrap();

        assert_eq!(resolved.user_data, "endpoint: https://lb-123.example.com:6443");
        assert_eq!(
            (resolved.config.capacity.min, resolved.config.capacity.max),
            (3, 3)
        );
        assert_eq!(
            resolved.endpoint.as_ref().map(ClusterEndpoint::address),
            Some("lb-123.example.com")
        );
    }

    #[test]
    fn overwrite_value_takes_precedence() {
        let config = resolve_node_group(
            NodeGroupConfigFragment {
                overwrite_value: Some("k8s.example.com".to_owned()),
                ..fragment()
            },
            NodeRole::ControlPlane,
        )
        .unwrap();

        let resolved = config
            .bind_endpoint(Some(load_balancer("lb-123.example.com")))
            .unwrap();
        assert_eq!(resolved.user_data, "endpoint: https://k8s.example.com:6443");
        // The declared endpoint is still the group's endpoint
        assert_eq!(resolved.endpoint, Some(load_balancer("lb-123.example.com")));
    }

    #[test]
    fn binding_without_endpoint_fails() {
        let config = resolve_node_group(fragment(), NodeRole::ControlPlane).unwrap();
        assert!(config.bind_endpoint(None).is_err());
    }

    #[test]
    fn layers_merge_before_defaults() {
        let cluster_defaults = NodeGroupConfigFragment {
            cluster_name: Some("prod".to_owned()),
            instance_type: Some("m6i.large".parse().unwrap()),
            ..Default::default()
        };
        let group = NodeGroupConfigFragment {
            instance_type: Some("t3.medium".parse().unwrap()),
            ..fragment()
        };

        let config =
            resolve_node_group(merge(group, &cluster_defaults), NodeRole::Worker).unwrap();
        assert_eq!(config.cluster_name, "prod");
        assert_eq!(config.instance_type.to_string(), "t3.medium");
    }

    #[test]
    fn fragment_from_yaml() {
        let fragment: NodeGroupConfigFragment = serde_yaml::from_str(indoc! {"
            nodeConfig: irrelevant
            transformConfig: false
            network: vpc-0a1b2c
            subnets: private
            instanceType: m6g.large
            image:
              explicitMapping:
                us-east-1: ami-0fdb2f5cb915076a3
            capacity:
              min: 3
              max: 5
            identity:
              type: existing
              role: shared/Role
            securityPolicy:
              type: managed
              allowTrafficFrom:
                type: cidr
                cidr: 10.0.0.0/8
            endpoint:
              type: loadBalancer
              internetFacing: false
        "})
        .unwrap();

        let config = resolve_node_group(fragment, NodeRole::Worker).unwrap();
        assert_eq!(config.subnets, SubnetType::Private);
        assert_eq!(
            config.capacity,
            Capacity {
                min: 3,
                max: 5,
                desired: None
            }
        );
        assert_eq!(
            config.identity,
            IdentitySource::Existing {
                role: "shared/Role".parse().unwrap()
            }
        );
        assert_eq!(
            config.security_policy,
            SecurityPolicySource::Managed {
                allow_traffic_from: Peer::Cidr {
                    cidr: "10.0.0.0/8".to_owned()
                }
            }
        );
        assert_eq!(
            config.endpoint,
            EndpointKind::LoadBalancer {
                internet_facing: false
            }
        );
    }

    #[test]
    fn invalid_instance_type_in_yaml() {
        let result = serde_yaml::from_str::<NodeGroupConfigFragment>("instanceType: small");
        assert!(result.is_err());
    }
}
