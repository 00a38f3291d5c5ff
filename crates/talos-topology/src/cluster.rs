//! Composition of a control plane and its worker groups into one cluster.
//!
//! A [`ClusterDefinition`] is what users write: one control plane group, any number of worker
//! groups and cluster-wide defaults that are layered under every group. [`assemble_cluster`]
//! declares the control plane first, since workers join the cluster through its endpoint.
//!
//! ```
//! # use talos_topology::cluster::ClusterDefinition;
//! let definition: ClusterDefinition = serde_yaml::from_str(r#"
//! defaults:
//!   clusterName: talos
//!   endpointToOverwrite: talos.cluster
//!   network: vpc-0a1b2c
//! controlPlane:
//!   name: cp
//!   nodeConfigFile: controlplane.yaml
//!   capacity:
//!     min: 3
//! workers:
//!   - name: workers
//!     nodeConfigFile: join.yaml
//! "#).unwrap();
//!
//! assert_eq!(definition.workers[0].name, "workers");
//! assert_eq!(definition.control_plane.config.capacity.min, Some(3));
//! ```
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize, de::IgnoredAny};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, info};

use crate::{
    bootstrap,
    config::merge::merge_layers,
    node_group::{
        ClusterEndpoint, ConfigurationError, EndpointKind, NodeGroupConfig,
        NodeGroupConfigFragment, NodeRole, resolve_node_group,
    },
    provision::{self, NetworkHandle, Provisioner, SecurityPolicyHandle},
    security::{SecurityPolicySource, allow_mutual_traffic, declare_worker_security_policy},
    topology::{AssemblyError, Topology, assemble_topology},
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to load node config of group {group:?}"))]
    LoadNodeConfig {
        source: bootstrap::Error,
        group: String,
    },

    #[snafu(display("group {group:?} sets both nodeConfig and nodeConfigFile"))]
    ConflictingNodeConfig { group: String },

    #[snafu(display("node group name {group:?} is used more than once"))]
    DuplicateGroupName { group: String },

    #[snafu(display("group {group:?} can't use the {role} role"))]
    UnexpectedRole { group: String, role: NodeRole },

    #[snafu(display("failed to resolve configuration of group {group:?}"))]
    ResolveNodeGroup {
        source: ConfigurationError,
        group: String,
    },

    #[snafu(display("failed to declare security policy of worker group {group:?}"))]
    DeclareWorkerSecurityPolicy {
        source: provision::Error,
        group: String,
    },

    #[snafu(display("failed to assemble group {group:?}"))]
    AssembleNodeGroup {
        source: AssemblyError,
        group: String,
    },
}

/// A Talos cluster as written by users.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ClusterDefinition {
    /// Layered under the configuration of every group.
    #[serde(default)]
    pub defaults: NodeGroupConfigFragment,

    pub control_plane: NodeGroupDefinition,

    #[serde(default)]
    pub workers: Vec<NodeGroupDefinition>,

    /// Place workers in the security policy of the control plane instead of a dedicated one.
    ///
    /// Only applies to worker groups that don't configure a `securityPolicy` themselves.
    #[serde(default)]
    pub share_control_plane_security_policy: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", try_from = "NodeGroupDefinitionRepr")]
pub struct NodeGroupDefinition {
    /// Prefix of all resource ids of the group, must be unique within the cluster.
    pub name: String,

    /// Defaults to `controlPlane` for the control plane and `worker` for worker groups. The
    /// control plane may also be a `singleNode`.
    pub role: Option<NodeRole>,

    /// Path of the bootstrap document, relative to the directory passed to
    /// [`ClusterDefinition::load_node_configs`]. Mutually exclusive with `nodeConfig`.
    pub node_config_file: Option<PathBuf>,

    #[serde(flatten)]
    pub config: NodeGroupConfigFragment,
}

#[derive(Debug, Snafu)]
#[snafu(display("node group {group:?} has unknown fields {fields:?}"))]
pub struct UnknownFieldsError {
    group: String,
    fields: Vec<String>,
}

/// Flattening disables `deny_unknown_fields`, so keys that are neither group nor configuration
/// fields are collected in `unknown` and rejected in [`TryFrom`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeGroupDefinitionRepr {
    name: String,
    role: Option<NodeRole>,
    node_config_file: Option<PathBuf>,

    #[serde(flatten)]
    config: NodeGroupConfigFragment,

    #[serde(flatten)]
    unknown: BTreeMap<String, IgnoredAny>,
}

impl TryFrom<NodeGroupDefinitionRepr> for NodeGroupDefinition {
    type Error = UnknownFieldsError;

    fn try_from(repr: NodeGroupDefinitionRepr) -> Result<Self, Self::Error> {
        let NodeGroupDefinitionRepr {
            name,
            role,
            node_config_file,
            config,
            unknown,
        } = repr;
        ensure!(
            unknown.is_empty(),
            UnknownFieldsSnafu {
                group: name,
                fields: unknown.into_keys().collect::<Vec<_>>(),
            }
        );

        Ok(Self {
            name,
            role,
            node_config_file,
            config,
        })
    }
}

impl NodeGroupDefinition {
    fn resolve(
        &self,
        role: NodeRole,
        layers: &[&NodeGroupConfigFragment],
    ) -> Result<NodeGroupConfig> {
        let fragment = merge_layers(self.config.clone(), layers.iter().copied());
        resolve_node_group(fragment, role).context(ResolveNodeGroupSnafu { group: &self.name })
    }
}

impl ClusterDefinition {
    fn groups(&self) -> impl Iterator<Item = &NodeGroupDefinition> {
        std::iter::once(&self.control_plane).chain(&self.workers)
    }

    /// Reads the `nodeConfigFile` of every group into its `nodeConfig`. Relative paths are
    /// resolved against `base_dir`.
    pub fn load_node_configs(&mut self, base_dir: &Path) -> Result<()> {
        for group in std::iter::once(&mut self.control_plane).chain(&mut self.workers) {
            let Some(file) = &group.node_config_file else {
                continue;
            };
            ensure!(
                group.config.node_config.is_none(),
                ConflictingNodeConfigSnafu { group: &group.name }
            );

            let path = base_dir.join(file);
            debug!(group = %group.name, path = %path.display(), "loading node config");
            let node_config =
                bootstrap::load_node_config(&path).context(LoadNodeConfigSnafu {
                    group: &group.name,
                })?;
            group.config.node_config = Some(node_config);
        }

        Ok(())
    }

    fn check_group_names(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for group in self.groups() {
            ensure!(
                names.insert(group.name.as_str()),
                DuplicateGroupNameSnafu { group: &group.name }
            );
        }
        Ok(())
    }
}

/// The declared resources of a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    pub control_plane: Topology,

    /// Keyed by group name.
    pub workers: BTreeMap<String, Topology>,
}

/// Declares the control plane and all worker groups of `definition`.
///
/// Workers default to having no endpoint of their own. Their bootstrap document is rewritten
/// with the address of the control plane endpoint, unless they configure an `overwriteValue`.
///
/// Workers that don't configure a security policy, neither in their group nor in
/// [`ClusterDefinition::defaults`], get a dedicated one that allows all traffic from and to the
/// control plane, or share the policy of the control plane if
/// [`ClusterDefinition::share_control_plane_security_policy`] is set.
pub fn assemble_cluster<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    definition: &ClusterDefinition,
) -> Result<ClusterTopology> {
    definition.check_group_names()?;

    let group = &definition.control_plane;
    let role = group.role.unwrap_or(NodeRole::ControlPlane);
    ensure!(
        matches!(role, NodeRole::ControlPlane | NodeRole::SingleNode),
        UnexpectedRoleSnafu {
            group: &group.name,
            role
        }
    );
    let config = group.resolve(role, &[&definition.defaults])?;
    let control_plane = assemble_topology(provisioner, &group.name, config)
        .context(AssembleNodeGroupSnafu { group: &group.name })?;

    let joining = NodeGroupConfigFragment {
        endpoint: Some(EndpointKind::None),
        overwrite_value: control_plane
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.address().to_owned()),
        ..Default::default()
    };

    let mut workers = BTreeMap::new();
    for group in &definition.workers {
        let role = group.role.unwrap_or(NodeRole::Worker);
        ensure!(
            role == NodeRole::Worker,
            UnexpectedRoleSnafu {
                group: &group.name,
                role
            }
        );

        let mut config = group.resolve(role, &[&definition.defaults, &joining])?;
        let configured_security_policy = group
            .config
            .security_policy
            .as_ref()
            .or(definition.defaults.security_policy.as_ref());
        if configured_security_policy.is_none() {
            let security_policy = if definition.share_control_plane_security_policy {
                control_plane.security_policy.clone()
            } else {
                let network = provisioner
                    .declare_network(&config.network)
                    .map_err(|source| AssemblyError::MissingNetwork {
                        source,
                        network: config.network.clone(),
                    })
                    .context(AssembleNodeGroupSnafu { group: &group.name })?;
                declare_dedicated_security_policy(
                    provisioner,
                    &group.name,
                    &network.handle,
                    &control_plane.security_policy,
                )
                .context(DeclareWorkerSecurityPolicySnafu { group: &group.name })?
            };
            config.security_policy = SecurityPolicySource::Existing { security_policy };
        }

        let topology = assemble_topology(provisioner, &group.name, config)
            .context(AssembleNodeGroupSnafu { group: &group.name })?;
        workers.insert(group.name.clone(), topology);
    }

    info!(
        control_plane = %definition.control_plane.name,
        workers = workers.len(),
        endpoint = ?control_plane.endpoint.as_ref().map(ClusterEndpoint::address),
        "declared cluster"
    );

    Ok(ClusterTopology {
        control_plane,
        workers,
    })
}

fn declare_dedicated_security_policy<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    name: &str,
    network: &NetworkHandle,
    control_plane: &SecurityPolicyHandle,
) -> provision::Result<SecurityPolicyHandle> {
    let workers =
        declare_worker_security_policy(provisioner, &format!("{name}/SecurityPolicy"), network)?;
    allow_mutual_traffic(
        provisioner,
        control_plane,
        &workers,
        "Allow all traffic between control plane and worker nodes",
    )?;
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::{
        provision::{Blueprint, Declaration, DeclarationKind, Handle, Peer, TagTarget},
        tags::well_known,
    };

    fn blueprint() -> Blueprint {
        Blueprint::new(
            serde_yaml::from_str(indoc! {"
                region: eu-central-1
                defaultNetwork: vpc-default
                networks:
                  - id: vpc-default
                    publicSubnets: [subnet-pub-a]
                  - id: vpc-talos
                    publicSubnets: [subnet-pub-a]
                    privateSubnets: [subnet-priv-a]
                addresses:
                  cp/LoadBalancer: lb-123.example.com
                  node/ElasticAddress: 198.51.100.7
                existingSecurityPolicies: [shared/SG]
            "})
            .unwrap(),
        )
    }

    fn definition(yaml: &str) -> ClusterDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    const CLUSTER: &str = indoc! {r#"
        defaults:
          clusterName: prod
          endpointToOverwrite: talos.cluster
          network: vpc-talos
        controlPlane:
          name: cp
          nodeConfig: "endpoint: https://talos.cluster:6443"
          capacity:
            min: 3
        workers:
          - name: workers
            nodeConfig: "endpoint: https://talos.cluster:6443"
            subnets: private
            capacity:
              min: 2
              max: 10
    "#};

    #[test]
    fn workers_join_through_control_plane_endpoint() {
        let mut blueprint = blueprint();
        let cluster = assemble_cluster(&mut blueprint, &definition(CLUSTER)).unwrap();

        let workers = &cluster.workers["workers"];
        assert_eq!(workers.user_data, "endpoint: https://lb-123.example.com:6443");
        assert_eq!(
            workers.endpoint,
            Some(ClusterEndpoint::External {
                hostname: "lb-123.example.com".to_owned()
            })
        );
        assert_eq!(
            cluster.control_plane.user_data,
            "endpoint: https://lb-123.example.com:6443"
        );

        // Only the control plane is behind a load balancer
        assert_eq!(blueprint.count(DeclarationKind::LoadBalancer), 1);
        assert_eq!(blueprint.count(DeclarationKind::ScalingGroup), 2);
        assert_eq!(blueprint.count(DeclarationKind::NetworkLookup), 1);

        assert_eq!(
            blueprint.tags_of(&TagTarget::ScalingGroup(Handle::new("workers/ScalingGroup"))),
            [&well_known::cluster_ownership("prod").unwrap()]
        );
    }

    #[test]
    fn workers_get_dedicated_security_policy() {
        let mut blueprint = blueprint();
        let cluster = assemble_cluster(&mut blueprint, &definition(CLUSTER)).unwrap();

        let workers = &cluster.workers["workers"];
        assert_eq!(workers.security_policy.id(), "workers/SecurityPolicy");
        assert_eq!(blueprint.count(DeclarationKind::SecurityPolicy), 2);

        let mutual = blueprint
            .declarations()
            .iter()
            .filter(|declaration| {
                matches!(
                    declaration,
                    Declaration::IngressRule { rule, .. }
                        if rule.description == "Allow all traffic between control plane and worker nodes"
                )
            })
            .count();
        assert_eq!(mutual, 2);

        assert!(blueprint.declarations().contains(&Declaration::IngressRule {
            security_policy: cluster.control_plane.security_policy.clone(),
            rule: provision::IngressRule {
                peer: Peer::SecurityPolicy {
                    security_policy: workers.security_policy.clone()
                },
                ports: provision::Ports::AllTraffic,
                description: "Allow all traffic between control plane and worker nodes".to_owned(),
            },
        }));
    }

    #[test]
    fn workers_can_share_control_plane_security_policy() {
        let mut blueprint = blueprint();
        let definition = ClusterDefinition {
            share_control_plane_security_policy: true,
            ..definition(CLUSTER)
        };

        let cluster = assemble_cluster(&mut blueprint, &definition).unwrap();

        assert_eq!(
            cluster.workers["workers"].security_policy,
            cluster.control_plane.security_policy
        );
        assert_eq!(blueprint.count(DeclarationKind::SecurityPolicy), 1);
    }

    #[test]
    fn workers_keep_security_policy_from_defaults() {
        let mut blueprint = blueprint();
        let definition = definition(&CLUSTER.replace(
            "  network: vpc-talos\n",
            "  network: vpc-talos\n  securityPolicy:\n    type: existing\n    securityPolicy: shared/SG\n",
        ));

        let cluster = assemble_cluster(&mut blueprint, &definition).unwrap();

        assert_eq!(cluster.control_plane.security_policy.id(), "shared/SG");
        assert_eq!(cluster.workers["workers"].security_policy.id(), "shared/SG");
        assert_eq!(blueprint.count(DeclarationKind::SecurityPolicy), 0);
        assert_eq!(blueprint.count(DeclarationKind::IngressRule), 0);
    }

    #[test]
    fn unknown_worker_network_is_a_missing_network() {
        let mut blueprint = blueprint();
        let definition = definition(&CLUSTER.replace(
            "    subnets: private\n",
            "    subnets: private\n    network: vpc-missing\n",
        ));

        let err = assemble_cluster(&mut blueprint, &definition).unwrap_err();

        match err {
            Error::AssembleNodeGroup { source, group } => {
                assert_eq!(group, "workers");
                assert!(matches!(source, AssemblyError::MissingNetwork { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Only the control plane policy, the worker policy is never declared
        assert_eq!(blueprint.count(DeclarationKind::SecurityPolicy), 1);
    }

    #[test]
    fn single_node_control_plane() {
        let mut blueprint = blueprint();
        let definition = definition(indoc! {r#"
            controlPlane:
              name: node
              role: singleNode
              nodeConfig: "endpoint: https://talos.cluster:6443"
              endpointToOverwrite: talos.cluster
        "#});

        let cluster = assemble_cluster(&mut blueprint, &definition).unwrap();

        assert_eq!(
            cluster.control_plane.user_data,
            "endpoint: https://198.51.100.7:6443"
        );
        assert!(cluster.workers.is_empty());
        assert_eq!(blueprint.count(DeclarationKind::Instance), 1);
    }

    #[test]
    fn control_plane_role_is_checked() {
        let mut definition = definition(CLUSTER);
        definition.control_plane.role = Some(NodeRole::Worker);

        let err = assemble_cluster(&mut blueprint(), &definition).unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedRole {
                role: NodeRole::Worker,
                ..
            }
        ));
    }

    #[test]
    fn worker_role_is_checked() {
        let mut blueprint = blueprint();
        let mut definition = definition(CLUSTER);
        definition.workers[0].role = Some(NodeRole::SingleNode);

        let err = assemble_cluster(&mut blueprint, &definition).unwrap_err();
        assert!(matches!(err, Error::UnexpectedRole { group, .. } if group == "workers"));
    }

    #[test]
    fn group_names_must_be_unique() {
        let mut blueprint = blueprint();
        let mut definition = definition(CLUSTER);
        definition.workers[0].name = "cp".to_owned();

        let err = assemble_cluster(&mut blueprint, &definition).unwrap_err();
        assert!(matches!(err, Error::DuplicateGroupName { group } if group == "cp"));
        assert!(blueprint.declarations().is_empty());
    }

    #[test]
    fn invalid_worker_is_attributed() {
        let mut definition = definition(CLUSTER);
        definition.workers[0].config.node_config = None;

        let err = assemble_cluster(&mut blueprint(), &definition).unwrap_err();
        match err {
            Error::ResolveNodeGroup { source, group } => {
                assert_eq!(group, "workers");
                assert_eq!(source.validation_error().path(), "nodeConfig");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn node_configs_are_loaded_from_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("controlplane.yaml"),
            "endpoint: https://talos.cluster:6443",
        )
        .unwrap();
        fs::write(dir.path().join("join.yaml"), "join: https://talos.cluster:6443").unwrap();

        let mut definition = definition(indoc! {"
            controlPlane:
              name: cp
              nodeConfigFile: controlplane.yaml
            workers:
              - name: workers
                nodeConfigFile: join.yaml
        "});
        definition.load_node_configs(dir.path()).unwrap();

        assert_eq!(
            definition.control_plane.config.node_config.as_deref(),
            Some("endpoint: https://talos.cluster:6443")
        );
        assert_eq!(
            definition.workers[0].config.node_config.as_deref(),
            Some("join: https://talos.cluster:6443")
        );
    }

    #[test]
    fn missing_node_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut definition = definition(indoc! {"
            controlPlane:
              name: cp
              nodeConfigFile: controlplane.yaml
        "});

        let err = definition.load_node_configs(dir.path()).unwrap_err();
        assert!(matches!(err, Error::LoadNodeConfig { group, .. } if group == "cp"));
    }

    #[test]
    fn node_config_and_file_conflict() {
        let mut definition = definition(indoc! {"
            controlPlane:
              name: cp
              nodeConfig: inline
              nodeConfigFile: controlplane.yaml
        "});

        let err = definition.load_node_configs(Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::ConflictingNodeConfig { .. }));
    }

    #[test]
    fn definition_from_yaml() {
        let definition = definition(CLUSTER);

        assert_eq!(definition.control_plane.name, "cp");
        assert_eq!(definition.control_plane.role, None);
        assert_eq!(
            definition.defaults.endpoint_to_overwrite.as_deref(),
            Some("talos.cluster")
        );
        assert_eq!(definition.workers[0].config.capacity.max, Some(10));
        assert!(!definition.share_control_plane_security_policy);
    }

    #[rstest]
    #[case::group_field(
        "securityPolcy",
        indoc! {"
            controlPlane:
              name: cp
              securityPolcy:
                type: existing
                securityPolicy: shared/SG
        "}
    )]
    #[case::worker_field(
        "instanceTyp",
        indoc! {"
            controlPlane:
              name: cp
            workers:
              - name: workers
                instanceTyp: m5.large
        "}
    )]
    #[case::defaults_field(
        "endpointToOverwite",
        indoc! {"
            defaults:
              endpointToOverwite: talos.cluster
            controlPlane:
              name: cp
        "}
    )]
    #[case::nested_field(
        "minimum",
        indoc! {"
            controlPlane:
              name: cp
              capacity:
                minimum: 3
        "}
    )]
    #[case::security_policy_field(
        "allowTraficFrom",
        indoc! {"
            controlPlane:
              name: cp
              securityPolicy:
                type: managed
                allowTraficFrom:
                  type: cidr
                  cidr: 10.0.0.0/8
        "}
    )]
    #[case::cluster_field(
        "shareControlPlaneSecurityPolcy",
        indoc! {"
            controlPlane:
              name: cp
            shareControlPlaneSecurityPolcy: true
        "}
    )]
    fn unknown_fields_are_rejected(#[case] field: &str, #[case] yaml: &str) {
        let err = serde_yaml::from_str::<ClusterDefinition>(yaml).unwrap_err();
        assert!(
            err.to_string().contains(field),
            "error {err} doesn't name {field}"
        );
    }
}
