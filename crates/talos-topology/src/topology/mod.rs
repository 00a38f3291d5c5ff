//! Declares the resources of a single node group.
//!
//! [`assemble_topology`] walks through a fixed sequence of declarations. The order matters: the
//! bootstrap document can only be rewritten once the endpoint resource is declared (its address
//! is the default replacement), and the compute resources need the rewritten document as user
//! data.
//!
//! If any step fails the assembly is aborted. Nothing is rolled back, the provisioner's resource
//! graph is discarded as a whole by the caller.
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    constants::KUBERNETES_API_PORT,
    identity::resolve_identity,
    node_group::{
        ClusterEndpoint, EndpointKind, NodeGroupConfig, ResolvedNodeGroup, SubnetType,
        UnboundEndpointError,
    },
    provision::{
        self, ComputeImageHandle, ComputeImageProps, DeclaredNetwork, ElasticAddressProps, HealthCheck,
        InstanceHandle, InstanceProps, ListenerProps, LoadBalancerHandle, LoadBalancerProps,
        NetworkHandle, NetworkRef, Protocol, Provisioner, RoleHandle, ScalingGroupHandle,
        ScalingGroupProps, SecurityPolicyHandle, TagProps, TagTarget, TargetGroupProps,
        TargetType,
    },
    security::resolve_security_policy,
};

mod subnets;

pub use subnets::tag_subnets;

#[derive(Debug, Snafu)]
pub enum AssemblyError {
    #[snafu(display("failed to resolve network {network}"))]
    MissingNetwork {
        source: provision::Error,
        network: NetworkRef,
    },

    #[snafu(display("failed to declare security policy"))]
    DeclareSecurityPolicy { source: provision::Error },

    #[snafu(display("failed to declare role"))]
    DeclareRole { source: provision::Error },

    #[snafu(display("failed to declare endpoint"))]
    DeclareEndpoint { source: provision::Error },

    #[snafu(display("failed to bind node group to the cluster endpoint"))]
    BindEndpoint { source: UnboundEndpointError },

    #[snafu(display("failed to look up machine image"))]
    LookupImage { source: provision::Error },

    #[snafu(display("failed to declare compute image"))]
    DeclareComputeImage { source: provision::Error },

    #[snafu(display("failed to declare compute resources"))]
    DeclareCompute { source: provision::Error },

    #[snafu(display("failed to attach compute resources to the endpoint"))]
    AttachEndpoint { source: provision::Error },

    #[snafu(display("failed to declare tags"))]
    DeclareTags { source: provision::Error },
}

/// What runs the nodes of a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComputeHandle {
    ScalingGroup(ScalingGroupHandle),
    Instance(InstanceHandle),
}

/// The declared resources of a node group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub network: DeclaredNetwork,
    pub security_policy: SecurityPolicyHandle,
    pub role: RoleHandle,
    pub compute: ComputeHandle,
    pub endpoint: Option<ClusterEndpoint>,

    /// The rewritten bootstrap document passed to the nodes.
    pub user_data: String,
}

/// Declares all resources of the node group `name`.
///
/// Resource ids are prefixed with `name`, so it must be unique within the provisioner.
pub fn assemble_topology<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    name: &str,
    config: NodeGroupConfig,
) -> Result<Topology, AssemblyError> {
    let role = config.role;

    // Without a network nothing else can be declared
    let network = provisioner
        .declare_network(&config.network)
        .with_context(|_| MissingNetworkSnafu {
            network: config.network.clone(),
        })?;

    let security_policy = resolve_security_policy(
        provisioner,
        &format!("{name}/SecurityPolicy"),
        &network.handle,
        &config.security_policy,
    )
    .context(DeclareSecurityPolicySnafu)?;
    let node_role = resolve_identity(provisioner, &format!("{name}/Role"), &config.identity)
        .context(DeclareRoleSnafu)?;

    let endpoint = declare_endpoint(provisioner, name, &network.handle, config.endpoint)
        .context(DeclareEndpointSnafu)?;

    let ResolvedNodeGroup {
        config,
        endpoint,
        user_data,
    } = config.bind_endpoint(endpoint).context(BindEndpointSnafu)?;

    let image = provision::lookup_image(provisioner, &config.image).context(LookupImageSnafu)?;
    let compute_image = provisioner
        .declare_compute_image(
            &format!("{name}/ComputeImage"),
            ComputeImageProps {
                image,
                instance_type: config.instance_type.clone(),
                user_data: user_data.clone(),
            },
        )
        .context(DeclareComputeImageSnafu)?;

    let compute = declare_compute(
        provisioner,
        name,
        &network.handle,
        &config,
        compute_image,
        &security_policy,
        &node_role,
    )
    .context(DeclareComputeSnafu)?;

    match (&compute, &endpoint) {
        (
            ComputeHandle::ScalingGroup(scaling_group),
            Some(ClusterEndpoint::LoadBalancer { handle, .. }),
        ) => attach_load_balancer(provisioner, name, &network.handle, handle, scaling_group)
            .context(AttachEndpointSnafu)?,
        (
            ComputeHandle::Instance(instance),
            Some(ClusterEndpoint::ElasticAddress { handle, .. }),
        ) => provisioner
            .associate_elastic_address(
                &format!("{name}/ElasticAddressAssociation"),
                handle,
                instance,
            )
            .context(AttachEndpointSnafu)?,
        _ => {}
    }

    tag_compute(provisioner, &compute, &config).context(DeclareTagsSnafu)?;
    tag_subnets(provisioner, &network).context(DeclareTagsSnafu)?;

    info!(
        name,
        %role,
        network = %network.handle,
        endpoint = ?endpoint.as_ref().map(ClusterEndpoint::address),
        "declared node group"
    );

    Ok(Topology {
        network,
        security_policy,
        role: node_role,
        compute,
        endpoint,
        user_data,
    })
}

fn declare_compute<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    name: &str,
    network: &NetworkHandle,
    config: &NodeGroupConfig,
    compute_image: ComputeImageHandle,
    security_policy: &SecurityPolicyHandle,
    role: &RoleHandle,
) -> provision::Result<ComputeHandle> {
    if config.role.uses_scaling_group() {
        let scaling_group = provisioner.declare_scaling_group(
            &format!("{name}/ScalingGroup"),
            ScalingGroupProps {
                network: network.clone(),
                subnets: config.subnets,
                compute_image,
                security_policy: security_policy.clone(),
                role: role.clone(),
                capacity: config.capacity,
                allow_all_outbound: true,
            },
        )?;
        Ok(ComputeHandle::ScalingGroup(scaling_group))
    } else {
        let instance = provisioner.declare_instance(
            &format!("{name}/Instance"),
            InstanceProps {
                name: config.node_name.clone(),
                network: network.clone(),
                subnets: config.subnets,
                compute_image,
                security_policy: security_policy.clone(),
                role: role.clone(),
            },
        )?;
        Ok(ComputeHandle::Instance(instance))
    }
}

/// Tags the compute resources as owned by the cluster. Scaling groups pass the tag on to the
/// instances they launch.
fn tag_compute<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    compute: &ComputeHandle,
    config: &NodeGroupConfig,
) -> provision::Result<()> {
    let (target, props) = match compute {
        ComputeHandle::ScalingGroup(handle) => (
            TagTarget::ScalingGroup(handle.clone()),
            TagProps {
                apply_to_launched_instances: true,
            },
        ),
        ComputeHandle::Instance(handle) => {
            (TagTarget::Instance(handle.clone()), TagProps::default())
        }
    };
    provisioner.declare_tag(target, config.ownership_tag.clone(), props)
}

fn declare_endpoint<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    name: &str,
    network: &NetworkHandle,
    kind: EndpointKind,
) -> provision::Result<Option<ClusterEndpoint>> {
    let endpoint = match kind {
        EndpointKind::LoadBalancer { internet_facing } => {
            let load_balancer = provisioner.declare_load_balancer(
                &format!("{name}/LoadBalancer"),
                LoadBalancerProps {
                    network: network.clone(),
                    subnets: if internet_facing {
                        SubnetType::Public
                    } else {
                        SubnetType::Private
                    },
                    internet_facing,
                },
            )?;
            Some(ClusterEndpoint::LoadBalancer {
                handle: load_balancer.handle,
                dns_name: load_balancer.dns_name,
            })
        }
        EndpointKind::ElasticAddress => {
            let address = provisioner.declare_elastic_address(
                &format!("{name}/ElasticAddress"),
                ElasticAddressProps {
                    retain_on_delete: false,
                },
            )?;
            Some(ClusterEndpoint::ElasticAddress {
                handle: address.handle,
                address: address.address,
            })
        }
        EndpointKind::None => None,
    };

    debug!(name, ?endpoint, "declared endpoint");
    Ok(endpoint)
}

/// Forwards the Kubernetes API port of the load balancer to all instances of the scaling group.
fn attach_load_balancer<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    name: &str,
    network: &NetworkHandle,
    load_balancer: &LoadBalancerHandle,
    scaling_group: &ScalingGroupHandle,
) -> provision::Result<()> {
    let target_group = provisioner.declare_target_group(
        &format!("{name}/TargetGroup{KUBERNETES_API_PORT}"),
        TargetGroupProps {
            network: network.clone(),
            port: KUBERNETES_API_PORT,
            protocol: Protocol::Tcp,
            target_type: TargetType::Instance,
            health_check: HealthCheck {
                enabled: true,
                port: KUBERNETES_API_PORT,
                protocol: Protocol::Tcp,
            },
        },
    )?;
    provisioner.attach_to_target_group(scaling_group, &target_group)?;
    provisioner.declare_listener(
        &format!("{name}/Listener{KUBERNETES_API_PORT}"),
        ListenerProps {
            load_balancer: load_balancer.clone(),
            port: KUBERNETES_API_PORT,
            protocol: Protocol::Tcp,
            default_target_group: target_group,
        },
    )
}
