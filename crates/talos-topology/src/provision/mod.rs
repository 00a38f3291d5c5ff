//! The boundary to the infrastructure-as-code platform.
//!
//! Every `declare_*` call adds a resource to the platform's in-memory resource graph and returns
//! a [`Handle`] that later declarations can refer to. Nothing is created in the cloud at this
//! point, that only happens when the platform synthesizes and applies the graph.
//!
//! [`Blueprint`] is an implementation that simply records all declarations. It is used for tests
//! and for previewing cluster definitions.
use std::{collections::BTreeMap, convert::Infallible, fmt::Display, marker::PhantomData, str::FromStr};

use educe::Educe;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{
    identity::PolicyDocument,
    node_group::{Capacity, ImageSelector, InstanceType, SubnetType},
    tags::Tag,
};

mod blueprint;

pub use blueprint::{Blueprint, BlueprintEnvironment, Declaration, DeclarationKind, NetworkLayout};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("network {id:?} is not known"))]
    UnknownNetwork { id: String },

    #[snafu(display("no default network is available"))]
    NoDefaultNetwork,

    #[snafu(display("a resource with id {id:?} was already declared"))]
    DuplicateId { id: String },

    #[snafu(display("{kind} {id:?} was not declared"))]
    UnknownResource { kind: &'static str, id: String },

    #[snafu(display("the image mapping has no entry for region {region:?}"))]
    NoImageForRegion { region: String },

    #[snafu(display("the provisioning backend rejected the declaration"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Marker types for the different kinds of resources a [`Handle`] can point to.
pub mod kind {
    /// Names the kind of a resource, used in error messages and previews.
    pub trait ResourceKind {
        const NAME: &'static str;
    }

    macro_rules! resource_kinds {
        ($($kind:ident => $name:literal),* $(,)?) => {
            $(
                #[derive(Debug)]
                pub enum $kind {}

                impl ResourceKind for $kind {
                    const NAME: &'static str = $name;
                }
            )*
        };
    }

    resource_kinds! {
        Network => "network",
        Subnet => "subnet",
        SecurityPolicy => "security policy",
        Role => "role",
        LoadBalancer => "load balancer",
        TargetGroup => "target group",
        MachineImage => "machine image",
        ComputeImage => "compute image",
        ScalingGroup => "scaling group",
        Instance => "instance",
        ElasticAddress => "elastic address",
    }
}

/// A reference to a declared resource of kind `K`.
///
/// Handles are plain identifiers. They don't keep the referenced resource alive and can be
/// serialized, which allows cluster definitions to refer to resources declared elsewhere.
#[derive(Deserialize, Serialize, Educe)]
#[educe(Clone(bound()), Debug(bound()), PartialEq(bound()), Eq)]
#[serde(transparent, bound = "")]
pub struct Handle<K> {
    id: String,

    #[serde(skip)]
    _kind: PhantomData<K>,
}

impl<K> Handle<K> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _kind: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<K> FromStr for Handle<K> {
    type Err = Infallible;

    fn from_str(id: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(id))
    }
}

impl<K> Display for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

pub type NetworkHandle = Handle<kind::Network>;
pub type SubnetHandle = Handle<kind::Subnet>;
pub type SecurityPolicyHandle = Handle<kind::SecurityPolicy>;
pub type RoleHandle = Handle<kind::Role>;
pub type LoadBalancerHandle = Handle<kind::LoadBalancer>;
pub type TargetGroupHandle = Handle<kind::TargetGroup>;
pub type MachineImageHandle = Handle<kind::MachineImage>;
pub type ComputeImageHandle = Handle<kind::ComputeImage>;
pub type ScalingGroupHandle = Handle<kind::ScalingGroup>;
pub type InstanceHandle = Handle<kind::Instance>;
pub type ElasticAddressHandle = Handle<kind::ElasticAddress>;

/// Selects the network a node group is deployed into.
///
/// Written as `default` for the account's default network, any other string is used as the id
/// of an existing network.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(from = "String", into = "String")]
pub enum NetworkRef {
    Default,
    Id(String),
}

impl From<String> for NetworkRef {
    fn from(value: String) -> Self {
        if value == "default" {
            Self::Default
        } else {
            Self::Id(value)
        }
    }
}

impl From<NetworkRef> for String {
    fn from(value: NetworkRef) -> Self {
        match value {
            NetworkRef::Default => "default".to_owned(),
            NetworkRef::Id(id) => id,
        }
    }
}

impl Display for NetworkRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Id(id) => f.write_str(id),
        }
    }
}

/// A network resolved by [`Provisioner::declare_network`], together with its subnets.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredNetwork {
    pub handle: NetworkHandle,
    pub public_subnets: Vec<SubnetHandle>,
    pub private_subnets: Vec<SubnetHandle>,
}

/// The source of traffic an ingress rule applies to.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Peer {
    #[default]
    AnyIpv4,
    #[serde(rename_all = "camelCase")]
    Cidr { cidr: String },
    #[serde(rename_all = "camelCase")]
    SecurityPolicy {
        security_policy: SecurityPolicyHandle,
    },
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "protocol", rename_all = "camelCase")]
pub enum Ports {
    Tcp { from: u16, to: u16 },
    AllTraffic,
}

impl Ports {
    pub fn tcp(port: u16) -> Self {
        Self::Tcp {
            from: port,
            to: port,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    pub peer: Peer,
    pub ports: Ports,
    pub description: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityPolicyProps {
    pub network: NetworkHandle,
    pub description: String,
    pub allow_all_outbound: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleProps {
    pub assumed_by: String,
    pub inline_policies: BTreeMap<String, PolicyDocument>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerProps {
    pub network: NetworkHandle,
    pub subnets: SubnetType,
    pub internet_facing: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredLoadBalancer {
    pub handle: LoadBalancerHandle,
    pub dns_name: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetType {
    Instance,
    Ip,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub enabled: bool,
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupProps {
    pub network: NetworkHandle,
    pub port: u16,
    pub protocol: Protocol,
    pub target_type: TargetType,
    pub health_check: HealthCheck,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerProps {
    pub load_balancer: LoadBalancerHandle,
    pub port: u16,
    pub protocol: Protocol,
    pub default_target_group: TargetGroupHandle,
}

/// The launch configuration of nodes: image, sizing and the boot-time user data.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeImageProps {
    pub image: MachineImageHandle,
    pub instance_type: InstanceType,
    pub user_data: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingGroupProps {
    pub network: NetworkHandle,
    pub subnets: SubnetType,
    pub compute_image: ComputeImageHandle,
    pub security_policy: SecurityPolicyHandle,
    pub role: RoleHandle,
    pub capacity: Capacity,
    pub allow_all_outbound: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProps {
    pub name: String,
    pub network: NetworkHandle,
    pub subnets: SubnetType,
    pub compute_image: ComputeImageHandle,
    pub security_policy: SecurityPolicyHandle,
    pub role: RoleHandle,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticAddressProps {
    /// Keep the address when the resource graph is torn down.
    pub retain_on_delete: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredElasticAddress {
    pub handle: ElasticAddressHandle,
    pub address: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum TagTarget {
    ScalingGroup(ScalingGroupHandle),
    Instance(InstanceHandle),
    Subnet(SubnetHandle),
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagProps {
    pub apply_to_launched_instances: bool,
}

/// Declares resources in the platform's resource graph.
///
/// Implementations should treat every call as a pure graph-building operation. The `id` passed
/// to `declare_*` functions is unique within one graph.
pub trait Provisioner {
    /// Resolves the network node groups are deployed into.
    fn declare_network(&mut self, network: &NetworkRef) -> Result<DeclaredNetwork>;

    fn declare_security_policy(
        &mut self,
        id: &str,
        props: SecurityPolicyProps,
    ) -> Result<SecurityPolicyHandle>;

    fn add_ingress_rule(
        &mut self,
        security_policy: &SecurityPolicyHandle,
        rule: IngressRule,
    ) -> Result<()>;

    fn declare_role(&mut self, id: &str, props: RoleProps) -> Result<RoleHandle>;

    fn declare_load_balancer(
        &mut self,
        id: &str,
        props: LoadBalancerProps,
    ) -> Result<DeclaredLoadBalancer>;

    fn declare_target_group(
        &mut self,
        id: &str,
        props: TargetGroupProps,
    ) -> Result<TargetGroupHandle>;

    fn declare_listener(&mut self, id: &str, props: ListenerProps) -> Result<()>;

    /// Looks up the newest image whose name matches `pattern` (`*` being a wildcard), published
    /// by `owner`.
    fn lookup_image_by_name_pattern(
        &mut self,
        pattern: &str,
        owner: &str,
    ) -> Result<MachineImageHandle>;

    /// Picks the image for the region the graph is deployed to from a region → image id map.
    fn lookup_image_by_explicit_mapping(
        &mut self,
        mapping: &BTreeMap<String, String>,
    ) -> Result<MachineImageHandle>;

    fn declare_compute_image(
        &mut self,
        id: &str,
        props: ComputeImageProps,
    ) -> Result<ComputeImageHandle>;

    fn declare_scaling_group(
        &mut self,
        id: &str,
        props: ScalingGroupProps,
    ) -> Result<ScalingGroupHandle>;

    fn attach_to_target_group(
        &mut self,
        scaling_group: &ScalingGroupHandle,
        target_group: &TargetGroupHandle,
    ) -> Result<()>;

    fn declare_instance(&mut self, id: &str, props: InstanceProps) -> Result<InstanceHandle>;

    fn declare_elastic_address(
        &mut self,
        id: &str,
        props: ElasticAddressProps,
    ) -> Result<DeclaredElasticAddress>;

    fn associate_elastic_address(
        &mut self,
        id: &str,
        address: &ElasticAddressHandle,
        instance: &InstanceHandle,
    ) -> Result<()>;

    fn declare_tag(&mut self, target: TagTarget, tag: Tag, props: TagProps) -> Result<()>;
}

/// Looks up the machine image described by `selector`.
pub fn lookup_image<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    selector: &ImageSelector,
) -> Result<MachineImageHandle> {
    match selector {
        ImageSelector::NamePattern { pattern, owner } => {
            provisioner.lookup_image_by_name_pattern(pattern, owner)
        }
        ImageSelector::ExplicitMapping { mapping } => {
            provisioner.lookup_image_by_explicit_mapping(mapping)
        }
    }
}
