use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ensure};
use strum::EnumDiscriminants;
use tracing::trace;

use super::{
    ComputeImageHandle, ComputeImageProps, DeclaredElasticAddress, DeclaredLoadBalancer,
    DeclaredNetwork, DuplicateIdSnafu, ElasticAddressHandle, ElasticAddressProps, Handle,
    IngressRule, InstanceHandle, InstanceProps, ListenerProps, LoadBalancerProps,
    MachineImageHandle, NetworkRef, NoDefaultNetworkSnafu, NoImageForRegionSnafu, Provisioner,
    Result, RoleHandle, RoleProps, ScalingGroupHandle, ScalingGroupProps, SecurityPolicyHandle,
    SecurityPolicyProps, TagProps, TagTarget, TargetGroupHandle, TargetGroupProps,
    UnknownNetworkSnafu, UnknownResourceSnafu,
    kind::{self, ResourceKind},
};
use crate::{node_group::ImageSelector, tags::Tag};

/// What a [`Blueprint`] knows about the account it pretends to declare resources in.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueprintEnvironment {
    /// The region used to pick images from explicit per-region mappings.
    pub region: Option<String>,

    #[serde(default)]
    pub networks: Vec<NetworkLayout>,

    /// Id of the network `default` refers to.
    pub default_network: Option<String>,

    /// Addresses of load balancers and elastic addresses, keyed by their declaration id.
    ///
    /// Resources without an entry get a `${<id>.<Attribute>}` placeholder, the way an
    /// infrastructure-as-code platform represents values that are only known after deployment.
    #[serde(default)]
    pub addresses: BTreeMap<String, String>,

    /// Roles declared outside of the blueprint that node groups may refer to.
    #[serde(default)]
    pub existing_roles: Vec<String>,

    /// Security policies declared outside of the blueprint that node groups may refer to.
    #[serde(default)]
    pub existing_security_policies: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLayout {
    pub id: String,

    #[serde(default)]
    pub public_subnets: Vec<String>,

    #[serde(default)]
    pub private_subnets: Vec<String>,
}

/// A single call made to a [`Blueprint`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, EnumDiscriminants)]
#[strum_discriminants(name(DeclarationKind), derive(strum::Display, Hash, PartialOrd, Ord))]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Declaration {
    #[serde(rename_all = "camelCase")]
    NetworkLookup { network: String },

    SecurityPolicy {
        id: String,
        #[serde(flatten)]
        props: SecurityPolicyProps,
    },

    #[serde(rename_all = "camelCase")]
    IngressRule {
        security_policy: SecurityPolicyHandle,
        #[serde(flatten)]
        rule: IngressRule,
    },

    Role {
        id: String,
        #[serde(flatten)]
        props: RoleProps,
    },

    #[serde(rename_all = "camelCase")]
    LoadBalancer {
        id: String,
        dns_name: String,
        #[serde(flatten)]
        props: LoadBalancerProps,
    },

    TargetGroup {
        id: String,
        #[serde(flatten)]
        props: TargetGroupProps,
    },

    Listener {
        id: String,
        #[serde(flatten)]
        props: ListenerProps,
    },

    MachineImageLookup {
        id: String,
        selector: ImageSelector,
    },

    ComputeImage {
        id: String,
        #[serde(flatten)]
        props: ComputeImageProps,
    },

    ScalingGroup {
        id: String,
        #[serde(flatten)]
        props: ScalingGroupProps,
    },

    #[serde(rename_all = "camelCase")]
    TargetGroupAttachment {
        scaling_group: ScalingGroupHandle,
        target_group: TargetGroupHandle,
    },

    Instance {
        id: String,
        #[serde(flatten)]
        props: InstanceProps,
    },

    ElasticAddress {
        id: String,
        address: String,
        #[serde(flatten)]
        props: ElasticAddressProps,
    },

    #[serde(rename_all = "camelCase")]
    ElasticAddressAssociation {
        id: String,
        elastic_address: ElasticAddressHandle,
        instance: InstanceHandle,
    },

    Tag {
        target: TagTarget,
        tag: Tag,
        #[serde(flatten)]
        props: TagProps,
    },
}

/// A [`Provisioner`] that records every declaration in order instead of creating anything.
///
/// References between declarations are checked, so a declaration that refers to a handle the
/// blueprint has never handed out fails with [`super::Error::UnknownResource`].
#[derive(Debug, Default)]
pub struct Blueprint {
    environment: BlueprintEnvironment,
    resources: BTreeMap<String, &'static str>,
    networks: BTreeMap<String, DeclaredNetwork>,
    declarations: Vec<Declaration>,
}

impl Blueprint {
    pub fn new(environment: BlueprintEnvironment) -> Self {
        let mut resources = BTreeMap::new();
        for id in &environment.existing_roles {
            resources.insert(id.clone(), kind::Role::NAME);
        }
        for id in &environment.existing_security_policies {
            resources.insert(id.clone(), kind::SecurityPolicy::NAME);
        }

        Self {
            environment,
            resources,
            ..Self::default()
        }
    }

    pub fn environment(&self) -> &BlueprintEnvironment {
        &self.environment
    }

    /// All declarations in the order they were made.
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    /// The kinds of all declarations in the order they were made.
    pub fn kinds(&self) -> Vec<DeclarationKind> {
        self.declarations.iter().map(DeclarationKind::from).collect()
    }

    pub fn count(&self, kind: DeclarationKind) -> usize {
        self.declarations
            .iter()
            .filter(|declaration| DeclarationKind::from(*declaration) == kind)
            .count()
    }

    /// The tags declared on `target`.
    pub fn tags_of(&self, target: &TagTarget) -> Vec<&Tag> {
        self.declarations
            .iter()
            .filter_map(|declaration| match declaration {
                Declaration::Tag {
                    target: tagged,
                    tag,
                    ..
                } if tagged == target => Some(tag),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, declaration: Declaration) {
        trace!(kind = %DeclarationKind::from(&declaration), "recording declaration");
        self.declarations.push(declaration);
    }

    fn register<K: ResourceKind>(&mut self, id: &str) -> Result<Handle<K>> {
        ensure!(!self.resources.contains_key(id), DuplicateIdSnafu { id });
        self.resources.insert(id.to_owned(), K::NAME);
        Ok(Handle::new(id))
    }

    fn require<K: ResourceKind>(&self, handle: &Handle<K>) -> Result<()> {
        match self.resources.get(handle.id()) {
            Some(&kind) if kind == K::NAME => Ok(()),
            _ => UnknownResourceSnafu {
                kind: K::NAME,
                id: handle.id(),
            }
            .fail(),
        }
    }

    fn address_of(&self, id: &str, attribute: &str) -> String {
        self.environment
            .addresses
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("${{{id}.{attribute}}}"))
    }

    fn lookup_image(&mut self, id: String, selector: ImageSelector) -> MachineImageHandle {
        if !self.resources.contains_key(&id) {
            self.resources.insert(id.clone(), kind::MachineImage::NAME);
            self.record(Declaration::MachineImageLookup {
                id: id.clone(),
                selector,
            });
        }
        Handle::new(id)
    }
}

impl Provisioner for Blueprint {
    fn declare_network(&mut self, network: &NetworkRef) -> Result<DeclaredNetwork> {
        let id = match network {
            NetworkRef::Default => self
                .environment
                .default_network
                .clone()
                .context(NoDefaultNetworkSnafu)?,
            NetworkRef::Id(id) => id.clone(),
        };

        if let Some(declared) = self.networks.get(&id) {
            return Ok(declared.clone());
        }

        let layout = self
            .environment
            .networks
            .iter()
            .find(|layout| layout.id == id)
            .cloned()
            .context(UnknownNetworkSnafu { id: &id })?;

        self.resources.insert(id.clone(), kind::Network::NAME);
        for subnet in layout.public_subnets.iter().chain(&layout.private_subnets) {
            self.resources.insert(subnet.clone(), kind::Subnet::NAME);
        }

        let declared = DeclaredNetwork {
            handle: Handle::new(&id),
            public_subnets: layout.public_subnets.iter().map(Handle::new).collect(),
            private_subnets: layout.private_subnets.iter().map(Handle::new).collect(),
        };
        self.networks.insert(id.clone(), declared.clone());
        self.record(Declaration::NetworkLookup { network: id });

        Ok(declared)
    }

    fn declare_security_policy(
        &mut self,
        id: &str,
        props: SecurityPolicyProps,
    ) -> Result<SecurityPolicyHandle> {
        self.require(&props.network)?;
        let handle = self.register(id)?;
        self.record(Declaration::SecurityPolicy {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn add_ingress_rule(
        &mut self,
        security_policy: &SecurityPolicyHandle,
        rule: IngressRule,
    ) -> Result<()> {
        self.require(security_policy)?;
        if let super::Peer::SecurityPolicy {
            security_policy: peer,
        } = &rule.peer
        {
            self.require(peer)?;
        }
        self.record(Declaration::IngressRule {
            security_policy: security_policy.clone(),
            rule,
        });
        Ok(())
    }

    fn declare_role(&mut self, id: &str, props: RoleProps) -> Result<RoleHandle> {
        let handle = self.register(id)?;
        self.record(Declaration::Role {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn declare_load_balancer(
        &mut self,
        id: &str,
        props: LoadBalancerProps,
    ) -> Result<DeclaredLoadBalancer> {
        self.require(&props.network)?;
        let handle = self.register(id)?;
        let dns_name = self.address_of(id, "DnsName");
        self.record(Declaration::LoadBalancer {
            id: id.to_owned(),
            dns_name: dns_name.clone(),
            props,
        });
        Ok(DeclaredLoadBalancer { handle, dns_name })
    }

    fn declare_target_group(
        &mut self,
        id: &str,
        props: TargetGroupProps,
    ) -> Result<TargetGroupHandle> {
        self.require(&props.network)?;
        let handle = self.register(id)?;
        self.record(Declaration::TargetGroup {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn declare_listener(&mut self, id: &str, props: ListenerProps) -> Result<()> {
        self.require(&props.load_balancer)?;
        self.require(&props.default_target_group)?;
        // Listeners can't be referenced, the id is only reserved.
        self.resources.insert(id.to_owned(), "listener");
        self.record(Declaration::Listener {
            id: id.to_owned(),
            props,
        });
        Ok(())
    }

    fn lookup_image_by_name_pattern(
        &mut self,
        pattern: &str,
        owner: &str,
    ) -> Result<MachineImageHandle> {
        Ok(self.lookup_image(
            format!("image:{owner}/{pattern}"),
            ImageSelector::NamePattern {
                pattern: pattern.to_owned(),
                owner: owner.to_owned(),
            },
        ))
    }

    fn lookup_image_by_explicit_mapping(
        &mut self,
        mapping: &BTreeMap<String, String>,
    ) -> Result<MachineImageHandle> {
        let id = match &self.environment.region {
            Some(region) => mapping
                .get(region)
                .cloned()
                .context(NoImageForRegionSnafu { region })?,
            // The region is only known at deploy time, so the whole mapping is kept.
            None => {
                let entries = mapping
                    .iter()
                    .map(|(region, image)| format!("{region}={image}"))
                    .collect::<Vec<_>>();
                format!("image:{}", entries.join(","))
            }
        };

        Ok(self.lookup_image(
            id,
            ImageSelector::ExplicitMapping {
                mapping: mapping.clone(),
            },
        ))
    }

    fn declare_compute_image(
        &mut self,
        id: &str,
        props: ComputeImageProps,
    ) -> Result<ComputeImageHandle> {
        self.require(&props.image)?;
        let handle = self.register(id)?;
        self.record(Declaration::ComputeImage {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn declare_scaling_group(
        &mut self,
        id: &str,
        props: ScalingGroupProps,
    ) -> Result<ScalingGroupHandle> {
        self.require(&props.network)?;
        self.require(&props.compute_image)?;
        self.require(&props.security_policy)?;
        self.require(&props.role)?;
        let handle = self.register(id)?;
        self.record(Declaration::ScalingGroup {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn attach_to_target_group(
        &mut self,
        scaling_group: &ScalingGroupHandle,
        target_group: &TargetGroupHandle,
    ) -> Result<()> {
        self.require(scaling_group)?;
        self.require(target_group)?;
        self.record(Declaration::TargetGroupAttachment {
            scaling_group: scaling_group.clone(),
            target_group: target_group.clone(),
        });
        Ok(())
    }

    fn declare_instance(&mut self, id: &str, props: InstanceProps) -> Result<InstanceHandle> {
        self.require(&props.network)?;
        self.require(&props.compute_image)?;
        self.require(&props.security_policy)?;
        self.require(&props.role)?;
        let handle = self.register(id)?;
        self.record(Declaration::Instance {
            id: id.to_owned(),
            props,
        });
        Ok(handle)
    }

    fn declare_elastic_address(
        &mut self,
        id: &str,
        props: ElasticAddressProps,
    ) -> Result<DeclaredElasticAddress> {
        let handle = self.register(id)?;
        let address = self.address_of(id, "PublicIp");
        self.record(Declaration::ElasticAddress {
            id: id.to_owned(),
            address: address.clone(),
            props,
        });
        Ok(DeclaredElasticAddress { handle, address })
    }

    fn associate_elastic_address(
        &mut self,
        id: &str,
        address: &ElasticAddressHandle,
        instance: &InstanceHandle,
    ) -> Result<()> {
        self.require(address)?;
        self.require(instance)?;
        self.resources.insert(id.to_owned(), "elastic address association");
        self.record(Declaration::ElasticAddressAssociation {
            id: id.to_owned(),
            elastic_address: address.clone(),
            instance: instance.clone(),
        });
        Ok(())
    }

    fn declare_tag(&mut self, target: TagTarget, tag: Tag, props: TagProps) -> Result<()> {
        match &target {
            TagTarget::ScalingGroup(handle) => self.require(handle)?,
            TagTarget::Instance(handle) => self.require(handle)?,
            TagTarget::Subnet(handle) => self.require(handle)?,
        }
        let declaration = Declaration::Tag { target, tag, props };
        // Tagging is idempotent, groups sharing a network tag the same subnets
        if !self.declarations.contains(&declaration) {
            self.record(declaration);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::{node_group::SubnetType, provision::Error};

    fn environment() -> BlueprintEnvironment {
        serde_yaml::from_str(indoc! {"
            region: eu-central-1
            defaultNetwork: vpc-default
            networks:
              - id: vpc-default
                publicSubnets: [subnet-pub-a, subnet-pub-b]
              - id: vpc-private
                publicSubnets: [subnet-pub-c]
                privateSubnets: [subnet-priv-c]
            addresses:
              cp/LoadBalancer: lb-123.example.com
            existingRoles: [shared/Role]
        "})
        .unwrap()
    }

    #[test]
    fn default_network_lookup() {
        let mut blueprint = Blueprint::new(environment());

        let network = blueprint.declare_network(&NetworkRef::Default).unwrap();
        assert_eq!(network.handle.id(), "vpc-default");
        assert_eq!(network.public_subnets.len(), 2);
        assert!(network.private_subnets.is_empty());

        // Repeated lookups are served from the cache
        blueprint.declare_network(&NetworkRef::Default).unwrap();
        assert_eq!(blueprint.count(DeclarationKind::NetworkLookup), 1);
    }

    #[test]
    fn missing_networks() {
        let mut blueprint = Blueprint::new(BlueprintEnvironment::default());
        assert!(matches!(
            blueprint.declare_network(&NetworkRef::Default),
            Err(Error::NoDefaultNetwork)
        ));

        let mut blueprint = Blueprint::new(environment());
        assert!(matches!(
            blueprint.declare_network(&NetworkRef::Id("vpc-unknown".to_owned())),
            Err(Error::UnknownNetwork { id }) if id == "vpc-unknown"
        ));
        assert!(blueprint.declarations().is_empty());
    }

    #[test]
    fn ids_are_unique() {
        let mut blueprint = Blueprint::new(environment());
        let props = RoleProps {
            assumed_by: "ec2.amazonaws.com".to_owned(),
            inline_policies: BTreeMap::new(),
        };

        blueprint.declare_role("cp/Role", props.clone()).unwrap();
        assert!(matches!(
            blueprint.declare_role("cp/Role", props),
            Err(Error::DuplicateId { id }) if id == "cp/Role"
        ));
    }

    #[test]
    fn references_must_be_declared() {
        let mut blueprint = Blueprint::new(environment());
        let network = blueprint.declare_network(&NetworkRef::Default).unwrap();

        let err = blueprint
            .declare_load_balancer(
                "cp/LoadBalancer",
                LoadBalancerProps {
                    network: Handle::new("vpc-private"),
                    subnets: SubnetType::Public,
                    internet_facing: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::UnknownResource { kind: "network", .. }));

        let load_balancer = blueprint
            .declare_load_balancer(
                "cp/LoadBalancer",
                LoadBalancerProps {
                    network: network.handle,
                    subnets: SubnetType::Public,
                    internet_facing: true,
                },
            )
            .unwrap();
        assert_eq!(load_balancer.dns_name, "lb-123.example.com");
    }

    #[test]
    fn addresses_default_to_placeholders() {
        let mut blueprint = Blueprint::new(environment());
        let address = blueprint
            .declare_elastic_address("node/ElasticAddress", ElasticAddressProps::default())
            .unwrap();
        assert_eq!(address.address, "${node/ElasticAddress.PublicIp}");
    }

    #[test]
    fn explicit_image_mapping_uses_region() {
        let mut blueprint = Blueprint::new(environment());
        let mapping = BTreeMap::from([
            ("eu-central-1".to_owned(), "ami-eu".to_owned()),
            ("us-east-1".to_owned(), "ami-us".to_owned()),
        ]);

        let image = blueprint.lookup_image_by_explicit_mapping(&mapping).unwrap();
        assert_eq!(image.id(), "ami-eu");

        let err = blueprint
            .lookup_image_by_explicit_mapping(&BTreeMap::from([(
                "us-east-1".to_owned(),
                "ami-us".to_owned(),
            )]))
            .unwrap_err();
        assert!(matches!(err, Error::NoImageForRegion { region } if region == "eu-central-1"));
    }

    #[test]
    fn image_lookups_are_shared() {
        let mut blueprint = Blueprint::new(environment());
        let first = blueprint
            .lookup_image_by_name_pattern("talos-*", "540036508848")
            .unwrap();
        let second = blueprint
            .lookup_image_by_name_pattern("talos-*", "540036508848")
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(blueprint.count(DeclarationKind::MachineImageLookup), 1);
    }
}
