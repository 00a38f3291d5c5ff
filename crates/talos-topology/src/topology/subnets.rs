use crate::{
    provision::{DeclaredNetwork, Provisioner, Result, TagProps, TagTarget},
    tags::well_known,
};

/// Tags all subnets of `network` with the load balancer role they may be used for.
///
/// The Kubernetes cloud provider integration picks the subnets for `LoadBalancer` services based
/// on these tags: public subnets for internet-facing load balancers and private subnets for
/// internal ones.
pub fn tag_subnets<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    network: &DeclaredNetwork,
) -> Result<()> {
    let tagged = network
        .private_subnets
        .iter()
        .map(|subnet| (subnet, well_known::internal_elb_role()))
        .chain(
            network
                .public_subnets
                .iter()
                .map(|subnet| (subnet, well_known::elb_role())),
        );

    for (subnet, tag) in tagged {
        provisioner.declare_tag(TagTarget::Subnet(subnet.clone()), tag, TagProps::default())?;
    }

    Ok(())
}
