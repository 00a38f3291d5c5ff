//! Identities (instance roles) attached to cluster nodes.
//!
//! The policies grant the minimum set of permissions required by the Kubernetes cloud
//! controller manager, for example to create load balancers for `LoadBalancer` services.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    constants::INSTANCE_SERVICE_PRINCIPAL,
    provision::{self, Provisioner, RoleHandle, RoleProps},
};

const POLICY_LANGUAGE_VERSION: &str = "2012-10-17";

const CONTROL_PLANE_ACTIONS: &[&str] = &[
    "autoscaling:DescribeAutoScalingGroups",
    "autoscaling:DescribeLaunchConfigurations",
    "autoscaling:DescribeTags",
    "ec2:DescribeInstances",
    "ec2:DescribeRegions",
    "ec2:DescribeRouteTables",
    "ec2:DescribeSecurityGroups",
    "ec2:DescribeSubnets",
    "ec2:DescribeVolumes",
    "ec2:CreateSecurityGroup",
    "ec2:CreateTags",
    "ec2:CreateVolume",
    "ec2:ModifyInstanceAttribute",
    "ec2:ModifyVolume",
    "ec2:AttachVolume",
    "ec2:AuthorizeSecurityGroupIngress",
    "ec2:CreateRoute",
    "ec2:DeleteRoute",
    "ec2:DeleteSecurityGroup",
    "ec2:DeleteVolume",
    "ec2:DetachVolume",
    "ec2:RevokeSecurityGroupIngress",
    "ec2:DescribeVpcs",
    "elasticloadbalancing:AddTags",
    "elasticloadbalancing:AttachLoadBalancerToSubnets",
    "elasticloadbalancing:ApplySecurityGroupsToLoadBalancer",
    "elasticloadbalancing:CreateLoadBalancer",
    "elasticloadbalancing:CreateLoadBalancerPolicy",
    "elasticloadbalancing:CreateLoadBalancerListeners",
    "elasticloadbalancing:ConfigureHealthCheck",
    "elasticloadbalancing:DeleteLoadBalancer",
    "elasticloadbalancing:DeleteLoadBalancerListeners",
    "elasticloadbalancing:DescribeLoadBalancers",
    "elasticloadbalancing:DescribeLoadBalancerAttributes",
    "elasticloadbalancing:DetachLoadBalancerFromSubnets",
    "elasticloadbalancing:DeregisterInstancesFromLoadBalancer",
    "elasticloadbalancing:ModifyLoadBalancerAttributes",
    "elasticloadbalancing:RegisterInstancesWithLoadBalancer",
    "elasticloadbalancing:SetLoadBalancerPoliciesForBackendServer",
    "elasticloadbalancing:CreateListener",
    "elasticloadbalancing:CreateTargetGroup",
    "elasticloadbalancing:DeleteListener",
    "elasticloadbalancing:DeleteTargetGroup",
    "elasticloadbalancing:DescribeListeners",
    "elasticloadbalancing:DescribeLoadBalancerPolicies",
    "elasticloadbalancing:DescribeTargetGroups",
    "elasticloadbalancing:DescribeTargetHealth",
    "elasticloadbalancing:ModifyListener",
    "elasticloadbalancing:ModifyTargetGroup",
    "elasticloadbalancing:RegisterTargets",
    "elasticloadbalancing:DeregisterTargets",
    "elasticloadbalancing:SetLoadBalancerPoliciesOfListener",
    "iam:CreateServiceLinkedRole",
    "kms:DescribeKey",
];

const WORKER_ACTIONS: &[&str] = &[
    "ec2:DescribeInstances",
    "ec2:DescribeRegions",
    "ecr:GetAuthorizationToken",
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:GetRepositoryPolicy",
    "ecr:DescribeRepositories",
    "ecr:ListImages",
    "ecr:BatchGetImage",
];

/// Where the identity of a node group comes from.
///
/// Written as `{type: controlPlanePolicy}`, `{type: workerPolicy}` or
/// `{type: existing, role: <id>}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IdentitySource {
    /// Declare a new role with the permissions required by control plane nodes.
    ControlPlanePolicy,

    /// Declare a new role with the permissions required by worker nodes.
    WorkerPolicy,

    /// Attach a role that was declared elsewhere.
    Existing { role: RoleHandle },
}

fn role_props(policy_name: &str, policy: PolicyDocument) -> RoleProps {
    RoleProps {
        assumed_by: INSTANCE_SERVICE_PRINCIPAL.to_owned(),
        inline_policies: BTreeMap::from([(policy_name.to_owned(), policy)]),
    }
}

/// Returns the role described by `source`, declaring it as `id` first if it is managed.
pub fn resolve_identity<P: Provisioner + ?Sized>(
    provisioner: &mut P,
    id: &str,
    source: &IdentitySource,
) -> provision::Result<RoleHandle> {
    match source {
        IdentitySource::Existing { role } => Ok(role.clone()),
        IdentitySource::ControlPlanePolicy => provisioner.declare_role(
            id,
            role_props("ControlPlanePolicy", PolicyDocument::control_plane()),
        ),
        IdentitySource::WorkerPolicy => {
            provisioner.declare_role(id, role_props("WorkerPolicy", PolicyDocument::worker()))
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource")]
    pub resources: Vec<String>,
}

impl PolicyStatement {
    /// Allows `actions` on every resource.
    pub fn allow_all_resources(actions: &[&str]) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.iter().map(|&action| action.to_owned()).collect(),
            resources: vec!["*".to_owned()],
        }
    }
}

/// An inline policy document, serialized in the provider's JSON policy language.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_LANGUAGE_VERSION.to_owned(),
            statements,
        }
    }

    /// Permissions needed by the cloud controller manager running on control plane nodes.
    pub fn control_plane() -> Self {
        Self::new(vec![PolicyStatement::allow_all_resources(
            CONTROL_PLANE_ACTIONS,
        )])
    }

    /// Permissions needed by the kubelet on worker nodes (node discovery and image pulls).
    pub fn worker() -> Self {
        Self::new(vec![PolicyStatement::allow_all_resources(WORKER_ACTIONS)])
    }
}
