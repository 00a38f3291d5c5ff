//! Building blocks for declaring Talos clusters on an infrastructure-as-code platform.
//!
//! The crate is split into three stages which are run once per provisioning run:
//!
//! 1. [`node_group::resolve_node_group`] turns a sparse [`node_group::NodeGroupConfigFragment`]
//!    into a [`node_group::NodeGroupConfig`], applying the defaults of a [`node_group::NodeRole`].
//! 2. [`topology::assemble_topology`] declares the resources of one node group through a
//!    [`provision::Provisioner`], binding the cluster endpoint as soon as it is known and
//!    rewriting the bootstrap document with [`bootstrap::rewrite_endpoint`].
//! 3. [`cluster::assemble_cluster`] composes a control plane and its worker groups.
//!
//! Nothing in here talks to a cloud provider. All resources end up in the provisioner's
//! resource graph, which is synthesized and applied by the platform later on.

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod identity;
pub mod logging;
pub mod node_group;
pub mod provision;
pub mod security;
pub mod tags;
pub mod topology;
