//! Defaults shared by the resolver and the assembler.

/// Used for the cluster ownership tag if no cluster name is given.
pub const DEFAULT_CLUSTER_NAME: &str = "talos";

/// Instance name of single-node groups.
pub const DEFAULT_NODE_NAME: &str = "talos-node";

/// Images are searched by name, `*` matches anything. The region is left as a wildcard so the
/// pattern works across regions.
///
/// Format: `talos-<version>-<region>-<arch>`
pub const DEFAULT_IMAGE_NAME_PATTERN: &str = "talos-v0.11.2-*-amd64";

/// Account publishing the official Talos images.
pub const TALOS_IMAGE_OWNER: &str = "540036508848";

/// Smallest general purpose (amd64) instance type meeting the Talos system requirements.
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.small";

pub const KUBERNETES_API_PORT: u16 = 6443;
pub const TALOS_API_PORT_START: u16 = 50000;
pub const TALOS_API_PORT_END: u16 = 50001;

/// Service principal allowed to assume the roles attached to cluster nodes.
pub const INSTANCE_SERVICE_PRINCIPAL: &str = "ec2.amazonaws.com";
