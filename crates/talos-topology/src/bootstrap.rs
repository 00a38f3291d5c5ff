//! Loading and rewriting of Talos bootstrap documents (`controlplane.yaml`, `join.yaml`).
//!
//! The documents are produced by `talosctl gen config <cluster-name> https://<endpoint>:6443`.
//! At that point the real endpoint of the cluster is usually not known yet, so a placeholder
//! (for example `talos.cluster`) is used and later replaced with the address of the provisioned
//! load balancer or elastic address.
//!
//! The rewrite is a plain text operation. The document is never parsed, which means every
//! occurrence of the placeholder is replaced, no matter in which field it appears.
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to read node config from {path}", path = path.display()))]
    ReadNodeConfig {
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Reads a bootstrap document from `path`.
///
/// The content is mandatory configuration, so any I/O error is returned as-is (as the source of
/// [`Error::ReadNodeConfig`]) without retrying.
pub fn load_node_config(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).context(ReadNodeConfigSnafu { path })
}

/// Replaces every literal occurrence of `from` in `text` with `to`.
///
/// Neither `from` nor `to` are interpreted as patterns. An empty `from` matches nothing and
/// returns `text` unchanged.
///
/// Occurrences are replaced in a single left-to-right pass, so the result can still contain `from`
/// and rewriting it again changes it further:
///
/// - `to` contains `from`: rewriting `talos.cluster` to `talos.cluster.internal` keeps growing the
///   endpoint on every run.
/// - a replacement joins with its surroundings into a new occurrence: rewriting `ab` to `a` in
///   `aabb` yields `aab`, which contains `ab` again.
pub fn rewrite_endpoint(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_owned();
    }

    text.replace(from, to)
}
