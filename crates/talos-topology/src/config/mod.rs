//! Layered configuration: sparse fragments, merging and validation.
//!
//! Node groups are configured from several places. A cluster definition may carry defaults for
//! all of its groups, each group sets its own values, and finally every [role] brings its own
//! defaults. We don't want callers to repeat themselves, but we also don't want to pass
//! half-initialized structs around and sprinkle `is_none()` checks over the assembly code.
//!
//! So the configuration exists in two shapes:
//!
//! - A *fragment*, where every field is optional. Fragments are what users write and what gets
//!   deserialized. Fragments of different layers are combined with [`Merge`], which prefers the
//!   more specific layer field by field.
//! - The *validated* type, which is produced from a fully merged fragment by [`validate`]. Only
//!   fields where [`None`] is a legal value stay optional.
//!
//! Defaults are not special. They are just another fragment that is merged in last.
//!
//! ```
//! use talos_topology::config::{fragment::validate, merge::merge};
//! use talos_topology::node_group::{CapacityFragment, Capacity};
//!
//! let group = CapacityFragment { min: Some(3), ..Default::default() };
//! let defaults = CapacityFragment { min: Some(1), ..Default::default() };
//!
//! let capacity: Capacity = validate(merge(group, &defaults)).unwrap();
//! assert_eq!((capacity.min, capacity.max), (3, 3));
//! ```
//!
//! [role]: crate::node_group::NodeRole

pub mod fragment;
pub mod merge;

#[cfg(doc)]
use fragment::validate;
#[cfg(doc)]
use merge::Merge;
