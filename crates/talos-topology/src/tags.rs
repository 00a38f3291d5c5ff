//! Validated resource tags.
//!
//! Tags are key/value pairs attached to cloud resources. The provider restricts both length and
//! character set, so every [`Tag`] is validated on construction:
//!
//! - keys are 1 to 128 characters long and must not use the reserved `aws:` prefix,
//! - values are 0 to 256 characters long,
//! - both only contain letters, numbers, whitespace and `_ . : / = + - @`.
//!
//! Besides the generic types, [`well_known`] contains the tags the Kubernetes cloud provider
//! integration looks for when discovering cluster resources.
use std::{
    fmt::{Debug, Display},
    ops::Deref,
    str::FromStr,
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};

const TAG_KEY_MAX_LEN: usize = 128;
const TAG_VALUE_MAX_LEN: usize = 256;
const RESERVED_KEY_PREFIX: &str = "aws:";

// Lazily initialized regular expressions
static TAG_CHARSET_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{Z}\p{N}_.:/=+\-@]*$").expect("failed to compile tag charset regex")
});

/// The error type for tag key parsing/validation operations.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TagKeyError {
    #[snafu(display("key input cannot be empty"))]
    EmptyKey,

    #[snafu(display(
        "key exceeds the maximum length - expected {TAG_KEY_MAX_LEN} characters or less, got {length}"
    ))]
    KeyTooLong { length: usize },

    #[snafu(display("key uses the reserved prefix {RESERVED_KEY_PREFIX:?}"))]
    ReservedPrefix,

    #[snafu(display("key contains characters outside of the allowed character set"))]
    KeyInvalid,
}

/// The error type for tag value parsing/validation operations.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TagValueError {
    #[snafu(display(
        "value exceeds the maximum length - expected {TAG_VALUE_MAX_LEN} characters or less, got {length}"
    ))]
    ValueTooLong { length: usize },

    #[snafu(display("value contains characters outside of the allowed character set"))]
    ValueInvalid,
}

/// The error type for tag construction.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum TagError {
    #[snafu(display("failed to parse key {key:?} of tag"))]
    InvalidKey { source: TagKeyError, key: String },

    #[snafu(display("failed to parse value {value:?} for key {key:?}", key = key.to_string()))]
    InvalidValue {
        source: TagValueError,
        key: TagKey,
        value: String,
    },
}

/// A validated tag key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TagKey(String);

impl FromStr for TagKey {
    type Err = TagKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ensure!(!input.is_empty(), EmptyKeySnafu);

        let length = input.chars().count();
        ensure!(length <= TAG_KEY_MAX_LEN, KeyTooLongSnafu { length });
        ensure!(
            !input.to_ascii_lowercase().starts_with(RESERVED_KEY_PREFIX),
            ReservedPrefixSnafu
        );
        ensure!(TAG_CHARSET_REGEX.is_match(input), KeyInvalidSnafu);

        Ok(Self(input.to_owned()))
    }
}

impl Deref for TagKey {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for TagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A validated tag value. Unlike keys, values may be empty.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TagValue(String);

impl FromStr for TagValue {
    type Err = TagValueError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let length = input.chars().count();
        ensure!(length <= TAG_VALUE_MAX_LEN, ValueTooLongSnafu { length });
        ensure!(TAG_CHARSET_REGEX.is_match(input), ValueInvalidSnafu);

        Ok(Self(input.to_owned()))
    }
}

impl Deref for TagValue {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// A validated resource tag.
///
/// ```
/// # use talos_topology::tags::Tag;
/// let tag = Tag::try_from(("kubernetes.io/cluster/talos", "owned")).unwrap();
/// assert_eq!(tag.to_string(), "kubernetes.io/cluster/talos=owned");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Tag {
    pub key: TagKey,
    pub value: TagValue,
}

impl TryFrom<(&str, &str)> for Tag {
    type Error = TagError;

    fn try_from((key, value): (&str, &str)) -> Result<Self, Self::Error> {
        let key = TagKey::from_str(key).context(InvalidKeySnafu { key })?;
        let value = TagValue::from_str(value).context(InvalidValueSnafu {
            key: key.clone(),
            value,
        })?;
        Ok(Self { key, value })
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Tags used by the Kubernetes cloud provider integration.
pub mod well_known {
    use const_format::concatcp;

    use super::{Tag, TagError};

    const KUBERNETES_IO_PREFIX: &str = "kubernetes.io";
    const CLUSTER_KEY_PREFIX: &str = concatcp!(KUBERNETES_IO_PREFIX, "/cluster/");

    /// Subnets that may host internet-facing load balancers.
    pub const ELB_ROLE_KEY: &str = concatcp!(KUBERNETES_IO_PREFIX, "/role/elb");
    /// Subnets that may host internal load balancers.
    pub const INTERNAL_ELB_ROLE_KEY: &str = concatcp!(KUBERNETES_IO_PREFIX, "/role/internal-elb");

    pub const CLUSTER_OWNED_VALUE: &str = "owned";

    /// Creates the `kubernetes.io/cluster/<cluster_name>=owned` tag. This function will return an
    /// error if `cluster_name` doesn't form a valid tag key.
    pub fn cluster_ownership(cluster_name: &str) -> Result<Tag, TagError> {
        Tag::try_from((
            format!("{CLUSTER_KEY_PREFIX}{cluster_name}").as_str(),
            CLUSTER_OWNED_VALUE,
        ))
    }

    pub fn elb_role() -> Tag {
        Tag::try_from((ELB_ROLE_KEY, "1")).expect("failed to parse hard-coded ELB role tag")
    }

    pub fn internal_elb_role() -> Tag {
        Tag::try_from((INTERNAL_ELB_ROLE_KEY, "1"))
            .expect("failed to parse hard-coded internal ELB role tag")
    }
}
