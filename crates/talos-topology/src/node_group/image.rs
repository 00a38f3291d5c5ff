use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::{Snafu, ensure};

use crate::{
    config::{
        fragment::{FromFragment, ValidationError, Validator, validate_field},
        merge::{Atomic, Merge},
    },
    constants::DEFAULT_INSTANCE_TYPE,
};

static INSTANCE_TYPE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9-]*\.[a-z0-9]+$").expect("failed to compile instance type regex")
});

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("{input:?} is not an instance type, expected <family>.<size> (for example t3.small)"))]
pub struct InstanceTypeError {
    input: String,
}

/// Sizing class of an instance, such as `t3.small`.
///
/// The architecture of the instance type has to match the architecture of the machine image.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceType(String);

impl FromStr for InstanceType {
    type Err = InstanceTypeError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ensure!(INSTANCE_TYPE_REGEX.is_match(input), InstanceTypeSnafu { input });
        Ok(Self(input.to_owned()))
    }
}

impl TryFrom<String> for InstanceType {
    type Error = InstanceTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InstanceType> for String {
    fn from(value: InstanceType) -> Self {
        value.0
    }
}

impl Default for InstanceType {
    fn default() -> Self {
        Self(DEFAULT_INSTANCE_TYPE.to_owned())
    }
}

impl Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Atomic for InstanceType {}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ImageSelectorFragment {
    /// Image name to search for, `*` is a wildcard.
    pub name_pattern: Option<String>,

    /// Account that published the image, only used together with `name_pattern`.
    pub owner: Option<String>,

    /// Image id per region. Takes precedence over `name_pattern` when set.
    pub explicit_mapping: Option<BTreeMap<String, String>>,
}

impl Merge for ImageSelectorFragment {
    fn merge(&mut self, defaults: &Self) {
        self.name_pattern.merge(&defaults.name_pattern);
        self.owner.merge(&defaults.owner);
        self.explicit_mapping.merge(&defaults.explicit_mapping);
    }
}

/// How the machine image of a node group is found.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "lookup", rename_all = "camelCase")]
pub enum ImageSelector {
    NamePattern { pattern: String, owner: String },
    ExplicitMapping { mapping: BTreeMap<String, String> },
}

impl FromFragment for ImageSelector {
    type Fragment = ImageSelectorFragment;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: &Validator,
    ) -> Result<Self, ValidationError> {
        if let Some(mapping) = fragment.explicit_mapping {
            if mapping.is_empty() {
                return Err(validator
                    .field(&"explicitMapping")
                    .error_invalid("at least one region must be mapped"));
            }
            return Ok(Self::ExplicitMapping { mapping });
        }

        let pattern: String = validate_field(fragment.name_pattern, validator, &"namePattern")?;
        if pattern.is_empty() {
            return Err(validator
                .field(&"namePattern")
                .error_invalid("the pattern must not be empty"));
        }

        Ok(Self::NamePattern {
            pattern,
            owner: validate_field(fragment.owner, validator, &"owner")?,
        })
    }
}
