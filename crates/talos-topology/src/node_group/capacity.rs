use serde::{Deserialize, Serialize};

use crate::config::{
    fragment::{FromFragment, ValidationError, Validator},
    merge::Merge,
};

const DEFAULT_MIN_CAPACITY: u32 = 1;

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CapacityFragment {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub desired: Option<u32>,
}

impl Merge for CapacityFragment {
    fn merge(&mut self, defaults: &Self) {
        self.min.merge(&defaults.min);
        self.max.merge(&defaults.max);
        self.desired.merge(&defaults.desired);
    }
}

/// Instance counts of a scaling group.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub min: u32,
    pub max: u32,

    /// Enforced on every provisioning run when set.
    ///
    /// Leave this unset when the group is scaled by anything else (an autoscaler, or manually),
    /// otherwise the group is reset to this count each time the topology is applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<u32>,
}

impl FromFragment for Capacity {
    type Fragment = CapacityFragment;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: &Validator,
    ) -> Result<Self, ValidationError> {
        let min = fragment.min.unwrap_or(DEFAULT_MIN_CAPACITY);
        // max mirrors the resolved min, not the default
        let max = fragment.max.unwrap_or(min);

        if max < min {
            return Err(validator
                .field(&"max")
                .error_invalid(format!("{max} is less than min ({min})")));
        }
        if max == 0 {
            return Err(validator
                .field(&"max")
                .error_invalid("at least one node is required"));
        }
        if let Some(desired) = fragment.desired
            && !(min..=max).contains(&desired)
        {
            return Err(validator
                .field(&"desired")
                .error_invalid(format!("{desired} is outside of {min}..={max}")));
        }

        Ok(Self {
            min,
            max,
            desired: fragment.desired,
        })
    }
}
