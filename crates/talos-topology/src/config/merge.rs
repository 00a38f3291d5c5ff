use std::collections::BTreeMap;

/// A type that can be merged with itself
///
/// This is implemented for configuration fragments that can come from several layers (cluster
/// defaults, node group, role defaults) where the more specific layer should take precedence.
///
/// # Example
///
/// ```
/// # use talos_topology::config::merge::Merge;
/// # use talos_topology::node_group::CapacityFragment;
/// let mut capacity = CapacityFragment {
///     min: Some(3),
///     max: None,
///     desired: None,
/// };
/// capacity.merge(&CapacityFragment {
///     min: Some(1),
///     max: Some(5),
///     desired: None,
/// });
/// assert_eq!(capacity, CapacityFragment {
///     min: Some(3), // Set on the more specific layer
///     max: Some(5), // Fallback is used
///     desired: None,
/// });
/// ```
///
/// # Options
///
/// A field should be [`Option`]al if it is [`Atomic`] (for example: [`u32`]) or an enum (since the
/// discriminant matters in this case). Composite fragments should generally *not* be optional.
pub trait Merge {
    /// Merge with `defaults`, preferring values from `self` if they are set there
    fn merge(&mut self, defaults: &Self);
}

impl<T: Merge> Merge for Box<T> {
    fn merge(&mut self, defaults: &Self) {
        T::merge(self, defaults);
    }
}

/// Moving version of [`Merge::merge`], to produce slightly nicer test output
pub fn merge<T: Merge>(mut overrides: T, defaults: &T) -> T {
    overrides.merge(defaults);
    overrides
}

/// Merges a sequence of layers, ordered from the most specific to the least specific one.
///
/// ```
/// # use talos_topology::config::merge::merge_layers;
/// # use talos_topology::node_group::CapacityFragment;
/// let group = CapacityFragment { min: Some(3), ..Default::default() };
/// let cluster = CapacityFragment { max: Some(5), ..Default::default() };
/// let role = CapacityFragment { min: Some(1), max: Some(1), desired: Some(1) };
///
/// let merged = merge_layers(group, [&cluster, &role]);
/// assert_eq!(merged, CapacityFragment { min: Some(3), max: Some(5), desired: Some(1) });
/// ```
pub fn merge_layers<'a, T: Merge + 'a>(
    most_specific: T,
    fallbacks: impl IntoIterator<Item = &'a T>,
) -> T {
    fallbacks.into_iter().fold(most_specific, merge)
}

/// A marker trait for types that are merged atomically (as one single value) rather than
/// trying to merge each field individually
pub trait Atomic: Clone {}
impl Atomic for u8 {}
impl Atomic for u16 {}
impl Atomic for u32 {}
impl Atomic for u64 {}
impl Atomic for usize {}
impl Atomic for bool {}
impl Atomic for String {}
// Per-region image mappings replace each other as a whole, mixing regions of two mappings
// would silently combine images of different releases.
impl Atomic for BTreeMap<String, String> {}

impl<T: Atomic> Merge for Option<T> {
    fn merge(&mut self, defaults: &Self) {
        if self.is_none() {
            self.clone_from(defaults);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Merge, merge, merge_layers};

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Accumulator(u8);
    impl Merge for Accumulator {
        fn merge(&mut self, defaults: &Self) {
            self.0 += defaults.0;
        }
    }

    #[derive(Debug, Default, PartialEq, Eq)]
    struct Mergeable {
        one: Option<u8>,
        two: Option<bool>,
    }
    impl Merge for Mergeable {
        fn merge(&mut self, defaults: &Self) {
            self.one.merge(&defaults.one);
            self.two.merge(&defaults.two);
        }
    }

    #[test]
    fn merge_options() {
        assert_eq!(merge(None, &Some(1u8)), Some(1));
        assert_eq!(merge(Some(0u8), &Some(1)), Some(0));
        assert_eq!(merge(None::<u8>, &None), None);
    }

    #[test]
    fn merge_struct_fields_independently() {
        assert_eq!(
            merge(
                Mergeable {
                    one: Some(0),
                    two: None,
                },
                &Mergeable {
                    one: Some(1),
                    two: Some(false),
                }
            ),
            Mergeable {
                one: Some(0),
                two: Some(false),
            }
        );
    }

    #[test]
    fn merge_mappings_atomically() {
        let group = Some(BTreeMap::from([(
            "us-east-1".to_owned(),
            "ami-1".to_owned(),
        )]));
        let defaults = Some(BTreeMap::from([(
            "eu-west-1".to_owned(),
            "ami-2".to_owned(),
        )]));

        assert_eq!(merge(group.clone(), &defaults), group);
    }

    #[test]
    fn merge_boxed() {
        assert_eq!(
            merge(Box::new(Accumulator(1)), &Box::new(Accumulator(2))),
            Box::new(Accumulator(3))
        );
    }

    #[test]
    fn merge_layers_in_order() {
        let merged = merge_layers(
            Mergeable::default(),
            [
                &Mergeable {
                    one: Some(1),
                    two: None,
                },
                &Mergeable {
                    one: Some(2),
                    two: Some(true),
                },
            ],
        );

        assert_eq!(
            merged,
            Mergeable {
                one: Some(1),
                two: Some(true),
            }
        );
    }
}
