//! Fragments are partially validated parts of a node group configuration. For example, mandatory
//! values may be missing. Fragments may be [`validate`]d and turned into their
//! ["full"](`FromFragment`) type.
use std::fmt::{Display, Write};

use snafu::Snafu;

use super::merge::Atomic;

#[cfg(doc)]
use super::merge::Merge;

/// Contains context used for generating validation errors
///
/// Constructed internally in [`validate`]
pub struct Validator<'a> {
    ident: Option<&'a dyn Display>,
    parent: Option<&'a Validator<'a>>,
}

impl Validator<'static> {
    /// Creates a `Validator` for the root object
    ///
    /// Use this when validation needs context that is not part of the fragment itself, otherwise
    /// prefer [`validate`].
    pub fn root() -> Self {
        Self {
            ident: None,
            parent: None,
        }
    }
}

impl Validator<'_> {
    /// Creates a `Validator` for a subfield of the current object
    pub fn field<'b>(&'b self, ident: &'b dyn Display) -> Validator<'b> {
        Validator {
            ident: Some(ident),
            parent: Some(self),
        }
    }

    fn error_problem(&self, problem: ValidationProblem) -> ValidationError {
        let mut idents = Vec::new();
        let mut curr = Some(self);
        while let Some(curr_some) = curr {
            if let Some(ident) = curr_some.ident {
                idents.push(ident.to_string());
            }
            curr = curr_some.parent;
        }
        ValidationError {
            path: FieldPath { idents },
            problem,
        }
    }

    /// Returns an error indicating that the `Validator` refers to a required field that is currently not provided
    pub fn error_required(&self) -> ValidationError {
        self.error_problem(ValidationProblem::FieldRequired)
    }

    /// Returns an error indicating that the field is required because of the value of another field
    pub fn error_required_when(&self, condition: impl Into<String>) -> ValidationError {
        self.error_problem(ValidationProblem::RequiredWhen {
            condition: condition.into(),
        })
    }

    /// Returns an error indicating that the field is set, but to a value that cannot be used
    pub fn error_invalid(&self, reason: impl Into<String>) -> ValidationError {
        self.error_problem(ValidationProblem::InvalidValue {
            reason: reason.into(),
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
struct FieldPath {
    idents: Vec<String>,
}
impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, ident) in self.idents.iter().rev().enumerate() {
            if i > 0 {
                f.write_char('.')?;
            }
            f.write_str(ident)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq, Snafu)]
#[snafu(display("failed to validate {path}"))]
/// An error that occurred when validating an object.
///
/// It is constructed by calling one of the `error_*` methods on [`Validator`], such as [`Validator::error_required`].
pub struct ValidationError {
    path: FieldPath,
    #[snafu(source)]
    problem: ValidationProblem,
}

impl ValidationError {
    /// The dotted path of the offending field, for example `capacity.max`.
    pub fn path(&self) -> String {
        self.path.to_string()
    }

    pub fn problem(&self) -> &ValidationProblem {
        &self.problem
    }
}

/// A problem that was discovered during validation, with no additional context.
#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum ValidationProblem {
    #[snafu(display("field is required"))]
    FieldRequired,

    #[snafu(display("field is required when {condition}"))]
    RequiredWhen { condition: String },

    #[snafu(display("invalid value: {reason}"))]
    InvalidValue { reason: String },
}

/// A type that can be constructed by validating a "fragment" type.
///
/// This is intended to be used together with [`Merge`], such that fragments are collected from
/// multiple layers (for example: cluster defaults, the node group itself and the role defaults),
/// and then validated into the type implementing `FromFragment`.
pub trait FromFragment: Sized {
    /// The fragment type of `Self`.
    ///
    /// For [`Atomic`] types this should be [`Option`](`Option<Self>`).
    ///
    /// For complex structs, this should be a variant of `Self` where each field is replaced by its
    /// respective `Fragment` type.
    type Fragment;

    /// Try to validate a [`Self::Fragment`] into `Self`.
    ///
    /// `validator` contains additional error reporting context, such as the path to the field from
    /// the root fragment. It is created by [`validate`].
    fn from_fragment(
        fragment: Self::Fragment,
        validator: &Validator,
    ) -> Result<Self, ValidationError>;
}
impl<T: Atomic> FromFragment for T {
    type Fragment = Option<T>;

    fn from_fragment(
        fragment: Self::Fragment,
        validator: &Validator,
    ) -> Result<Self, ValidationError> {
        fragment.ok_or_else(|| validator.error_required())
    }
}

/// Validates a [`Fragment`](`FromFragment::Fragment`), and turns it into its corresponding
/// [`FromFragment`] type if successful.
pub fn validate<T: FromFragment>(fragment: T::Fragment) -> Result<T, ValidationError> {
    T::from_fragment(fragment, &Validator::root())
}

/// Validates a required subfield named `ident`.
///
/// ```
/// # use talos_topology::config::fragment::{validate_field, Validator, ValidationError};
/// fn validate_name(name: Option<String>, validator: &Validator) -> Result<String, ValidationError> {
///     validate_field(name, validator, &"name")
/// }
/// ```
pub fn validate_field<T: FromFragment>(
    fragment: T::Fragment,
    validator: &Validator,
    ident: &dyn Display,
) -> Result<T, ValidationError> {
    T::from_fragment(fragment, &validator.field(ident))
}
