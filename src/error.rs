use thiserror::Error;

use crate::expression::AlternativeId;

/// Unified error type for `mevrs` operations.
#[derive(Debug, Error)]
pub enum ChoiceError {
    /// Raised when a variable is not a column of the row being evaluated.
    #[error("{kind} `{name}` is not a column of the current row")]
    MissingVariable {
        /// Kind of the node that performed the lookup.
        kind: &'static str,
        /// Name of the missing column.
        name: String,
    },

    /// Raised when a free parameter has no value in the supplied assignment.
    #[error("no value supplied for free parameter `{name}`")]
    MissingParameter { name: String },

    /// Raised when a node kind delegated to a numerical backend is evaluated.
    #[error("expression {kind} cannot be evaluated by the row evaluator")]
    Unsupported { kind: &'static str },

    /// Raised when a nest or correction refers to an alternative without a utility.
    #[error("alternative {alternative} used in {context} has no utility function")]
    UnknownAlternative {
        context: &'static str,
        alternative: AlternativeId,
    },

    /// Raised when an alternative is listed in more than one nest of a nested logit.
    #[error("alternative {alternative} belongs to more than one nest")]
    DuplicateNestMembership { alternative: AlternativeId },

    /// Raised when a nest has no member alternative.
    #[error("nest {nest} does not contain any alternative")]
    EmptyNest { nest: usize },

    /// Raised when a per-alternative mapping lacks an entry for an alternative with a utility.
    #[error("alternative {alternative} has a utility function but no {context}")]
    IncompleteMapping {
        context: &'static str,
        alternative: AlternativeId,
    },

    /// Raised when provided arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a database operation names a column that does not exist.
    #[error("database has no column `{name}`")]
    UnknownColumn { name: String },

    /// Raised when two columns of a database share a name.
    #[error("column `{name}` is defined twice")]
    DuplicateColumn { name: String },

    /// Raised when a required component has not been provided to a builder.
    #[error("{component} must be provided before building")]
    MissingComponent { component: &'static str },

    /// Aggregated audit errors, one finding per line.
    #[error("audit failed:\n{report}")]
    Audit { report: String },

    /// Raised when numerical routines produce a non-finite value where one is required.
    #[error("encountered a non-finite value during {context}")]
    NumericalError { context: &'static str },
}

impl ChoiceError {
    /// Helper to format a [`DimensionMismatch`](ChoiceError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for bubbling up missing component errors from builders.
    pub fn missing_component(component: &'static str) -> Self {
        Self::MissingComponent { component }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ChoiceError>;
