//! Error types for hp-adaptivity.
//!
//! Configuration-class errors abort the current adaptivity step before any
//! refinement is committed. `NoFeasibleRefinement` is the only per-element,
//! recoverable variant: the driver drops the element from the step.

use crate::mesh::ElementType;
use thiserror::Error;

/// Errors that can occur during error estimation, refinement selection
/// and mesh adaptation.
#[derive(Debug, Error)]
pub enum AdaptError {
    /// A diagonal (i, i) entry has no bilinear form to measure the error with.
    #[error("no error form registered for component pair ({i}, {j})")]
    MissingErrorForm {
        /// Row component
        i: usize,
        /// Column component
        j: usize,
    },

    /// Coarse and fine solutions do not form a valid reference pair.
    #[error("incompatible coarse/fine solution pair for component {component}: {reason}")]
    IncompatibleSolutionPair {
        /// Component index
        component: usize,
        /// What failed the reference-pair check
        reason: String,
    },

    /// The element shape is not handled by the 2D adaptivity core.
    #[error("unsupported element shape: {shape:?}")]
    UnsupportedElementShape {
        /// The offending shape
        shape: ElementType,
    },

    /// A polynomial order is outside the supported range.
    #[error("polynomial order {order} out of range (maximum {max})")]
    OrderOutOfRange {
        /// Requested order
        order: usize,
        /// Largest supported order
        max: usize,
    },

    /// Every refinement candidate for the element was pruned.
    #[error("no feasible refinement for element {element} of component {component}")]
    NoFeasibleRefinement {
        /// Component index
        component: usize,
        /// Element id
        element: usize,
    },

    /// An integral could not be evaluated on the element.
    #[error("evaluation failed on element {element} of component {component}: {reason}")]
    EvaluationFailure {
        /// Component index
        component: usize,
        /// Element id
        element: usize,
        /// Cause (degenerate geometry, non-finite value, point outside mesh)
        reason: String,
    },

    /// Number of solutions or spaces does not match the number of components.
    #[error("component count mismatch: expected {expected}, got {got}")]
    ComponentCountMismatch {
        /// Expected number of components
        expected: usize,
        /// Number supplied
        got: usize,
    },

    /// An element id does not exist or is not active where an active element is required.
    #[error("unknown or inactive element {element}")]
    UnknownElement {
        /// Element id
        element: usize,
    },

    /// An adaptivity configuration value is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A specialized `Result` type for adaptivity operations.
pub type Result<T> = std::result::Result<T, AdaptError>;

impl AdaptError {
    /// Returns `true` for configuration errors that must be fixed by the caller
    /// before retrying.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            AdaptError::MissingErrorForm { .. }
                | AdaptError::UnsupportedElementShape { .. }
                | AdaptError::OrderOutOfRange { .. }
                | AdaptError::ComponentCountMismatch { .. }
                | AdaptError::InvalidConfig(_)
        )
    }

    /// Returns `true` if the error only affects a single element and the step
    /// can continue without it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AdaptError::NoFeasibleRefinement { .. })
    }

    /// Attach a component index to an evaluation failure raised without one.
    pub(crate) fn for_component(self, component: usize) -> Self {
        match self {
            AdaptError::EvaluationFailure {
                element, reason, ..
            } => AdaptError::EvaluationFailure {
                component,
                element,
                reason,
            },
            AdaptError::NoFeasibleRefinement { element, .. } => {
                AdaptError::NoFeasibleRefinement { component, element }
            }
            other => other,
        }
    }
}
