//! Fusion errors.

use sofa_span::Span;
use thiserror::Error;

/// Result alias for the fusion pass.
pub type FusionResult<T> = Result<T, FusionError>;

/// Errors that abort fusion of one function.
///
/// None of these is a compile error: the driver keeps the unfused function
/// and moves on.
#[derive(Clone, Debug, Error)]
pub enum FusionError {
    /// A SOAC somewhere other than the right-hand side of a `let`, or a
    /// SOAC whose shape the composer cannot handle.
    #[error("{span}: not in normal form: {message}")]
    NormalizationViolation {
        /// Where the offending expression is.
        span: Span,
        /// What is wrong with it.
        message: String,
    },

    /// A SOAC argument that is not a valid array input.
    #[error("{span}: invalid array input: {message}")]
    InvalidArrayInput {
        /// Where the SOAC is.
        span: Span,
        /// Why the input was rejected.
        message: String,
    },

    /// The pass broke one of its own invariants.
    #[error("{span}: internal fusion invariant violated: {message}")]
    InternalInvariant {
        /// Closest source location.
        span: Span,
        /// The broken invariant.
        message: String,
    },
}

impl FusionError {
    pub(crate) fn normalization(span: Span, message: impl Into<String>) -> Self {
        Self::NormalizationViolation {
            span,
            message: message.into(),
        }
    }

    pub(crate) fn invariant(span: Span, message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            span,
            message: message.into(),
        }
    }

    /// The source location the error refers to.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::NormalizationViolation { span, .. }
            | Self::InvalidArrayInput { span, .. }
            | Self::InternalInvariant { span, .. } => *span,
        }
    }
}
