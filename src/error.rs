use thiserror::Error;

/// Possible solver errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RtmError {
    /// Invalid solver options or sensor description
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// The eigen-decomposition of a layer failed or produced non-physical modes
    #[error("numerical instability in layer {layer}: {reason}")]
    NumericalInstability {
        /// Index of the layer, counted from the top
        layer: usize,
        /// What went wrong
        reason: String,
    },
    /// The boundary-value system of the whole stack is singular or nearly so
    #[error("ill-conditioned stack: {0}")]
    IllConditionedStack(String),
    /// A collaborator was called outside of its physical domain
    #[error("{provider}: {quantity} = {value} is outside of the valid domain")]
    Domain {
        /// Name of the provider that refused the input
        provider: &'static str,
        /// Name of the offending input
        quantity: &'static str,
        /// Offending value
        value: f64,
    },
    /// The inputs don't have the expected shape(s)
    #[error("inputs have the wrong shape")]
    InconsistentInputs,
    /// The operation was aborted early
    #[error("operation cancelled early")]
    Cancelled,
}

impl RtmError {
    pub(crate) fn instability(layer: usize, reason: impl Into<String>) -> Self {
        RtmError::NumericalInstability {
            layer,
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        RtmError::Configuration(reason.into())
    }
}

/// Convenience type for `Result<T, RtmError>`.
pub type RtmResult<T> = Result<T, RtmError>;
