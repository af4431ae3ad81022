/// Errors raised by flashattn.
///
/// Configuration problems are reported before any computation starts;
/// allocation and backend failures abort the whole call.
#[derive(Debug, thiserror::Error)]
pub enum FlashError {
    #[error("invalid configuration '{param}': {reason}")]
    InvalidConfig { param: &'static str, reason: String },

    #[error("unsupported storage dtype: {0}")]
    UnsupportedDType(String),

    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("buffer '{name}' has {got} elements, expected {expected}")]
    BufferSize {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl FlashError {
    /// Shorthand for an [`FlashError::InvalidConfig`].
    pub fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        FlashError::InvalidConfig {
            param,
            reason: reason.into(),
        }
    }

    /// Whether this error was raised before computation began.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            FlashError::InvalidConfig { .. }
                | FlashError::UnsupportedDType(_)
                | FlashError::ShapeMismatch { .. }
                | FlashError::BufferSize { .. }
        )
    }
}
