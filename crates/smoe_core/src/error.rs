//! Error types for smoe-rs.

use thiserror::Error;

/// Result type alias using [`SaliencyError`].
pub type Result<T> = std::result::Result<T, SaliencyError>;

/// Errors raised by saliency map operations.
///
/// Every operation checks its preconditions up front and fails fast;
/// no partial results are ever returned alongside an error.
#[derive(Error, Debug)]
pub enum SaliencyError {
    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// Shape mismatch between tensors.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The number of saliency maps or weights does not match the layer count.
    #[error("Layer count mismatch: expected {expected} layers, got {got}")]
    LayerCountMismatch {
        /// Configured layer count.
        expected: usize,
        /// Number actually supplied.
        got: usize,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An observed layer has no captured tensor after a forward pass.
    #[error("No activation captured for layer '{layer}'")]
    MissingActivation {
        /// Name of the observed layer.
        layer: String,
    },

    /// An observed layer ran on a device other than the one the observer accepts.
    #[error("Layer '{layer}' ran on {got} but the observer only accepts {expected}")]
    DeviceMismatch {
        /// Name of the observed layer.
        layer: String,
        /// Device the observer was configured for.
        expected: String,
        /// Device the tensor lived on.
        got: String,
    },

    /// Tensor data could not be read back from the backend.
    #[error("Tensor data error: {0}")]
    DataError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SaliencyError {
    /// Build a [`SaliencyError::InvalidConfig`] from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<serde_json::Error> for SaliencyError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
