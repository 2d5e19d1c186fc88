//! Error types for captrain.

use thiserror::Error;

/// Result type alias for captrain operations.
pub type Result<T> = std::result::Result<T, CaptrainError>;

/// Main error type for captrain operations.
#[derive(Error, Debug)]
pub enum CaptrainError {
    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Tokenizer errors.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Image loading or preprocessing errors.
    #[error("Image error: {0}")]
    Image(String),

    /// Tensor backend errors.
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// Tensor shape mismatch.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },
}
