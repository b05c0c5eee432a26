//! Error Handling Module
//!
//! Defines custom error types for the prostate segmentation library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for segmentation pipeline operations
#[derive(Error, Debug)]
pub enum SegError {
    /// Error reading or decoding a NIfTI volume
    #[error("Failed to load volume at {0:?}: {1}")]
    VolumeLoad(PathBuf, String),

    /// Error with dataset operations (discovery, pairing, splitting)
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tensor shape mismatch between collaborating components
    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    /// Label values outside the valid class range
    #[error("Invalid labels: values span [{min}, {max}] but must lie in [0, {num_classes})")]
    InvalidLabels {
        min: i64,
        max: i64,
        num_classes: usize,
    },

    /// Error with model operations (record save/load, forward preconditions)
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// No checkpoint at the expected path (recoverable on the predict path)
    #[error("No checkpoint found at {0:?}")]
    CheckpointMissing(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SegError {
    fn from(err: serde_json::Error) -> Self {
        SegError::Serialization(err.to_string())
    }
}

impl From<nifti::NiftiError> for SegError {
    fn from(err: nifti::NiftiError) -> Self {
        SegError::Dataset(format!("NIfTI error: {err}"))
    }
}

/// Specialized Result type for segmentation operations.
pub type Result<T> = std::result::Result<T, SegError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SegError::Training("loader produced no batches".to_string());
        assert_eq!(err.to_string(), "Training error: loader produced no batches");
    }

    #[test]
    fn test_shape_mismatch_display() {
        let err = SegError::ShapeMismatch {
            expected: "[2, 6, 8, 8, 8]".to_string(),
            found: "[2, 6, 8, 8, 4]".to_string(),
        };
        assert!(err.to_string().contains("[2, 6, 8, 8, 4]"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SegError = io_err.into();
        assert!(matches!(err, SegError::Io(_)));
    }

    #[test]
    fn test_result_type() {
        let success: Result<i32> = Ok(42);
        assert!(success.is_ok());

        let failure: Result<i32> = Err(SegError::Dataset("test".to_string()));
        assert!(failure.is_err());
    }
}
