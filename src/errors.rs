//! # Inspection Error Types
//!
//! This module defines the error taxonomy used throughout the defect inspection engine.
//! Only an unreadable annotation file aborts a whole roll; every other failure is
//! scoped to a single call or a single image.

use std::fmt;

use crate::preprocessing::PreprocessingError;

/// General inspection error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum InspectionError {
    /// Wrong input passed to an image operation (e.g. a multi-channel image to preprocessing)
    InvalidInput(String),
    /// An annotated image is absent from the roll folder
    MissingFile { roll: String, image: String },
    /// The roll annotation file could not be read or parsed
    Annotation(String),
    /// Reading or writing an image or artifact failed
    Io {
        roll: String,
        image: String,
        operation: String,
        message: String,
    },
    /// Configuration validation errors
    Config(String),
    /// Processing was cancelled between images
    Cancelled,
}

impl InspectionError {
    /// Builds an `Io` error for a whole-image operation.
    pub fn io(roll: &str, image: &str, operation: &str, err: impl fmt::Display) -> Self {
        InspectionError::Io {
            roll: roll.to_string(),
            image: image.to_string(),
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether this error must abort the whole roll rather than a single image.
    pub fn is_fatal_to_roll(&self) -> bool {
        matches!(
            self,
            InspectionError::Annotation(_) | InspectionError::Config(_) | InspectionError::Cancelled
        )
    }
}

impl fmt::Display for InspectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InspectionError::InvalidInput(msg) => write!(f, "[INVALID_INPUT] {}", msg),
            InspectionError::MissingFile { roll, image } => {
                write!(f, "[MISSING_FILE] roll '{}': image '{}' not found", roll, image)
            }
            InspectionError::Annotation(msg) => write!(f, "[ANNOTATION] {}", msg),
            InspectionError::Io {
                roll,
                image,
                operation,
                message,
            } => write!(
                f,
                "[IO] roll '{}', image '{}': {} failed: {}",
                roll, image, operation, message
            ),
            InspectionError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            InspectionError::Cancelled => write!(f, "[CANCELLED] roll processing cancelled"),
        }
    }
}

impl std::error::Error for InspectionError {}

impl From<PreprocessingError> for InspectionError {
    fn from(err: PreprocessingError) -> Self {
        InspectionError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for InspectionError {
    fn from(err: serde_json::Error) -> Self {
        InspectionError::Annotation(err.to_string())
    }
}

impl From<image::ImageError> for InspectionError {
    fn from(err: image::ImageError) -> Self {
        InspectionError::io("", "", "image codec", err)
    }
}

impl From<std::io::Error> for InspectionError {
    fn from(err: std::io::Error) -> Self {
        InspectionError::io("", "", "filesystem", err)
    }
}

/// Result type alias for convenience
pub type InspectionResult<T> = Result<T, InspectionError>;

/// Standardized error logging utilities for consistent error reporting
pub mod error_logging {
    use tracing::error;

    /// Log a per-image processing failure with roll/image context
    pub fn log_image_error(error: &impl std::fmt::Display, roll: &str, image: &str) {
        error!(
            error = %error,
            roll = %roll,
            image = %image,
            "Image processing failed"
        );
    }

    /// Log file system errors with path and operation context
    pub fn log_filesystem_error(
        error: &impl std::fmt::Display,
        operation: &str,
        path: Option<&str>,
        attempt_count: Option<u32>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            path = ?path,
            attempt_count = ?attempt_count,
            "File system operation failed"
        );
    }

    /// Log configuration errors during startup/initialization
    pub fn log_config_error(error: &impl std::fmt::Display, config_key: &str, operation: &str) {
        error!(
            error = %error,
            config_key = %config_key,
            operation = %operation,
            "Configuration error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_context() {
        let err = InspectionError::io("rollo1", "img_01.png", "write measurements", "disk full");
        let msg = err.to_string();
        assert!(msg.contains("rollo1"));
        assert!(msg.contains("img_01.png"));
        assert!(msg.contains("write measurements"));
        assert!(msg.ends_with("disk full"));
    }

    #[test]
    fn test_filesystem_errors_become_io_errors() {
        let err: InspectionError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        match err {
            InspectionError::Io { operation, message, .. } => {
                assert_eq!(operation, "filesystem");
                assert_eq!(message, "gone");
            }
            other => panic!("expected an Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_fatal_classification() {
        assert!(InspectionError::Annotation("x".to_string()).is_fatal_to_roll());
        assert!(InspectionError::Cancelled.is_fatal_to_roll());
        assert!(!InspectionError::MissingFile {
            roll: "r".to_string(),
            image: "i".to_string()
        }
        .is_fatal_to_roll());
        assert!(!InspectionError::io("r", "i", "read", "boom").is_fatal_to_roll());
    }

    #[test]
    fn test_preprocessing_error_conversion() {
        let err: InspectionError = PreprocessingError::InvalidInput { channels: 3 }.into();
        assert!(matches!(err, InspectionError::InvalidInput(_)));
    }
}
