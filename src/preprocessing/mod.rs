//! # Image Preprocessing Module
//!
//! This module provides the image-level operations that prepare roll frames for
//! defect segmentation: contrast normalization, noise filtering, thresholding and
//! clamped crop extraction.
//!
//! The module is organized into focused sub-modules:
//! - `contrast`: Median clipping and bimodal histogram specification
//! - `filtering`: Gaussian noise suppression
//! - `thresholding`: Adaptive (local mean) and Otsu inverse thresholding
//! - `cropping`: Annotation rectangle clamping and sub-image extraction
//! - `types`: Shared types and error definitions

pub mod contrast;
pub mod cropping;
pub mod filtering;
pub mod thresholding;
pub mod types;

// Re-export commonly used types and functions for convenience
pub use types::{CropRegion, EnhancedImageResult, PreprocessingError, ThresholdedImageResult};

// Re-export main functions from sub-modules
pub use contrast::{bimodal_lookup_table, enhance_contrast, preprocess};
pub use cropping::{get_crop, Rect};
pub use filtering::{gaussian_blur, separable_blur, BINOMIAL_5};
pub use thresholding::{apply_adaptive_threshold, apply_otsu_threshold};
