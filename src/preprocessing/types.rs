//! # Shared Types for Image Preprocessing
//!
//! This module contains the shared types, structs, and enums used across
//! the preprocessing sub-modules.

use image::GrayImage;

use crate::mask::BinaryMask;

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// Input image does not have a single channel
    InvalidInput { channels: u8 },
    /// Image processing operation failed
    ProcessingFailed { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::InvalidInput { channels } => {
                write!(
                    f,
                    "Input image must be grayscale (1 channel), got {} channels",
                    channels
                )
            }
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Result of the contrast enhancement step.
#[derive(Debug, Clone)]
pub struct EnhancedImageResult {
    /// The remapped grayscale image (a private copy of the input)
    pub image: GrayImage,
    /// Median intensity used as the clipping ceiling
    pub median: f64,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of a thresholding operation.
#[derive(Debug, Clone)]
pub struct ThresholdedImageResult {
    /// Foreground (dark) pixels
    pub mask: BinaryMask,
    /// Global threshold found by Otsu's method; `None` for local strategies
    /// or when the region has no between-class split
    pub threshold: Option<u8>,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// A crop rectangle clamped to image bounds, in absolute image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn x_end(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn y_end(&self) -> u32 {
        self.y + self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether `(x, y)` falls inside the region.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x_end() && y >= self.y && y < self.y_end()
    }
}
