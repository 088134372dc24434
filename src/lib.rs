//! # Roll Inspector
//!
//! Locates, measures and classifies surface defects on annotated images of
//! industrial rolls, and writes per-image overlays, measurement files and
//! defect-type files next to each roll.

pub mod annotations;
pub mod artifacts;
pub mod classification;
pub mod components;
pub mod config;
pub mod errors;
pub mod mask;
pub mod observability;
pub mod preprocessing;
pub mod retry;
pub mod roll_processor;
pub mod segmentation;
pub mod visualization;

// Re-export types for easier access
pub use classification::{Classification, Defect, SizeClassifier};
pub use config::InspectionConfig;
pub use errors::{InspectionError, InspectionResult};
pub use mask::BinaryMask;
pub use roll_processor::{process_roll, RollProcessor, RollReport};
pub use segmentation::{SegmentationStrategy, Segmenter};
