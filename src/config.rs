//! # Unified Inspection Configuration
//!
//! This module consolidates every tunable of the inspection engine into a single,
//! structured configuration object. Values that used to be fixed constants (conversion
//! factor, bimodal target parameters) are explicit fields so several production lines
//! can be inspected side by side without sharing state.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{InspectionError, InspectionResult};
use crate::segmentation::SegmentationStrategy;

/// Default pixel-to-millimetre factor (production line 1).
pub const DEFAULT_PIXEL_TO_MM: f64 = 0.13379797308;

/// Calibrated pixel-to-millimetre factors, indexed by production line number.
pub const LINE_PIXEL_TO_MM: [(u8, f64); 5] = [
    (1, 0.13379797308),
    (2, 0.11859801396),
    (3, 0.09883469035),
    (4, 0.11670907867),
    (5, 0.1361281471),
];

/// Physical measurement settings for one production line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    /// Defects with an area at or above this value (mm²) are not acceptable
    pub area_threshold_mm2: f64,
    /// Length of one pixel side in millimetres
    pub pixel_to_mm: f64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            area_threshold_mm2: 1.0,
            pixel_to_mm: DEFAULT_PIXEL_TO_MM,
        }
    }
}

impl MeasurementConfig {
    /// Builds a measurement config from the calibrated factor of a production line.
    pub fn for_line(line: u8, area_threshold_mm2: f64) -> InspectionResult<Self> {
        let pixel_to_mm = LINE_PIXEL_TO_MM
            .iter()
            .find(|(l, _)| *l == line)
            .map(|(_, factor)| *factor)
            .ok_or_else(|| {
                InspectionError::Config(format!(
                    "Unknown production line {}. Known lines: 1-{}",
                    line,
                    LINE_PIXEL_TO_MM.len()
                ))
            })?;

        let config = Self {
            area_threshold_mm2,
            pixel_to_mm,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate measurement configuration
    pub fn validate(&self) -> InspectionResult<()> {
        if !self.area_threshold_mm2.is_finite() || self.area_threshold_mm2 < 0.0 {
            return Err(InspectionError::Config(format!(
                "Area threshold must be a finite value >= 0, got {}",
                self.area_threshold_mm2
            )));
        }
        if !self.pixel_to_mm.is_finite() || self.pixel_to_mm <= 0.0 {
            return Err(InspectionError::Config(format!(
                "pixel_to_mm must be a finite value > 0, got {}",
                self.pixel_to_mm
            )));
        }
        Ok(())
    }
}

/// Target distribution for the bimodal contrast remap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContrastConfig {
    /// Centre of the dark (defect) cluster
    pub dark_peak: f64,
    pub dark_sigma: f64,
    pub dark_weight: f64,
    /// Centre of the bright (background) cluster
    pub bright_peak: f64,
    pub bright_sigma: f64,
    pub bright_weight: f64,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            dark_peak: 20.0,
            dark_sigma: 30.0,
            dark_weight: 0.99,
            bright_peak: 240.0,
            bright_sigma: 60.0,
            bright_weight: 0.01,
        }
    }
}

impl ContrastConfig {
    /// Validate contrast configuration
    pub fn validate(&self) -> InspectionResult<()> {
        if self.dark_sigma <= 0.0 || self.bright_sigma <= 0.0 {
            return Err(InspectionError::Config(
                "Bimodal sigmas must be greater than 0".to_string(),
            ));
        }
        if self.dark_weight < 0.0 || self.bright_weight < 0.0 {
            return Err(InspectionError::Config(
                "Bimodal weights cannot be negative".to_string(),
            ));
        }
        if self.dark_weight + self.bright_weight <= 0.0 {
            return Err(InspectionError::Config(
                "Bimodal weights must have a positive sum".to_string(),
            ));
        }
        let peaks = [self.dark_peak, self.bright_peak];
        if peaks.iter().any(|p| !p.is_finite()) {
            return Err(InspectionError::Config(
                "Bimodal peaks must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Binary segmentation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentationConfig {
    pub strategy: SegmentationStrategy,
    /// Side of the square Gaussian kernel applied before thresholding
    pub blur_kernel: u32,
    /// Constant subtracted from the local mean by the adaptive strategy
    pub adaptive_offset: i32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            strategy: SegmentationStrategy::Adaptive,
            blur_kernel: 5,
            adaptive_offset: 2,
        }
    }
}

impl SegmentationConfig {
    /// Validate segmentation configuration
    pub fn validate(&self) -> InspectionResult<()> {
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 {
            return Err(InspectionError::Config(format!(
                "Blur kernel must be a positive odd number, got {}",
                self.blur_kernel
            )));
        }
        if self.blur_kernel > 31 {
            return Err(InspectionError::Config(
                "Blur kernel cannot be larger than 31".to_string(),
            ));
        }
        Ok(())
    }
}

/// Folder and file naming inside a roll directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollLayoutConfig {
    pub processed_dir: String,
    pub originals_dir: String,
    /// Processed-marker manifest, stored inside `processed_dir`
    pub manifest_file: String,
    /// Lower-case extensions treated as inspectable images
    pub image_extensions: Vec<String>,
    /// Annotation file name, looked up inside each roll folder
    pub annotation_file: String,
}

impl Default for RollLayoutConfig {
    fn default() -> Self {
        Self {
            processed_dir: "procesado".to_string(),
            originals_dir: "originales".to_string(),
            manifest_file: ".manifest.json".to_string(),
            image_extensions: ["jpg", "jpeg", "png", "bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            annotation_file: "formaspack_test_black_dots.json".to_string(),
        }
    }
}

impl RollLayoutConfig {
    /// Validate layout configuration
    pub fn validate(&self) -> InspectionResult<()> {
        if self.processed_dir.trim().is_empty() || self.originals_dir.trim().is_empty() {
            return Err(InspectionError::Config(
                "Processed and originals folder names cannot be empty".to_string(),
            ));
        }
        if self.processed_dir == self.originals_dir {
            return Err(InspectionError::Config(
                "Processed and originals folders must be different".to_string(),
            ));
        }
        if self.manifest_file.trim().is_empty() {
            return Err(InspectionError::Config(
                "Manifest file name cannot be empty".to_string(),
            ));
        }
        if self.image_extensions.is_empty() {
            return Err(InspectionError::Config(
                "At least one image extension is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a file name carries one of the configured image extensions.
    pub fn is_image_file(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.image_extensions
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    }
}

/// Retry policy for filesystem operations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_retry_delay_ms: 50,
            max_retry_delay_ms: 500,
        }
    }
}

impl RecoveryConfig {
    /// Validate recovery configuration parameters
    pub fn validate(&self) -> InspectionResult<()> {
        if self.max_retries > 10 {
            return Err(InspectionError::Config(
                "max_retries cannot be greater than 10".to_string(),
            ));
        }
        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(InspectionError::Config(format!(
                "max_retry_delay_ms ({}) must be >= base_retry_delay_ms ({})",
                self.max_retry_delay_ms, self.base_retry_delay_ms
            )));
        }
        Ok(())
    }
}

/// Worker pool settings for the concurrent roll runner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get().min(8))
                .unwrap_or(2),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> InspectionResult<()> {
        if self.max_workers == 0 || self.max_workers > 64 {
            return Err(InspectionError::Config(format!(
                "max_workers must be between 1 and 64, got {}",
                self.max_workers
            )));
        }
        Ok(())
    }
}

/// Overlay rendering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationConfig {
    /// TrueType font used for labels; system fonts are tried when unset
    pub font_path: Option<PathBuf>,
    /// Label height in pixels
    pub font_scale: f32,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_scale: 16.0,
        }
    }
}

impl VisualizationConfig {
    pub fn validate(&self) -> InspectionResult<()> {
        if !(self.font_scale > 0.0 && self.font_scale <= 200.0) {
            return Err(InspectionError::Config(format!(
                "font_scale must be in (0, 200], got {}",
                self.font_scale
            )));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Environment name (development, staging, production)
    pub environment: String,
    /// Log level for this crate
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn validate(&self) -> InspectionResult<()> {
        let levels = ["trace", "debug", "info", "warn", "error"];
        if !levels.contains(&self.log_level.as_str()) {
            return Err(InspectionError::Config(format!(
                "Invalid log level '{}'. Expected one of {:?}",
                self.log_level, levels
            )));
        }
        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(InspectionError::Config(format!(
                "Invalid log format '{}'. Expected 'json' or 'pretty'",
                self.log_format
            )));
        }
        Ok(())
    }
}

/// Unified inspection configuration
#[derive(Debug, Clone, Default)]
pub struct InspectionConfig {
    /// Directory that contains the roll folders and the annotation file
    pub base_path: PathBuf,
    pub measurement: MeasurementConfig,
    pub contrast: ContrastConfig,
    pub segmentation: SegmentationConfig,
    pub layout: RollLayoutConfig,
    pub recovery: RecoveryConfig,
    pub workers: WorkerConfig,
    pub visualization: VisualizationConfig,
    pub observability: ObservabilityConfig,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> InspectionResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| InspectionError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

impl InspectionConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> InspectionResult<Self> {
        let mut config = Self::default();

        config.base_path = env::var("ROLLS_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let threshold = env_parse("AREA_THRESHOLD_MM2", config.measurement.area_threshold_mm2)?;
        config.measurement = match env::var("PRODUCTION_LINE") {
            Ok(raw) => {
                let line: u8 = raw.trim().parse().map_err(|_| {
                    InspectionError::Config(format!("PRODUCTION_LINE has an invalid value: '{}'", raw))
                })?;
                MeasurementConfig::for_line(line, threshold)?
            }
            Err(_) => MeasurementConfig {
                area_threshold_mm2: threshold,
                pixel_to_mm: env_parse("PIXEL_TO_MM", DEFAULT_PIXEL_TO_MM)?,
            },
        };

        config.segmentation.strategy =
            env_parse("SEGMENTATION_STRATEGY", config.segmentation.strategy)?;

        if let Ok(annotation_file) = env::var("ANNOTATION_FILE") {
            config.layout.annotation_file = annotation_file;
        }

        config.workers.max_workers = env_parse("MAX_WORKERS", config.workers.max_workers)?;
        config.recovery.max_retries = env_parse("FS_MAX_RETRIES", config.recovery.max_retries)?;
        config.visualization.font_path = env::var("LABEL_FONT_PATH").ok().map(PathBuf::from);

        config.observability.environment =
            env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        config.observability.log_level =
            env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        config.observability.log_format =
            env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());

        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> InspectionResult<()> {
        self.measurement.validate()?;
        self.contrast.validate()?;
        self.segmentation.validate()?;
        self.layout.validate()?;
        self.recovery.validate()?;
        self.workers.validate()?;
        self.visualization.validate()?;
        self.observability.validate()?;
        Ok(())
    }

    /// Folder of a roll under the base path.
    pub fn roll_dir(&self, roll: &str) -> PathBuf {
        self.base_path.join(roll)
    }

    /// Path of the annotation file inside a roll folder.
    pub fn annotation_path(&self, roll_dir: &Path) -> PathBuf {
        roll_dir.join(&self.layout.annotation_file)
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: base_path={}, threshold={:.2}mm2, pixel_to_mm={}, strategy={}, workers={}, annotation_file={}",
            self.base_path.display(),
            self.measurement.area_threshold_mm2,
            self.measurement.pixel_to_mm,
            self.segmentation.strategy,
            self.workers.max_workers,
            self.layout.annotation_file
        )
    }
}
