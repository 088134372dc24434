//! # Defect Segmentation
//!
//! Turns a grayscale crop into a foreground/background mask. Both strategies blur the
//! region first and then apply an inverse binary rule, so dark defects become
//! foreground:
//!
//! - [`SegmentationStrategy::Adaptive`] compares each pixel with the mean of a square
//!   window whose side is half the shorter crop dimension. Handles uneven lighting.
//! - [`SegmentationStrategy::Otsu`] picks one global level for the whole crop.

use std::fmt;
use std::str::FromStr;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::config::{ContrastConfig, SegmentationConfig};
use crate::mask::BinaryMask;
use crate::preprocessing::{
    apply_adaptive_threshold, apply_otsu_threshold, enhance_contrast, filtering, separable_blur,
    PreprocessingError, BINOMIAL_5,
};

/// Constant subtracted from the local mean by the adaptive rule.
pub const DEFAULT_ADAPTIVE_OFFSET: i32 = 2;

/// Thresholding rule selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationStrategy {
    #[default]
    Adaptive,
    Otsu,
}

impl fmt::Display for SegmentationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationStrategy::Adaptive => write!(f, "adaptive"),
            SegmentationStrategy::Otsu => write!(f, "otsu"),
        }
    }
}

impl FromStr for SegmentationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "adaptive" | "local" => Ok(SegmentationStrategy::Adaptive),
            "otsu" | "global" => Ok(SegmentationStrategy::Otsu),
            other => Err(format!(
                "Unknown segmentation strategy '{}'. Expected 'adaptive' or 'otsu'",
                other
            )),
        }
    }
}

/// Window side for the adaptive rule: half the shorter side, made odd, at least 1.
pub fn adaptive_block_size(width: u32, height: u32) -> u32 {
    let half = width.min(height) / 2;
    let odd = if half % 2 == 0 { half.saturating_sub(1) } else { half };
    odd.max(1)
}

/// Blurs with the default 5-tap kernel and applies the adaptive inverse threshold.
///
/// # Examples
///
/// ```
/// use image::{GrayImage, Luma};
/// use roll_inspector::segmentation::segment_adaptive;
///
/// let img = GrayImage::from_pixel(1, 1, Luma([50]));
/// let mask = segment_adaptive(&img);
/// assert_eq!(mask.dimensions(), (1, 1));
/// ```
pub fn segment_adaptive(image: &GrayImage) -> BinaryMask {
    let blurred = separable_blur(image, &BINOMIAL_5);
    let block_size = adaptive_block_size(image.width(), image.height());
    apply_adaptive_threshold(&blurred, block_size, DEFAULT_ADAPTIVE_OFFSET).mask
}

/// Blurs with the default 5-tap kernel and applies Otsu's inverse threshold.
pub fn segment_global(image: &GrayImage) -> BinaryMask {
    let blurred = separable_blur(image, &BINOMIAL_5);
    apply_otsu_threshold(&blurred).mask
}

/// Preprocessing plus thresholding, configured once and reused for every crop.
#[derive(Debug, Clone)]
pub struct Segmenter {
    strategy: SegmentationStrategy,
    kernel: Vec<f32>,
    adaptive_offset: i32,
    contrast: ContrastConfig,
}

impl Segmenter {
    /// Builds a segmenter, resolving the blur kernel up front.
    pub fn new(
        segmentation: &SegmentationConfig,
        contrast: &ContrastConfig,
    ) -> Result<Self, PreprocessingError> {
        Ok(Self {
            strategy: segmentation.strategy,
            kernel: filtering::gaussian_kernel(segmentation.blur_kernel)?,
            adaptive_offset: segmentation.adaptive_offset,
            contrast: *contrast,
        })
    }

    pub fn with_strategy(strategy: SegmentationStrategy) -> Self {
        Self {
            strategy,
            kernel: BINOMIAL_5.to_vec(),
            adaptive_offset: DEFAULT_ADAPTIVE_OFFSET,
            contrast: ContrastConfig::default(),
        }
    }

    pub fn strategy(&self) -> SegmentationStrategy {
        self.strategy
    }

    /// Segments an already preprocessed region. The mask has the region's extent.
    pub fn segment(&self, image: &GrayImage) -> BinaryMask {
        let blurred = separable_blur(image, &self.kernel);
        let result = match self.strategy {
            SegmentationStrategy::Adaptive => {
                let block_size = adaptive_block_size(image.width(), image.height());
                apply_adaptive_threshold(&blurred, block_size, self.adaptive_offset)
            }
            SegmentationStrategy::Otsu => apply_otsu_threshold(&blurred),
        };

        tracing::debug!(
            target: "defect_inspection",
            strategy = %self.strategy,
            width = image.width(),
            height = image.height(),
            foreground = result.mask.count(),
            "Segmented region"
        );

        result.mask
    }

    /// Contrast-enhances a raw crop, then segments it.
    pub fn segment_crop(&self, crop: &GrayImage) -> BinaryMask {
        let enhanced = enhance_contrast(crop, &self.contrast);
        self.segment(&enhanced.image)
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::with_strategy(SegmentationStrategy::Adaptive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn spot_image() -> GrayImage {
        let mut img = GrayImage::from_pixel(40, 40, Luma([220]));
        for y in 15..22 {
            for x in 15..22 {
                img.put_pixel(x, y, Luma([10]));
            }
        }
        img
    }

    #[test]
    fn test_adaptive_block_size() {
        assert_eq!(adaptive_block_size(100, 100), 49);
        assert_eq!(adaptive_block_size(98, 200), 49);
        assert_eq!(adaptive_block_size(60, 14), 7);
        assert_eq!(adaptive_block_size(4, 4), 1);
        assert_eq!(adaptive_block_size(1, 1), 1);
        assert_eq!(adaptive_block_size(1, 500), 1);
    }

    #[test]
    fn test_strategy_parsing_and_display() {
        assert_eq!(
            "Adaptive".parse::<SegmentationStrategy>(),
            Ok(SegmentationStrategy::Adaptive)
        );
        assert_eq!(
            "otsu".parse::<SegmentationStrategy>(),
            Ok(SegmentationStrategy::Otsu)
        );
        assert!("watershed".parse::<SegmentationStrategy>().is_err());
        assert_eq!(SegmentationStrategy::Otsu.to_string(), "otsu");
    }

    #[test]
    fn test_both_strategies_find_dark_spot() {
        let img = spot_image();
        for strategy in [SegmentationStrategy::Adaptive, SegmentationStrategy::Otsu] {
            let mask = Segmenter::with_strategy(strategy).segment(&img);
            assert_eq!(mask.dimensions(), (40, 40));
            assert!(mask.get(18, 18), "{} missed the spot centre", strategy);
            assert!(!mask.get(2, 2), "{} marked the background", strategy);
        }
    }

    #[test]
    fn test_segment_matches_free_functions() {
        let img = spot_image();
        assert_eq!(
            Segmenter::with_strategy(SegmentationStrategy::Adaptive).segment(&img),
            segment_adaptive(&img)
        );
        assert_eq!(
            Segmenter::with_strategy(SegmentationStrategy::Otsu).segment(&img),
            segment_global(&img)
        );
    }

    #[test]
    fn test_segmentation_is_deterministic() {
        let img = spot_image();
        assert_eq!(segment_adaptive(&img), segment_adaptive(&img));
    }

    #[test]
    fn test_degenerate_images() {
        let single = GrayImage::from_pixel(1, 1, Luma([0]));
        assert_eq!(segment_adaptive(&single).dimensions(), (1, 1));
        assert!(segment_global(&single).is_empty());

        let line = GrayImage::from_fn(9, 1, |x, _| Luma([(x * 20) as u8]));
        assert_eq!(segment_adaptive(&line).dimensions(), (9, 1));
    }

    #[test]
    fn test_segmenter_rejects_even_kernel() {
        let config = SegmentationConfig {
            blur_kernel: 4,
            ..SegmentationConfig::default()
        };
        assert!(Segmenter::new(&config, &ContrastConfig::default()).is_err());
    }

    #[test]
    fn test_segment_crop_applies_contrast() {
        let mask = Segmenter::default().segment_crop(&spot_image());
        assert!(mask.get(18, 18));
        assert!(!mask.get(0, 39));
    }
}
