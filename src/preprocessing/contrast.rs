//! # Contrast Enhancement Module
//!
//! Normalizes crop contrast so dark defects separate cleanly from the roll surface.
//! Bright highlights are first clipped to the median intensity, then the image is
//! remapped through the CDF of a two-Gaussian target distribution (histogram
//! specification toward a dark cluster and a bright cluster).

use image::{DynamicImage, GrayImage};

use super::types::{EnhancedImageResult, PreprocessingError};
use crate::config::ContrastConfig;

/// Preprocesses a single-channel image for segmentation.
///
/// The input is never modified; the clipped and remapped result is a fresh buffer.
///
/// # Errors
///
/// Returns `PreprocessingError::InvalidInput` if the image has more than one channel.
///
/// # Examples
///
/// ```
/// use image::{DynamicImage, GrayImage, Luma};
/// use roll_inspector::config::ContrastConfig;
/// use roll_inspector::preprocessing::preprocess;
///
/// let gray = GrayImage::from_pixel(8, 8, Luma([128]));
/// let out = preprocess(&DynamicImage::ImageLuma8(gray), &ContrastConfig::default()).unwrap();
/// assert_eq!(out.dimensions(), (8, 8));
/// ```
pub fn preprocess(
    image: &DynamicImage,
    config: &ContrastConfig,
) -> Result<GrayImage, PreprocessingError> {
    let channels = image.color().channel_count();
    if channels != 1 {
        return Err(PreprocessingError::InvalidInput { channels });
    }

    Ok(enhance_contrast(&image.to_luma8(), config).image)
}

/// Clips highlights to the median and applies the bimodal remap to a grayscale image.
pub fn enhance_contrast(image: &GrayImage, config: &ContrastConfig) -> EnhancedImageResult {
    let start_time = std::time::Instant::now();

    let median = median_intensity(image);
    let clipped = clip_to_median(image, median);
    let lut = bimodal_lookup_table(config);
    let image = apply_lookup_table(&clipped, &lut);

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "defect_inspection",
        "Contrast enhancement completed in {}ms: median={:.1}, dimensions={}x{}",
        processing_time.as_millis(),
        median,
        image.width(),
        image.height()
    );

    EnhancedImageResult {
        image,
        median,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

/// Median intensity of the image. Even pixel counts average the two middle values.
///
/// Returns 0.0 for an image without pixels.
pub fn median_intensity(image: &GrayImage) -> f64 {
    let total = image.as_raw().len();
    if total == 0 {
        return 0.0;
    }

    let mut histogram = [0usize; 256];
    for &value in image.as_raw() {
        histogram[value as usize] += 1;
    }

    // Values at sorted positions (total - 1) / 2 and total / 2
    let lower_rank = (total - 1) / 2;
    let upper_rank = total / 2;
    let mut lower = None;
    let mut upper = None;
    let mut seen = 0usize;

    for (value, &count) in histogram.iter().enumerate() {
        if count == 0 {
            continue;
        }
        seen += count;
        if lower.is_none() && seen > lower_rank {
            lower = Some(value);
        }
        if seen > upper_rank {
            upper = Some(value);
            break;
        }
    }

    match (lower, upper) {
        (Some(lo), Some(hi)) => (lo + hi) as f64 / 2.0,
        _ => 0.0,
    }
}

/// Returns a copy where every pixel strictly brighter than `median` is set to it.
///
/// A fractional median is truncated when written back, as an 8-bit store would.
pub fn clip_to_median(image: &GrayImage, median: f64) -> GrayImage {
    let ceiling = median.floor().clamp(0.0, 255.0) as u8;
    let mut clipped = image.clone();
    for pixel in clipped.pixels_mut() {
        if pixel[0] as f64 > median {
            pixel[0] = ceiling;
        }
    }
    clipped
}

/// Builds the 256-entry remap table for the configured bimodal target.
///
/// The mixture density is normalized to a PMF, accumulated into a CDF that ends at
/// exactly 1, and sampled by piecewise-linear interpolation on the uniform grid.
pub fn bimodal_lookup_table(config: &ContrastConfig) -> [u8; 256] {
    let gaussian = |level: f64, peak: f64, sigma: f64| {
        (-((level - peak).powi(2)) / (2.0 * sigma * sigma)).exp()
    };

    let mut pmf = [0f64; 256];
    for (level, value) in pmf.iter_mut().enumerate() {
        let level = level as f64;
        *value = config.dark_weight * gaussian(level, config.dark_peak, config.dark_sigma)
            + config.bright_weight * gaussian(level, config.bright_peak, config.bright_sigma);
    }

    let total: f64 = pmf.iter().sum();
    let mut cdf = [0f64; 256];
    let mut cumulative = 0f64;
    for (i, value) in pmf.iter().enumerate() {
        cumulative += if total > 0.0 { value / total } else { 1.0 / 256.0 };
        cdf[i] = cumulative;
    }
    let last = cdf[255];
    for value in cdf.iter_mut() {
        *value /= last;
    }

    let mut lut = [0u8; 256];
    for (level, entry) in lut.iter_mut().enumerate() {
        let normalized = level as f64 / 255.0;
        let mapped = interpolate_uniform(normalized, &cdf);
        *entry = (mapped * 255.0).clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Piecewise-linear interpolation of `x` in [0, 1] against values sampled on a
/// uniform grid spanning [0, 1].
fn interpolate_uniform(x: f64, values: &[f64; 256]) -> f64 {
    let position = x.clamp(0.0, 1.0) * 255.0;
    let index = position.floor() as usize;
    if index >= 255 {
        return values[255];
    }
    let fraction = position - index as f64;
    values[index] + fraction * (values[index + 1] - values[index])
}

/// Maps every pixel through a lookup table.
pub fn apply_lookup_table(image: &GrayImage, lut: &[u8; 256]) -> GrayImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
    output
}
