//! # Image Thresholding Module
//!
//! Inverse binary thresholding for dark defect extraction. Two rules are provided:
//! a local-mean (adaptive) rule for unevenly lit crops and Otsu's global rule for
//! uniformly lit ones. Both mark pixels *darker* than the threshold as foreground.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::{integral_image, sum_image_pixels};

use super::types::ThresholdedImageResult;
use crate::mask::BinaryMask;

/// Applies local-mean inverse thresholding.
///
/// A pixel becomes foreground when it is at or below its `block_size` x `block_size`
/// neighbourhood mean (rounded) minus `offset`. The neighbourhood replicates edge
/// pixels beyond the image border. `block_size` is forced odd and at least 1.
pub fn apply_adaptive_threshold(
    image: &GrayImage,
    block_size: u32,
    offset: i32,
) -> ThresholdedImageResult {
    let start_time = std::time::Instant::now();

    let block_size = if block_size % 2 == 0 {
        block_size.saturating_sub(1).max(1)
    } else {
        block_size
    };
    let mask = local_mean_mask(image, block_size, offset);
    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "defect_inspection",
        "Adaptive thresholding completed in {}ms: block_size={}, offset={}, foreground={}",
        processing_time.as_millis(),
        block_size,
        offset,
        mask.count()
    );

    ThresholdedImageResult {
        mask,
        threshold: None,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

fn local_mean_mask(image: &GrayImage, block_size: u32, offset: i32) -> BinaryMask {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return BinaryMask::new(width, height);
    }

    let radius = block_size / 2;
    let integral: ImageBuffer<Luma<u64>, Vec<u64>> = integral_image(&pad_replicate(image, radius));

    let area = (block_size as f64) * (block_size as f64);
    BinaryMask::from_fn(width, height, |x, y| {
        // Window in padded coordinates starts at (x, y) and spans `block_size` pixels
        let last = block_size - 1;
        let sum = sum_image_pixels(&integral, x, y, x + last, y + last)[0];
        let mean = (sum as f64 / area).round() as i32;
        (image.get_pixel(x, y)[0] as i32) <= mean - offset
    })
}

/// Grows the image by `radius` on every side, repeating the nearest edge pixel.
fn pad_replicate(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width + 2 * radius, height + 2 * radius, |px, py| {
        let sx = px.saturating_sub(radius).min(width - 1);
        let sy = py.saturating_sub(radius).min(height - 1);
        *image.get_pixel(sx, sy)
    })
}

/// Applies Otsu's inverse binary threshold.
///
/// Pixels at or below the automatically selected level become foreground. A region
/// with a single intensity level has no split and yields an empty mask.
pub fn apply_otsu_threshold(image: &GrayImage) -> ThresholdedImageResult {
    let start_time = std::time::Instant::now();

    let mut histogram = [0u32; 256];
    for pixel in image.pixels() {
        histogram[pixel[0] as usize] += 1;
    }
    let total_pixels = (image.width() as f64) * (image.height() as f64);

    let threshold = find_otsu_threshold(&histogram, total_pixels);
    let mask = match threshold {
        Some(level) => BinaryMask::from_fn(image.width(), image.height(), |x, y| {
            image.get_pixel(x, y)[0] <= level
        }),
        None => BinaryMask::new(image.width(), image.height()),
    };

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "defect_inspection",
        "Otsu thresholding completed in {}ms: threshold={:?}, dimensions={}x{}",
        processing_time.as_millis(),
        threshold,
        image.width(),
        image.height()
    );

    ThresholdedImageResult {
        mask,
        threshold,
        processing_time_ms: processing_time.as_millis() as u32,
    }
}

/// Finds the optimal threshold using Otsu's method by maximizing between-class variance.
///
/// The lower class holds pixels `<= threshold`. Returns `None` when no level splits
/// the histogram into two non-empty classes.
pub fn find_otsu_threshold(histogram: &[u32; 256], total_pixels: f64) -> Option<u8> {
    if total_pixels <= 0.0 {
        return None;
    }

    let mut cumulative_sums = [0f64; 256];
    let mut cumulative_weighted_sums = [0f64; 256];
    let mut cumulative_sum = 0f64;
    let mut cumulative_weighted_sum = 0f64;

    for i in 0..256 {
        let pixel_count = histogram[i] as f64;
        cumulative_sum += pixel_count;
        cumulative_weighted_sum += (i as f64) * pixel_count;
        cumulative_sums[i] = cumulative_sum;
        cumulative_weighted_sums[i] = cumulative_weighted_sum;
    }

    let total_weighted_sum = cumulative_weighted_sums[255];
    let mut max_variance = 0f64;
    let mut optimal_threshold = None;

    for threshold in 0..255 {
        let lower_count = cumulative_sums[threshold];
        let upper_count = total_pixels - lower_count;
        if lower_count == 0.0 || upper_count <= 0.0 {
            continue;
        }

        let w0 = lower_count / total_pixels;
        let w1 = 1.0 - w0;
        let mu0 = cumulative_weighted_sums[threshold] / lower_count;
        let mu1 = (total_weighted_sum - cumulative_weighted_sums[threshold]) / upper_count;

        let variance = w0 * w1 * (mu0 - mu1).powi(2);
        if variance > max_variance {
            max_variance = variance;
            optimal_threshold = Some(threshold as u8);
        }
    }

    optimal_threshold
}
