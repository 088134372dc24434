//! # Image Filtering Module
//!
//! Gaussian noise suppression applied ahead of thresholding. Small kernels use the
//! fixed binomial coefficients common to imaging libraries; borders are reflected
//! without repeating the edge pixel.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;

use super::types::PreprocessingError;

/// Binomial 5-tap kernel applied ahead of thresholding by default.
pub const BINOMIAL_5: [f32; 5] = [0.0625, 0.25, 0.375, 0.25, 0.0625];

/// Gaussian coefficients for a square kernel of side `ksize`.
///
/// Sizes 1, 3, 5 and 7 use the classic fixed tables; larger kernels derive sigma as
/// `0.3 * ((ksize - 1) * 0.5 - 1) + 0.8`.
pub fn gaussian_kernel(ksize: u32) -> Result<Vec<f32>, PreprocessingError> {
    if ksize == 0 || ksize % 2 == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("Gaussian kernel size must be odd and positive, got {}", ksize),
        });
    }

    let kernel = match ksize {
        1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => BINOMIAL_5.to_vec(),
        7 => vec![
            0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125,
        ],
        _ => {
            let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
            let radius = (ksize / 2) as i32;
            let raw: Vec<f32> = (-radius..=radius)
                .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
                .collect();
            let sum: f32 = raw.iter().sum();
            raw.into_iter().map(|v| v / sum).collect()
        }
    };
    Ok(kernel)
}

/// Reflects an out-of-range coordinate back into `0..len` without duplicating the edge.
fn reflect_101(index: i64, len: i64) -> u32 {
    if len == 1 {
        return 0;
    }
    let mut i = index;
    while i < 0 || i >= len {
        if i < 0 {
            i = -i;
        }
        if i >= len {
            i = 2 * len - 2 - i;
        }
    }
    i as u32
}

/// Applies a separable Gaussian blur with a square `ksize` kernel.
///
/// # Examples
///
/// ```
/// use image::{GrayImage, Luma};
/// use roll_inspector::preprocessing::gaussian_blur;
///
/// let img = GrayImage::from_pixel(10, 10, Luma([90]));
/// let blurred = gaussian_blur(&img, 5).unwrap();
/// assert_eq!(blurred.get_pixel(3, 3)[0], 90);
/// ```
pub fn gaussian_blur(image: &GrayImage, ksize: u32) -> Result<GrayImage, PreprocessingError> {
    let kernel = gaussian_kernel(ksize)?;
    Ok(separable_blur(image, &kernel))
}

/// Convolves rows then columns with the same 1-D `kernel`, rounding back to 8 bits.
///
/// The kernel length is expected to be odd; the centre tap is `kernel.len() / 2`.
/// Both passes run in floating point on a reflect-101 padded copy, so only the final
/// result is rounded.
pub fn separable_blur(image: &GrayImage, kernel: &[f32]) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || kernel.len() <= 1 {
        return image.clone();
    }

    let start_time = std::time::Instant::now();
    let radius = (kernel.len() / 2) as u32;
    let padded = pad_reflect_101(image, radius);
    let filtered = separable_filter_equal(&padded, kernel);

    let output = GrayImage::from_fn(width, height, |x, y| {
        let value = filtered.get_pixel(x + radius, y + radius)[0];
        Luma([(value + 0.5).clamp(0.0, 255.0) as u8])
    });

    tracing::debug!(
        target: "defect_inspection",
        "Gaussian blur completed in {}ms: taps={}, dimensions={}x{}",
        start_time.elapsed().as_millis(),
        kernel.len(),
        width,
        height
    );

    output
}

/// Float copy of `image` grown by `radius` on every side with reflect-101 borders.
fn pad_reflect_101(image: &GrayImage, radius: u32) -> ImageBuffer<Luma<f32>, Vec<f32>> {
    let (width, height) = image.dimensions();
    let offset = radius as i64;
    ImageBuffer::from_fn(width + 2 * radius, height + 2 * radius, |px, py| {
        let sx = reflect_101(px as i64 - offset, width as i64);
        let sy = reflect_101(py as i64 - offset, height as i64);
        Luma([image.get_pixel(sx, sy)[0] as f32])
    })
}
