//! # Image Cropping Module
//!
//! This module isolates annotated regions of interest from a roll frame. Annotation
//! rectangles may extend past the frame edges, so every rectangle is clamped to the
//! image bounds before any pixel is read.

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

use super::types::CropRegion;

/// An annotation rectangle in image coordinates. Offsets may be negative and the
/// extent may run past the image edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Intersects the rectangle with a `width` x `height` image.
    ///
    /// The start edge is clamped to 0 and the end edge (`x + w`, `y + h`) to the
    /// image size. Returns `None` when nothing of the rectangle lies on the image.
    ///
    /// # Examples
    ///
    /// ```
    /// use roll_inspector::preprocessing::{CropRegion, Rect};
    ///
    /// let region = Rect::new(-5, -5, 20, 20).clamp_to(100, 100);
    /// assert_eq!(region, Some(CropRegion::new(0, 0, 15, 15)));
    /// ```
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<CropRegion> {
        let (x, y) = (self.x as i64, self.y as i64);
        let x1 = x.max(0);
        let y1 = y.max(0);
        let x2 = (x + self.w as i64).min(width as i64);
        let y2 = (y + self.h as i64).min(height as i64);

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(CropRegion::new(
            x1 as u32,
            y1 as u32,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
        ))
    }
}

/// Extracts the clamped sub-image covered by `rect`.
///
/// Returns the copied pixels together with the region they were taken from, or
/// `None` when the rectangle does not overlap the image.
pub fn get_crop(image: &GrayImage, rect: &Rect) -> Option<(GrayImage, CropRegion)> {
    let region = match rect.clamp_to(image.width(), image.height()) {
        Some(region) => region,
        None => {
            tracing::debug!(
                target: "defect_inspection",
                "Rectangle {:?} does not overlap {}x{} image",
                rect,
                image.width(),
                image.height()
            );
            return None;
        }
    };

    let crop = imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image();

    tracing::debug!(
        target: "defect_inspection",
        "Extracted crop {:?} -> {:?} ({}x{})",
        rect,
        region,
        crop.width(),
        crop.height()
    );

    Some((crop, region))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_clamp_negative_offset() {
        let region = Rect::new(-5, -5, 20, 20)
            .clamp_to(100, 100)
            .expect("rectangle overlaps the image");
        assert_eq!(region, CropRegion::new(0, 0, 15, 15));
    }

    #[test]
    fn test_clamp_past_far_edge() {
        let region = Rect::new(90, 95, 30, 30)
            .clamp_to(100, 100)
            .expect("rectangle overlaps the image");
        assert_eq!(region, CropRegion::new(90, 95, 10, 5));
    }

    #[test]
    fn test_clamp_inside_is_unchanged() {
        let region = Rect::new(10, 20, 30, 40).clamp_to(100, 100);
        assert_eq!(region, Some(CropRegion::new(10, 20, 30, 40)));
    }

    #[test]
    fn test_clamp_outside_or_degenerate_is_none() {
        assert_eq!(Rect::new(100, 0, 10, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(-20, -20, 10, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(5, 5, 0, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(5, 5, -3, 10).clamp_to(100, 100), None);
    }

    #[test]
    fn test_clamp_extreme_values_do_not_overflow() {
        let region = Rect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX).clamp_to(50, 50);
        assert_eq!(region, None);

        let region = Rect::new(0, 0, i32::MAX, i32::MAX).clamp_to(50, 40);
        assert_eq!(region, Some(CropRegion::new(0, 0, 50, 40)));
    }

    #[test]
    fn test_clamped_regions_stay_in_bounds() {
        let (width, height) = (37u32, 23u32);
        for x in [-40, -3, 0, 5, 36, 37, 60] {
            for w in [-1, 0, 1, 10, 50, 100] {
                let rect = Rect::new(x, x / 2, w, w);
                if let Some(region) = rect.clamp_to(width, height) {
                    assert!(region.width > 0 && region.height > 0);
                    assert!(region.x_end() <= width, "{:?} -> {:?}", rect, region);
                    assert!(region.y_end() <= height, "{:?} -> {:?}", rect, region);
                }
            }
        }
    }

    #[test]
    fn test_get_crop_copies_pixels() {
        let img = GrayImage::from_fn(20, 20, |x, y| Luma([(x + y * 20) as u8]));
        let (crop, region) = get_crop(&img, &Rect::new(18, -2, 5, 5)).expect("overlapping rect");

        assert_eq!(region, CropRegion::new(18, 0, 2, 3));
        assert_eq!(crop.dimensions(), (2, 3));
        assert_eq!(crop.get_pixel(0, 0)[0], 18);
        assert_eq!(crop.get_pixel(1, 2)[0], (19 + 2 * 20) as u8);
    }

    #[test]
    fn test_rect_deserializes_from_annotation_json() {
        let rect: Rect = serde_json::from_str(r#"{"x": -5, "y": 3, "w": 20, "h": 7}"#)
            .expect("rect json should parse");
        assert_eq!(rect, Rect::new(-5, 3, 20, 7));
    }
}
