//! # Binary Masks
//!
//! A boolean grid with the same extent as the image or crop it was computed from.
//! `true` marks a candidate defect pixel.

use image::{GrayImage, Luma};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

impl BinaryMask {
    /// Creates an all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    /// Renders the mask as a 0/255 grayscale image.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Pixel value; out-of-range coordinates read as background.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[self.index(x, y)]
    }

    /// Sets a pixel; out-of-range coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.index(x, y);
        self.data[idx] = value;
    }

    /// Row-major pixel data.
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Number of foreground pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// True when the mask has no foreground pixel.
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|&v| v)
    }

    /// Iterates `(x, y)` of foreground pixels in raster order.
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width.max(1) as usize;
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(move |(i, _)| ((i % width) as u32, (i / width) as u32))
    }

    /// Pixel-wise OR. Returns `None` when the extents differ.
    pub fn union(&self, other: &BinaryMask) -> Option<BinaryMask> {
        self.zip_with(other, |a, b| a || b)
    }

    /// Pixel-wise AND. Returns `None` when the extents differ.
    pub fn intersection(&self, other: &BinaryMask) -> Option<BinaryMask> {
        self.zip_with(other, |a, b| a && b)
    }

    fn zip_with(&self, other: &BinaryMask, op: impl Fn(bool, bool) -> bool) -> Option<BinaryMask> {
        if self.dimensions() != other.dimensions() {
            return None;
        }
        Some(BinaryMask {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| op(a, b))
                .collect(),
        })
    }

    /// ORs `other` into this mask with its origin at `(x0, y0)`; parts falling
    /// outside this mask are dropped.
    pub fn or_at(&mut self, other: &BinaryMask, x0: u32, y0: u32) {
        for (x, y) in other.foreground() {
            let (tx, ty) = (x0 as u64 + x as u64, y0 as u64 + y as u64);
            if tx < self.width as u64 && ty < self.height as u64 {
                self.set(tx as u32, ty as u32, true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mask_is_empty() {
        let mask = BinaryMask::new(4, 3);
        assert_eq!(mask.dimensions(), (4, 3));
        assert!(mask.is_empty());
        assert_eq!(mask.count(), 0);
    }

    #[test]
    fn test_to_gray_marks_foreground_white() {
        let mask = BinaryMask::from_fn(3, 3, |x, y| x == 1 && y == 2);
        let gray = mask.to_gray();
        assert_eq!(gray.get_pixel(1, 2)[0], 255);
        assert_eq!(gray.pixels().filter(|p| p[0] != 0).count(), 1);
    }

    #[test]
    fn test_out_of_range_access_is_background() {
        let mut mask = BinaryMask::new(2, 2);
        mask.set(5, 5, true);
        assert!(!mask.get(5, 5));
        assert!(mask.is_empty());
    }

    #[test]
    fn test_foreground_in_raster_order() {
        let mask = BinaryMask::from_fn(3, 2, |x, y| (x + y) % 2 == 0);
        let points: Vec<_> = mask.foreground().collect();
        assert_eq!(points, vec![(0, 0), (2, 0), (1, 1)]);
    }

    #[test]
    fn test_union_and_intersection_require_same_extent() {
        let a = BinaryMask::from_fn(2, 2, |x, _| x == 0);
        let b = BinaryMask::from_fn(2, 2, |_, y| y == 0);
        assert_eq!(a.union(&b).map(|m| m.count()), Some(3));
        assert_eq!(a.intersection(&b).map(|m| m.count()), Some(1));
        assert!(a.union(&BinaryMask::new(3, 2)).is_none());
    }

    #[test]
    fn test_or_at_clips_to_bounds() {
        let mut acc = BinaryMask::new(5, 5);
        let patch = BinaryMask::from_fn(3, 3, |_, _| true);
        acc.or_at(&patch, 3, 3);
        assert_eq!(acc.count(), 4);
        assert!(acc.get(4, 4));
        assert!(!acc.get(2, 2));
    }
}
