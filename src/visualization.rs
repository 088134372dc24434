//! # Defect Overlay Rendering
//!
//! Paints classified masks onto a colour copy of the inspected frame: NOK pixels in
//! red, OK pixels in green, with optional `"{area}mm2"` labels at each region's
//! centroid. Annotation rectangles are drawn on top as white boxes with a labelled
//! tab.
//!
//! Text needs a TrueType font. When none can be loaded, masks and boxes are still
//! drawn and labels are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect as DrawRect;

use crate::classification::area_mm2;
use crate::components::{label_components, Connectivity};
use crate::config::VisualizationConfig;
use crate::mask::BinaryMask;
use crate::preprocessing::{CropRegion, Rect};

pub const NOK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const OK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Thickness of annotation rectangles in pixels
const BOX_THICKNESS: u32 = 2;

/// Fonts tried when no explicit font path is configured
const SYSTEM_FONT_CANDIDATES: [&str; 5] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Loads the configured font, falling back to common system fonts.
pub fn load_font(font_path: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match font_path {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONT_CANDIDATES.iter().map(PathBuf::from).collect(),
    };

    for candidate in candidates {
        let Ok(data) = fs::read(&candidate) else {
            continue;
        };
        match FontVec::try_from_vec(data) {
            Ok(font) => {
                tracing::debug!(font = %candidate.display(), "Loaded label font");
                return Some(font);
            }
            Err(e) => {
                tracing::warn!(font = %candidate.display(), error = %e, "Invalid font file");
            }
        }
    }

    tracing::warn!("No label font available; area and category labels will not be drawn");
    None
}

/// Converts the base frame to RGB. Colour frames are copied unchanged.
pub fn to_color(image: &DynamicImage) -> RgbImage {
    image.to_rgb8()
}

/// Overlay renderer
pub struct Visualizer {
    font: Option<FontVec>,
    scale: PxScale,
}

impl std::fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visualizer")
            .field("has_font", &self.font.is_some())
            .field("scale", &self.scale.y)
            .finish()
    }
}

impl Visualizer {
    pub fn new(config: &VisualizationConfig) -> Self {
        Self {
            font: load_font(config.font_path.as_deref()),
            scale: PxScale::from(config.font_scale),
        }
    }

    /// A renderer that never draws text.
    pub fn without_font() -> Self {
        Self {
            font: None,
            scale: PxScale::from(VisualizationConfig::default().font_scale),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Renders both masks over a colour copy of `base`.
    ///
    /// With `crop_region`, mask coordinates are relative to the region origin and
    /// painting is confined to it. Area labels are drawn when `pixel_to_mm` is given.
    pub fn render(
        &self,
        base: &DynamicImage,
        mask_ok: &BinaryMask,
        mask_nok: &BinaryMask,
        pixel_to_mm: Option<f64>,
        crop_region: Option<&CropRegion>,
    ) -> RgbImage {
        let mut canvas = to_color(base);
        self.render_into(&mut canvas, mask_ok, mask_nok, pixel_to_mm, crop_region);
        canvas
    }

    /// Same as [`Visualizer::render`] but paints into an existing canvas.
    pub fn render_into(
        &self,
        canvas: &mut RgbImage,
        mask_ok: &BinaryMask,
        mask_nok: &BinaryMask,
        pixel_to_mm: Option<f64>,
        crop_region: Option<&CropRegion>,
    ) {
        let region = crop_region
            .copied()
            .unwrap_or_else(|| CropRegion::new(0, 0, canvas.width(), canvas.height()));

        paint_mask(canvas, mask_nok, &region, NOK_COLOR);
        paint_mask(canvas, mask_ok, &region, OK_COLOR);

        if let Some(pixel_to_mm) = pixel_to_mm {
            self.draw_area_labels(canvas, mask_nok, pixel_to_mm, &region);
            self.draw_area_labels(canvas, mask_ok, pixel_to_mm, &region);
        }
    }

    fn draw_area_labels(
        &self,
        canvas: &mut RgbImage,
        mask: &BinaryMask,
        pixel_to_mm: f64,
        region: &CropRegion,
    ) {
        let Some(font) = &self.font else {
            return;
        };

        for component in label_components(mask, Connectivity::Eight).components {
            let text = format!("{:.2}mm2", area_mm2(component.area, pixel_to_mm));
            let (_, text_h) = text_size(self.scale, font, &text);
            // Text sits above the centroid, like a baseline-anchored label
            let x = component.centroid.0 as i32 + region.x as i32;
            let y = component.centroid.1 as i32 + region.y as i32 - text_h as i32;
            draw_text_mut(canvas, TEXT_COLOR, x, y, self.scale, font, &text);
        }
    }

    /// Draws an annotation rectangle and its category tab.
    ///
    /// The rectangle is clamped to the canvas first, so the box outlines the area that
    /// was actually inspected. Rectangles that miss the canvas draw nothing.
    pub fn draw_bounding_box(&self, canvas: &mut RgbImage, rect: &Rect, label: &str) {
        let Some(region) = rect.clamp_to(canvas.width(), canvas.height()) else {
            tracing::debug!(?rect, "Annotation box lies outside the canvas");
            return;
        };

        for inset in 0..BOX_THICKNESS {
            let w = region.width.saturating_sub(2 * inset);
            let h = region.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                DrawRect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(w, h),
                BOX_COLOR,
            );
        }

        let Some(font) = &self.font else {
            return;
        };
        if label.is_empty() {
            return;
        }

        let (text_w, text_h) = text_size(self.scale, font, label);
        let text_top = if region.y > text_h {
            region.y - text_h
        } else {
            region.y
        };
        let (left, top) = (region.x as i32, text_top as i32);
        if text_w > 0 && text_h > 0 {
            draw_filled_rect_mut(canvas, DrawRect::at(left, top).of_size(text_w, text_h), BOX_COLOR);
        }
        draw_text_mut(canvas, TEXT_COLOR, left, top, self.scale, font, label);
    }
}

/// Renders with the default settings, using a system font for labels when one is found.
pub fn visualize(
    image: &DynamicImage,
    mask_ok: &BinaryMask,
    mask_nok: &BinaryMask,
    pixel_to_mm: Option<f64>,
    crop_region: Option<&CropRegion>,
) -> RgbImage {
    Visualizer::new(&VisualizationConfig::default()).render(
        image,
        mask_ok,
        mask_nok,
        pixel_to_mm,
        crop_region,
    )
}

/// Paints foreground pixels of `mask`, whose origin sits at `region`'s origin.
/// Pixels outside the region or the canvas are left untouched.
pub fn paint_mask(canvas: &mut RgbImage, mask: &BinaryMask, region: &CropRegion, color: Rgb<u8>) {
    for (x, y) in mask.foreground() {
        if x >= region.width || y >= region.height {
            continue;
        }
        let (cx, cy) = (region.x + x, region.y + y);
        if cx < canvas.width() && cy < canvas.height() {
            canvas.put_pixel(cx, cy, color);
        }
    }
}
