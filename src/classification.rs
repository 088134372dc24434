//! # Size Classification
//!
//! Splits a defect mask into acceptable (OK) and oversized (NOK) parts. Each 8-connected
//! region is measured on its own: its physical area is `area_px * pixel_to_mm²`, and a
//! region whose area is **at or above** the threshold is NOK. No other feature of a
//! region affects its class.

use serde::{Deserialize, Serialize};

use crate::components::{label_components, ComponentLabeling, Connectivity};
use crate::config::MeasurementConfig;
use crate::mask::BinaryMask;
use crate::preprocessing::CropRegion;

/// Acceptance class of a single defect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOK")]
    Nok,
}

impl Classification {
    /// Classifies a physical area. The boundary value itself is NOK.
    pub fn for_area(area_mm2: f64, threshold_mm2: f64) -> Self {
        if area_mm2 >= threshold_mm2 {
            Classification::Nok
        } else {
            Classification::Ok
        }
    }

    pub fn is_nok(&self) -> bool {
        matches!(self, Classification::Nok)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Ok => write!(f, "OK"),
            Classification::Nok => write!(f, "NOK"),
        }
    }
}

/// Converts a pixel count to square millimetres.
pub fn area_mm2(area_px: usize, pixel_to_mm: f64) -> f64 {
    area_px as f64 * pixel_to_mm * pixel_to_mm
}

/// One measured defect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    pub label: u32,
    pub area_px: usize,
    pub area_mm2: f64,
    pub classification: Classification,
    /// Mean pixel position `(x, y)` in mask coordinates
    pub centroid: (f64, f64),
    #[serde(skip)]
    pub bbox: Option<CropRegion>,
    /// Annotation category the defect was found under, if known
    #[serde(rename = "type")]
    pub defect_type: Option<String>,
}

/// Result of splitting a mask by size
#[derive(Debug, Clone)]
pub struct SizeClassification {
    pub mask_ok: BinaryMask,
    pub mask_nok: BinaryMask,
    pub defects: Vec<Defect>,
}

impl SizeClassification {
    /// Union of both masks; equals the classified input mask.
    pub fn combined(&self) -> BinaryMask {
        self.mask_ok
            .union(&self.mask_nok)
            .unwrap_or_else(|| self.mask_ok.clone())
    }

    pub fn nok_count(&self) -> usize {
        self.defects.iter().filter(|d| d.classification.is_nok()).count()
    }

    /// Largest defect area in mm², 0.0 when nothing was found.
    pub fn largest_area_mm2(&self) -> f64 {
        self.defects.iter().map(|d| d.area_mm2).fold(0.0, f64::max)
    }
}

/// Area-threshold classifier for one production line
#[derive(Debug, Clone, Copy)]
pub struct SizeClassifier {
    config: MeasurementConfig,
}

impl SizeClassifier {
    pub fn new(config: MeasurementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// Labels `mask` and partitions its foreground into OK and NOK masks.
    pub fn classify(&self, mask: &BinaryMask) -> SizeClassification {
        let labeling = label_components(mask, Connectivity::Eight);
        let defects = self.defects_from_labeling(&labeling, None);

        let nok_labels: Vec<bool> = std::iter::once(false)
            .chain(defects.iter().map(|d| d.classification.is_nok()))
            .collect();
        let mask_nok = labeling.select(|c| nok_labels[c.label as usize]);
        let mask_ok = labeling.select(|c| !nok_labels[c.label as usize]);

        tracing::debug!(
            target: "defect_inspection",
            components = defects.len(),
            nok = nok_labels.iter().filter(|&&n| n).count(),
            threshold_mm2 = self.config.area_threshold_mm2,
            "Classified mask by size"
        );

        SizeClassification {
            mask_ok,
            mask_nok,
            defects,
        }
    }

    /// Measures every region of `mask`, tagging each with `defect_type`.
    pub fn measure(&self, mask: &BinaryMask, defect_type: Option<&str>) -> Vec<Defect> {
        let labeling = label_components(mask, Connectivity::Eight);
        self.defects_from_labeling(&labeling, defect_type)
    }

    fn defects_from_labeling(
        &self,
        labeling: &ComponentLabeling,
        defect_type: Option<&str>,
    ) -> Vec<Defect> {
        labeling
            .components
            .iter()
            .map(|component| {
                let area = area_mm2(component.area, self.config.pixel_to_mm);
                Defect {
                    label: component.label,
                    area_px: component.area,
                    area_mm2: area,
                    classification: Classification::for_area(
                        area,
                        self.config.area_threshold_mm2,
                    ),
                    centroid: component.centroid,
                    bbox: Some(component.bbox),
                    defect_type: defect_type.map(str::to_string),
                }
            })
            .collect()
    }
}

/// Splits `mask` into `(mask_ok, mask_nok)` for the given threshold and scale.
///
/// # Examples
///
/// ```
/// use roll_inspector::classification::classify_by_size;
/// use roll_inspector::mask::BinaryMask;
///
/// let mask = BinaryMask::from_fn(20, 20, |x, y| x < 10 && y < 10);
/// let (ok, nok) = classify_by_size(&mask, 1.0, 0.134);
/// assert!(ok.is_empty());
/// assert_eq!(nok.count(), 100);
/// ```
pub fn classify_by_size(
    mask: &BinaryMask,
    threshold_mm2: f64,
    pixel_to_mm: f64,
) -> (BinaryMask, BinaryMask) {
    let result = SizeClassifier::new(MeasurementConfig {
        area_threshold_mm2: threshold_mm2,
        pixel_to_mm,
    })
    .classify(mask);
    (result.mask_ok, result.mask_nok)
}

/// Measures every region of `mask` with the given configuration.
pub fn measure_defects(
    mask: &BinaryMask,
    config: &MeasurementConfig,
    defect_type: Option<&str>,
) -> Vec<Defect> {
    SizeClassifier::new(*config).measure(mask, defect_type)
}
