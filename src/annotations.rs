//! # Roll Annotations
//!
//! Parses the labelling tool's export: a JSON array of per-image records, each with
//! a label source and a list of annotated crops. Only human-verified records
//! (`manual`, `ground-truth`) and crops of the two recognised defect categories take
//! part in inspection. Everything else is dropped here, silently.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{InspectionError, InspectionResult};
use crate::preprocessing::Rect;

/// Label sources whose annotations are trusted for inspection
pub const TRUSTED_LABEL_SOURCES: [&str; 2] = ["manual", "ground-truth"];

/// One record of the annotation export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    pub label_source: String,
    pub original_file_name: String,
    #[serde(default)]
    pub crops: Vec<AnnotatedCrop>,
}

impl AnnotationRecord {
    pub fn is_trusted(&self) -> bool {
        TRUSTED_LABEL_SOURCES.contains(&self.label_source.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedCrop {
    pub image_object_id: String,
    pub rect: Rect,
}

/// Recognised defect categories, ordered by their annotation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefectCategory {
    /// Scale/residue lump
    PegoteCascarilla,
    /// Black spot
    PuntoNegro,
}

impl DefectCategory {
    /// Maps an annotation object id to a category; unknown ids yield `None`.
    pub fn from_object_id(id: &str) -> Option<Self> {
        match id {
            "punto-negro" => Some(DefectCategory::PuntoNegro),
            "pegote-cascarilla" => Some(DefectCategory::PegoteCascarilla),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DefectCategory::PuntoNegro => "punto-negro",
            DefectCategory::PegoteCascarilla => "pegote-cascarilla",
        }
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A crop that passed category filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualifyingCrop {
    /// Position of the crop in the record's original crop list
    pub index: usize,
    pub category: DefectCategory,
    pub rect: Rect,
}

/// An image selected for inspection with its qualifying crops
#[derive(Debug, Clone, PartialEq)]
pub struct QualifyingImage {
    pub file_name: String,
    pub crops: Vec<QualifyingCrop>,
}

impl QualifyingImage {
    /// Distinct categories among the crops, sorted.
    pub fn categories(&self) -> Vec<DefectCategory> {
        let mut categories: Vec<DefectCategory> = self.crops.iter().map(|c| c.category).collect();
        categories.sort();
        categories.dedup();
        categories
    }
}

/// Reads and parses an annotation export.
///
/// # Errors
///
/// Returns `InspectionError::Annotation` if the file cannot be read or is not a
/// valid annotation array.
pub fn load_annotations(path: &Path) -> InspectionResult<Vec<AnnotationRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        InspectionError::Annotation(format!(
            "Failed to read annotation file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_annotations(&content).map_err(|e| match e {
        InspectionError::Annotation(msg) => InspectionError::Annotation(format!(
            "Invalid annotation file '{}': {}",
            path.display(),
            msg
        )),
        other => other,
    })
}

/// Parses annotation JSON text.
pub fn parse_annotations(content: &str) -> InspectionResult<Vec<AnnotationRecord>> {
    let records: Vec<AnnotationRecord> = serde_json::from_str(content)?;
    debug!(records = records.len(), "Parsed annotation records");
    Ok(records)
}

/// Selects trusted records and their recognised crops.
///
/// Records are kept in file order. When the same image appears in several trusted
/// records only the first is used.
pub fn qualifying_images(records: &[AnnotationRecord]) -> Vec<QualifyingImage> {
    let mut seen = HashSet::new();
    let mut images = Vec::new();

    for record in records {
        if !record.is_trusted() {
            debug!(
                image = %record.original_file_name,
                label_source = %record.label_source,
                "Skipping untrusted annotation record"
            );
            continue;
        }
        if !seen.insert(record.original_file_name.as_str()) {
            warn!(
                image = %record.original_file_name,
                "Duplicate annotation record ignored"
            );
            continue;
        }

        let crops = record
            .crops
            .iter()
            .enumerate()
            .filter_map(|(index, crop)| {
                DefectCategory::from_object_id(&crop.image_object_id).map(|category| {
                    QualifyingCrop {
                        index,
                        category,
                        rect: crop.rect,
                    }
                })
            })
            .collect();

        images.push(QualifyingImage {
            file_name: record.original_file_name.clone(),
            crops,
        });
    }

    images
}
