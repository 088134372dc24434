//! # Roll Artifacts
//!
//! Everything the inspection writes next to a roll:
//!
//! ```text
//! <roll>/procesado/<name>              overlay image
//! <roll>/procesado/<name>.txt          "<label> <area>mm2" per defect
//! <roll>/procesado/<name>.json         {"tipos": [...]}
//! <roll>/procesado/.manifest.json      processed marker per image
//! <roll>/originales/<name>             archived original
//! ```
//!
//! Artifacts are written to a temporary file in the target folder and renamed into
//! place, so a crash never leaves a half-written file under its final name.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbImage};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::annotations::DefectCategory;
use crate::classification::{Classification, Defect};
use crate::config::RollLayoutConfig;

lazy_static! {
    static ref MEASUREMENT_LINE: Regex =
        Regex::new(r"^\s*(\d+)\s+([0-9]+(?:\.[0-9]+)?)mm2\s*$")
            .expect("Measurement line pattern should be valid");
}

/// Resolved paths of one roll folder
#[derive(Debug, Clone)]
pub struct RollLayout {
    pub roll_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub originals_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl RollLayout {
    pub fn new(roll_dir: &Path, config: &RollLayoutConfig) -> Self {
        let processed_dir = roll_dir.join(&config.processed_dir);
        Self {
            roll_dir: roll_dir.to_path_buf(),
            originals_dir: roll_dir.join(&config.originals_dir),
            manifest_path: processed_dir.join(&config.manifest_file),
            processed_dir,
        }
    }

    /// Roll name as used in logs and errors.
    pub fn roll_name(&self) -> String {
        self.roll_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.roll_dir.display().to_string())
    }

    /// Creates the processed and originals folders if needed.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.processed_dir)?;
        fs::create_dir_all(&self.originals_dir)
    }

    pub fn source_image(&self, name: &str) -> PathBuf {
        self.roll_dir.join(name)
    }

    pub fn processed_image(&self, name: &str) -> PathBuf {
        self.processed_dir.join(name)
    }

    pub fn measurement_file(&self, name: &str) -> PathBuf {
        self.processed_dir.join(format!("{}.txt", name))
    }

    pub fn defect_types_file(&self, name: &str) -> PathBuf {
        self.processed_dir.join(format!("{}.json", name))
    }

    pub fn archived_original(&self, name: &str) -> PathBuf {
        self.originals_dir.join(name)
    }
}

/// Writes `bytes` to a sibling temp file, syncs it and renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Encodes the overlay in the format implied by the file extension and writes it
/// atomically.
pub fn save_overlay(path: &Path, image: &RgbImage) -> io::Result<()> {
    let format = ImageFormat::from_path(path)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, format)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    write_atomic(path, buffer.get_ref())
}

/// One `"{label} {area:.2}mm2"` line per defect.
pub fn format_measurements(defects: &[Defect]) -> String {
    defects
        .iter()
        .map(|d| format!("{} {:.2}mm2\n", d.label, d.area_mm2))
        .collect()
}

pub fn write_measurements(path: &Path, defects: &[Defect]) -> io::Result<()> {
    write_atomic(path, format_measurements(defects).as_bytes())
}

/// Areas read back from a measurement file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasurementSummary {
    /// `(label, area_mm2)` in file order
    pub entries: Vec<(u32, f64)>,
}

impl MeasurementSummary {
    pub fn min_mm2(&self) -> Option<f64> {
        self.entries.iter().map(|(_, a)| *a).reduce(f64::min)
    }

    pub fn max_mm2(&self) -> Option<f64> {
        self.entries.iter().map(|(_, a)| *a).reduce(f64::max)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses measurement text; lines that do not match `<label> <area>mm2` are skipped.
pub fn parse_measurements(content: &str) -> MeasurementSummary {
    let entries = content
        .lines()
        .filter_map(|line| {
            let caps = MEASUREMENT_LINE.captures(line)?;
            let label = caps.get(1)?.as_str().parse().ok()?;
            let area = caps.get(2)?.as_str().parse().ok()?;
            Some((label, area))
        })
        .collect();
    MeasurementSummary { entries }
}

pub fn read_measurements(path: &Path) -> io::Result<MeasurementSummary> {
    Ok(parse_measurements(&fs::read_to_string(path)?))
}

/// Body of the per-image defect-types file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DefectTypes {
    pub tipos: Vec<String>,
}

impl DefectTypes {
    /// Distinct category names, sorted.
    pub fn from_categories(categories: &[DefectCategory]) -> Self {
        let mut tipos: Vec<String> = categories.iter().map(|c| c.as_str().to_string()).collect();
        tipos.sort();
        tipos.dedup();
        Self { tipos }
    }
}

pub fn write_defect_types(path: &Path, categories: &[DefectCategory]) -> io::Result<()> {
    let body = serde_json::to_string_pretty(&DefectTypes::from_categories(categories))?;
    write_atomic(path, body.as_bytes())
}

pub fn read_defect_types(path: &Path) -> io::Result<DefectTypes> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Processed marker for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub processed_at: DateTime<Utc>,
    pub defect_count: usize,
    pub largest_defect_mm2: f64,
    pub verdict: Classification,
    pub types: Vec<String>,
}

/// Per-roll record of images whose artifacts are complete
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub images: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// Loads the manifest; a missing file is an empty manifest.
    ///
    /// An unreadable or corrupt manifest is logged and treated as empty, which makes
    /// the affected images eligible for reprocessing.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read manifest, starting empty");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt manifest, starting empty");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        write_atomic(path, body.as_bytes())
    }

    pub fn contains(&self, image: &str) -> bool {
        self.images.contains_key(image)
    }

    pub fn get(&self, image: &str) -> Option<&ManifestEntry> {
        self.images.get(image)
    }

    pub fn record(&mut self, image: &str, entry: ManifestEntry) {
        self.images.insert(image.to_string(), entry);
    }
}

/// Moves the original into the archive folder. Falls back to copy and delete when
/// a rename is not possible (e.g. across filesystems).
pub fn archive_original(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                source = %source.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
    }
}
