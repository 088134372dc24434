//! # Roll Processing
//!
//! Applies the inspection engine to every annotated image of a roll folder.
//!
//! For each qualifying image the processor:
//! 1. loads the frame as grayscale and prepares an empty accumulator mask and a
//!    colour canvas,
//! 2. runs contrast enhancement, segmentation and size classification on every
//!    qualifying crop, ORing the crop mask into the accumulator and painting the
//!    OK/NOK overlay into the canvas,
//! 3. draws the annotation boxes on top,
//! 4. labels the accumulator once more and writes the overlay, the measurement file
//!    and the defect-types file,
//! 5. records the image in the roll manifest, and only then
//! 6. moves the original into the archive folder.
//!
//! A failure while handling one image is reported and the roll carries on. Only an
//! unreadable annotation file (or cancellation) stops a roll.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use image::{DynamicImage, GrayImage, RgbImage};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotations::{load_annotations, qualifying_images, QualifyingImage};
use crate::artifacts::{
    archive_original, save_overlay, write_defect_types, write_measurements, Manifest,
    ManifestEntry, RollLayout,
};
use crate::classification::{Classification, Defect, SizeClassifier};
use crate::config::{InspectionConfig, MeasurementConfig};
use crate::errors::{error_logging, InspectionError, InspectionResult};
use crate::mask::BinaryMask;
use crate::observability;
use crate::preprocessing::get_crop;
use crate::retry::with_retry;
use crate::segmentation::Segmenter;
use crate::visualization::Visualizer;

/// Why an annotated image was not processed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not present in the roll folder
    Missing,
    /// Already processed and archived by an earlier run
    AlreadyArchived,
    /// Extension is not one of the configured image types
    NotAnImage,
    /// File name contains path components
    InvalidName,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Missing => "missing",
            SkipReason::AlreadyArchived => "already_archived",
            SkipReason::NotAnImage => "not_an_image",
            SkipReason::InvalidName => "invalid_name",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedImage {
    pub image: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageFailure {
    pub image: String,
    pub error: InspectionError,
}

/// In-memory result of inspecting one frame
#[derive(Debug, Clone)]
pub struct ImageAnalysis {
    /// Union of all crop masks, in image coordinates
    pub accumulator: BinaryMask,
    pub canvas: RgbImage,
    /// Components of the accumulator
    pub defects: Vec<Defect>,
    pub crops_processed: usize,
    pub crops_skipped: usize,
}

/// Outcome of a processed image
#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
    pub image: String,
    pub defects: Vec<Defect>,
    pub largest_defect_mm2: f64,
    pub verdict: Classification,
    /// Distinct defect categories of the image's crops, sorted
    pub types: Vec<String>,
    pub crops_processed: usize,
    pub crops_skipped: usize,
    pub duration_ms: u64,
}

impl ImageReport {
    pub fn defect_count(&self) -> usize {
        self.defects.len()
    }

    fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            processed_at: Utc::now(),
            defect_count: self.defects.len(),
            largest_defect_mm2: self.largest_defect_mm2,
            verdict: self.verdict,
            types: self.types.clone(),
        }
    }
}

/// Outcome of a roll run
#[derive(Debug, Clone, Default)]
pub struct RollReport {
    pub roll: String,
    pub processed: Vec<ImageReport>,
    /// Images whose artifacts were already complete; only the archive move was redone
    pub archived_only: Vec<String>,
    pub skipped: Vec<SkippedImage>,
    pub failed: Vec<ImageFailure>,
    pub duration_ms: u64,
}

impl RollReport {
    /// Union of defect categories over processed images, sorted.
    pub fn defect_types(&self) -> Vec<String> {
        self.processed
            .iter()
            .flat_map(|r| r.types.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn largest_defect_mm2(&self) -> f64 {
        self.processed
            .iter()
            .map(|r| r.largest_defect_mm2)
            .fold(0.0, f64::max)
    }

    /// NOK when any processed image is NOK.
    pub fn verdict(&self) -> Classification {
        if self.processed.iter().any(|r| r.verdict.is_nok()) {
            Classification::Nok
        } else {
            Classification::Ok
        }
    }

    pub fn total_defects(&self) -> usize {
        self.processed.iter().map(|r| r.defects.len()).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "roll={} verdict={} processed={} archived_only={} skipped={} failed={} defects={} largest={:.2}mm2 types=[{}] duration={}ms",
            self.roll,
            self.verdict(),
            self.processed.len(),
            self.archived_only.len(),
            self.skipped.len(),
            self.failed.len(),
            self.total_defects(),
            self.largest_defect_mm2(),
            self.defect_types().join(","),
            self.duration_ms
        )
    }
}

/// Work list for a roll, in annotation order
struct RollPlan {
    work: Vec<QualifyingImage>,
    archive_only: Vec<String>,
    skipped: Vec<SkippedImage>,
}

/// Per-roll pipeline driver
#[derive(Debug)]
pub struct RollProcessor {
    config: InspectionConfig,
    segmenter: Segmenter,
    classifier: SizeClassifier,
    visualizer: Visualizer,
}

impl RollProcessor {
    /// Validates the configuration and prepares the pipeline stages.
    pub fn new(config: InspectionConfig) -> InspectionResult<Self> {
        config.validate()?;
        let segmenter = Segmenter::new(&config.segmentation, &config.contrast)
            .map_err(|e| InspectionError::Config(e.to_string()))?;
        let visualizer = Visualizer::new(&config.visualization);
        Ok(Self {
            classifier: SizeClassifier::new(config.measurement),
            segmenter,
            visualizer,
            config,
        })
    }

    /// Replaces the overlay renderer.
    pub fn with_visualizer(mut self, visualizer: Visualizer) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn config(&self) -> &InspectionConfig {
        &self.config
    }

    /// Inspects one frame against its qualifying crops. No files are touched.
    pub fn analyze_image(&self, gray: &GrayImage, image: &QualifyingImage) -> ImageAnalysis {
        let (width, height) = gray.dimensions();
        let pixel_to_mm = self.config.measurement.pixel_to_mm;
        let mut accumulator = BinaryMask::new(width, height);
        let mut canvas = DynamicImage::ImageLuma8(gray.clone()).to_rgb8();
        let mut crops_processed = 0;
        let mut crops_skipped = 0;

        for crop in &image.crops {
            let Some((sub_image, region)) = get_crop(gray, &crop.rect) else {
                debug!(
                    crop_index = crop.index,
                    rect = ?crop.rect,
                    "Crop lies outside the image, skipped"
                );
                crops_skipped += 1;
                continue;
            };

            let mask = self.segmenter.segment_crop(&sub_image);
            let classified = self.classifier.classify(&mask);
            accumulator.or_at(&classified.combined(), region.x, region.y);
            self.visualizer.render_into(
                &mut canvas,
                &classified.mask_ok,
                &classified.mask_nok,
                Some(pixel_to_mm),
                Some(&region),
            );

            debug!(
                crop_index = crop.index,
                category = %crop.category,
                components = classified.defects.len(),
                nok = classified.nok_count(),
                "Crop analysed"
            );
            crops_processed += 1;
        }

        // Boxes go on top of the painted masks
        for crop in &image.crops {
            self.visualizer
                .draw_bounding_box(&mut canvas, &crop.rect, crop.category.as_str());
        }

        let mut defects = self.classifier.measure(&accumulator, None);
        for defect in &mut defects {
            defect.defect_type = category_at(image, defect.centroid, width, height);
        }

        ImageAnalysis {
            accumulator,
            canvas,
            defects,
            crops_processed,
            crops_skipped,
        }
    }

    /// Loads, analyses and writes the artifacts of one image. The manifest and the
    /// original are left alone.
    pub fn inspect_and_write(
        &self,
        layout: &RollLayout,
        image: &QualifyingImage,
    ) -> InspectionResult<ImageReport> {
        let start_time = Instant::now();
        let roll = layout.roll_name();
        let name = image.file_name.as_str();
        let _span = observability::image_span(&roll, name).entered();
        let recovery = &self.config.recovery;

        let source = layout.source_image(name);
        let gray = with_retry("read image", recovery, || image::open(&source))
            .map_err(|e| InspectionError::io(&roll, name, "read image", e))?
            .to_luma8();

        let analysis = self.analyze_image(&gray, image);

        let overlay_path = layout.processed_image(name);
        with_retry("write overlay", recovery, || {
            save_overlay(&overlay_path, &analysis.canvas)
        })
        .map_err(|e| InspectionError::io(&roll, name, "write overlay", e))?;

        let measurement_path = layout.measurement_file(name);
        with_retry("write measurements", recovery, || {
            write_measurements(&measurement_path, &analysis.defects)
        })
        .map_err(|e| InspectionError::io(&roll, name, "write measurements", e))?;

        let categories = image.categories();
        let types_path = layout.defect_types_file(name);
        with_retry("write defect types", recovery, || {
            write_defect_types(&types_path, &categories)
        })
        .map_err(|e| InspectionError::io(&roll, name, "write defect types", e))?;

        let largest_defect_mm2 = analysis
            .defects
            .iter()
            .map(|d| d.area_mm2)
            .fold(0.0, f64::max);
        let verdict = if analysis.defects.iter().any(|d| d.classification.is_nok()) {
            Classification::Nok
        } else {
            Classification::Ok
        };

        for defect in &analysis.defects {
            observability::record_defect(defect.classification, defect.area_mm2);
        }

        let report = ImageReport {
            image: name.to_string(),
            largest_defect_mm2,
            verdict,
            types: categories.iter().map(|c| c.as_str().to_string()).collect(),
            crops_processed: analysis.crops_processed,
            crops_skipped: analysis.crops_skipped,
            duration_ms: start_time.elapsed().as_millis() as u64,
            defects: analysis.defects,
        };

        info!(
            defects = report.defects.len(),
            largest_mm2 = report.largest_defect_mm2,
            verdict = %report.verdict,
            crops = report.crops_processed,
            duration_ms = report.duration_ms,
            "Image inspected"
        );

        Ok(report)
    }

    /// Marks the image processed in the manifest, then archives the original.
    fn finalize_image(
        &self,
        layout: &RollLayout,
        manifest: &mut Manifest,
        report: &ImageReport,
    ) -> InspectionResult<()> {
        let roll = layout.roll_name();
        manifest.record(&report.image, report.manifest_entry());

        let snapshot: &Manifest = manifest;
        let saved = with_retry("save manifest", &self.config.recovery, || {
            snapshot.save(&layout.manifest_path)
        });
        if let Err(e) = saved {
            manifest.images.remove(&report.image);
            return Err(InspectionError::io(&roll, &report.image, "save manifest", e));
        }

        self.archive(layout, &report.image)
    }

    fn archive(&self, layout: &RollLayout, name: &str) -> InspectionResult<()> {
        let source = layout.source_image(name);
        let destination = layout.archived_original(name);
        with_retry("archive original", &self.config.recovery, || {
            archive_original(&source, &destination)
        })
        .map_err(|e| InspectionError::io(&layout.roll_name(), name, "archive original", e))
    }

    /// Reads the annotations and decides what happens to each image.
    fn plan_roll(
        &self,
        layout: &RollLayout,
        annotation_path: &Path,
    ) -> InspectionResult<(RollPlan, Manifest)> {
        let records = load_annotations(annotation_path)?;
        let roll = layout.roll_name();

        layout
            .ensure_dirs()
            .map_err(|e| InspectionError::io(&roll, "", "create output folders", e))?;
        let manifest = Manifest::load(&layout.manifest_path);

        let mut plan = RollPlan {
            work: Vec::new(),
            archive_only: Vec::new(),
            skipped: Vec::new(),
        };

        for image in qualifying_images(&records) {
            let name = image.file_name.clone();
            let reason = if !is_plain_file_name(&name) {
                Some(SkipReason::InvalidName)
            } else if !self.config.layout.is_image_file(&name) {
                Some(SkipReason::NotAnImage)
            } else if !layout.source_image(&name).is_file() {
                if manifest.contains(&name) {
                    Some(SkipReason::AlreadyArchived)
                } else {
                    let warning = InspectionError::MissingFile {
                        roll: roll.clone(),
                        image: name.clone(),
                    };
                    warn!(roll = %roll, image = %name, "{}", warning);
                    Some(SkipReason::Missing)
                }
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    observability::record_skipped_image(reason.as_str());
                    plan.skipped.push(SkippedImage { image: name, reason });
                }
                None if manifest.contains(&name) => plan.archive_only.push(name),
                None => plan.work.push(image),
            }
        }

        info!(
            roll = %roll,
            to_process = plan.work.len(),
            archive_only = plan.archive_only.len(),
            skipped = plan.skipped.len(),
            "Roll discovered"
        );

        Ok((plan, manifest))
    }

    fn resume_archives(&self, layout: &RollLayout, names: Vec<String>, report: &mut RollReport) {
        for name in names {
            match self.archive(layout, &name) {
                Ok(()) => {
                    info!(image = %name, "Archived image left over from an interrupted run");
                    report.archived_only.push(name);
                }
                Err(error) => self.record_failure(report, name, error, Instant::now()),
            }
        }
    }

    fn record_failure(
        &self,
        report: &mut RollReport,
        image: String,
        error: InspectionError,
        started: Instant,
    ) {
        error_logging::log_image_error(&error, &report.roll, &image);
        observability::record_image_metrics(false, started.elapsed(), 0);
        report.failed.push(ImageFailure { image, error });
    }

    fn finish(&self, mut report: RollReport, started: Instant) -> RollReport {
        report.duration_ms = started.elapsed().as_millis() as u64;
        observability::record_roll_metrics(
            report.processed.len(),
            report.failed.len(),
            started.elapsed(),
        );
        info!("{}", report.summary());
        report
    }

    /// Processes a roll sequentially.
    ///
    /// # Errors
    ///
    /// `Annotation` when the annotation file is unreadable, `Io` when the output
    /// folders cannot be created, `Cancelled` when `cancel` fires between images.
    /// Per-image failures are reported in [`RollReport::failed`].
    pub fn process_roll(
        &self,
        roll_dir: &Path,
        annotation_path: &Path,
        cancel: &CancellationToken,
    ) -> InspectionResult<RollReport> {
        let started = Instant::now();
        let layout = RollLayout::new(roll_dir, &self.config.layout);
        let _span = observability::roll_span(&layout.roll_name()).entered();

        let (plan, mut manifest) = self.plan_roll(&layout, annotation_path)?;
        let mut report = RollReport {
            roll: layout.roll_name(),
            skipped: plan.skipped,
            ..RollReport::default()
        };

        self.resume_archives(&layout, plan.archive_only, &mut report);

        for image in plan.work {
            if cancel.is_cancelled() {
                warn!(roll = %report.roll, "Roll processing cancelled");
                return Err(InspectionError::Cancelled);
            }

            let image_started = Instant::now();
            let outcome = self
                .inspect_and_write(&layout, &image)
                .and_then(|r| self.finalize_image(&layout, &mut manifest, &r).map(|_| r));

            match outcome {
                Ok(image_report) => {
                    observability::record_image_metrics(
                        true,
                        image_started.elapsed(),
                        image_report.defects.len(),
                    );
                    report.processed.push(image_report);
                }
                Err(error) => {
                    self.record_failure(&mut report, image.file_name, error, image_started)
                }
            }
        }

        Ok(self.finish(report, started))
    }

    /// Processes a roll with up to `workers.max_workers` images in flight.
    ///
    /// Each image is inspected on the blocking pool with private buffers. Manifest
    /// updates and archive moves run one at a time on the calling task. Results are
    /// reported in annotation order.
    pub async fn process_roll_concurrent(
        self: Arc<Self>,
        roll_dir: PathBuf,
        annotation_path: PathBuf,
        cancel: CancellationToken,
    ) -> InspectionResult<RollReport> {
        let started = Instant::now();
        let layout = Arc::new(RollLayout::new(&roll_dir, &self.config.layout));

        let planner = Arc::clone(&self);
        let plan_layout = Arc::clone(&layout);
        let (plan, mut manifest) = tokio::task::spawn_blocking(move || {
            planner.plan_roll(&plan_layout, &annotation_path)
        })
        .await
        .map_err(|e| InspectionError::io(&layout.roll_name(), "", "plan roll", e))??;

        let mut report = RollReport {
            roll: layout.roll_name(),
            skipped: plan.skipped,
            ..RollReport::default()
        };
        self.resume_archives(&layout, plan.archive_only, &mut report);

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max_workers));
        let mut tasks = JoinSet::new();
        let mut task_images: HashMap<task::Id, String> = HashMap::new();

        for (order, image) in plan.work.into_iter().enumerate() {
            let processor = Arc::clone(&self);
            let layout = Arc::clone(&layout);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();

            let file_name = image.file_name.clone();
            let handle = tasks.spawn(async move {
                let name = image.file_name.clone();
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (order, name, None);
                };
                if cancel.is_cancelled() {
                    return (order, name, None);
                }
                let image_started = Instant::now();
                let worker_name = name.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    processor.inspect_and_write(&layout, &image)
                })
                .await
                .unwrap_or_else(|e| Err(InspectionError::io("", &worker_name, "worker", e)));
                (order, name, Some((outcome, image_started)))
            });
            task_images.insert(handle.id(), file_name);
        }

        let mut finished = Vec::new();
        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            let (order, name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Image task aborted");
                    let (name, error) = aborted_image(&mut task_images, &report.roll, &e);
                    self.record_failure(&mut report, name, error, Instant::now());
                    continue;
                }
            };
            let Some((outcome, image_started)) = outcome else {
                cancelled = true;
                continue;
            };

            let outcome = outcome.and_then(|r| {
                self.finalize_image(&layout, &mut manifest, &r).map(|_| r)
            });
            match outcome {
                Ok(image_report) => {
                    observability::record_image_metrics(
                        true,
                        image_started.elapsed(),
                        image_report.defects.len(),
                    );
                    finished.push((order, image_report));
                }
                Err(error) => self.record_failure(&mut report, name, error, image_started),
            }
        }

        if cancelled {
            warn!(roll = %report.roll, completed = finished.len(), "Roll processing cancelled");
            return Err(InspectionError::Cancelled);
        }

        finished.sort_by_key(|(order, _)| *order);
        report.processed = finished.into_iter().map(|(_, r)| r).collect();
        Ok(self.finish(report, started))
    }
}

/// Image name and failure for a task that ended without returning its result.
fn aborted_image(
    task_images: &mut HashMap<task::Id, String>,
    roll: &str,
    error: &JoinError,
) -> (String, InspectionError) {
    let name = task_images.remove(&error.id()).unwrap_or_default();
    let failure = InspectionError::io(roll, &name, "worker", error);
    (name, failure)
}

/// Category of the first crop whose clamped region contains the point.
fn category_at(
    image: &QualifyingImage,
    (x, y): (f64, f64),
    width: u32,
    height: u32,
) -> Option<String> {
    let (px, py) = (x.round() as u32, y.round() as u32);
    image
        .crops
        .iter()
        .find(|crop| {
            crop.rect
                .clamp_to(width, height)
                .is_some_and(|region| region.contains(px, py))
        })
        .map(|crop| crop.category.as_str().to_string())
}

/// Whether `name` is a bare file name without directory components.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
        && !name.contains(['/', '\\'])
}

/// Processes a roll with default settings apart from the threshold and scale.
pub fn process_roll(
    roll_path: &Path,
    annotation_path: &Path,
    area_threshold_mm2: f64,
    pixel_to_mm: f64,
) -> InspectionResult<RollReport> {
    let config = InspectionConfig {
        measurement: MeasurementConfig {
            area_threshold_mm2,
            pixel_to_mm,
        },
        ..InspectionConfig::default()
    };
    RollProcessor::new(config)?.process_roll(roll_path, annotation_path, &CancellationToken::new())
}
