//! # Roll Processing Integration Tests
//!
//! Runs whole rolls in temporary folders: annotation filtering, artifact layout,
//! archiving of originals, the processed-marker manifest and reruns.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{GrayImage, Luma};
use roll_inspector::artifacts::{read_defect_types, read_measurements, Manifest};
use roll_inspector::classification::Classification;
use roll_inspector::config::{InspectionConfig, RecoveryConfig};
use roll_inspector::errors::InspectionError;
use roll_inspector::roll_processor::{process_roll, RollProcessor, SkipReason};
use roll_inspector::visualization::Visualizer;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ANNOTATIONS: &str = "annotations.json";

/// 100x100 mid-gray frame with a 10x10 black square at (20, 20)
fn spot_frame() -> GrayImage {
    let mut img = GrayImage::from_pixel(100, 100, Luma([128]));
    for y in 20..30 {
        for x in 20..30 {
            img.put_pixel(x, y, Luma([0]));
        }
    }
    img
}

fn manual_record(file_name: &str, crops: serde_json::Value) -> serde_json::Value {
    json!({
        "labelSource": "manual",
        "originalFileName": file_name,
        "crops": crops
    })
}

fn spot_crop() -> serde_json::Value {
    json!([{ "imageObjectId": "punto-negro", "rect": { "x": 10, "y": 10, "w": 30, "h": 30 } }])
}

/// Creates `<tmp>/<name>` with the given images and annotation records.
fn create_roll(tmp: &TempDir, name: &str, images: &[&str], records: serde_json::Value) -> PathBuf {
    let roll = tmp.path().join(name);
    fs::create_dir_all(&roll).expect("create roll folder");
    for image in images {
        spot_frame().save(roll.join(image)).expect("write frame");
    }
    fs::write(
        roll.join(ANNOTATIONS),
        serde_json::to_string_pretty(&records).expect("serialize annotations"),
    )
    .expect("write annotations");
    roll
}

fn test_processor() -> RollProcessor {
    let config = InspectionConfig {
        recovery: RecoveryConfig {
            max_retries: 1,
            base_retry_delay_ms: 1,
            max_retry_delay_ms: 2,
        },
        ..InspectionConfig::default()
    };
    RollProcessor::new(config)
        .expect("valid config")
        .with_visualizer(Visualizer::without_font())
}

fn run(processor: &RollProcessor, roll: &Path) -> roll_inspector::RollReport {
    processor
        .process_roll(roll, &roll.join(ANNOTATIONS), &CancellationToken::new())
        .expect("roll processing")
}

#[test]
fn test_process_roll_writes_artifacts_and_archives_original() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo1",
        &["img_01.png"],
        json!([manual_record("img_01.png", spot_crop())]),
    );

    let report = process_roll(&roll, &roll.join(ANNOTATIONS), 1.0, 0.134).expect("roll processing");

    assert_eq!(report.roll, "rollo1");
    assert_eq!(report.processed.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(report.verdict(), Classification::Nok);
    assert_eq!(report.defect_types(), vec!["punto-negro"]);

    let processed = roll.join("procesado");
    let overlay = image::open(processed.join("img_01.png")).expect("overlay readable");
    assert_eq!((overlay.width(), overlay.height()), (100, 100));

    let measurements = read_measurements(&processed.join("img_01.png.txt")).expect("measurements");
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements.entries[0].0, 1);
    let area = measurements.max_mm2().expect("one entry");
    assert!((1.79..3.6).contains(&area), "unexpected area {}", area);

    let types = read_defect_types(&processed.join("img_01.png.json")).expect("defect types");
    assert_eq!(types.tipos, vec!["punto-negro"]);

    assert!(!roll.join("img_01.png").exists());
    assert!(roll.join("originales").join("img_01.png").is_file());

    let manifest = Manifest::load(&processed.join(".manifest.json"));
    let entry = manifest.get("img_01.png").expect("manifest entry");
    assert_eq!(entry.defect_count, 1);
    assert_eq!(entry.verdict, Classification::Nok);
}

#[test]
fn test_untrusted_record_produces_no_output() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo2",
        &["img_02.png"],
        json!([{
            "labelSource": "auto",
            "originalFileName": "img_02.png",
            "crops": spot_crop()
        }]),
    );

    let report = run(&test_processor(), &roll);

    assert!(report.processed.is_empty());
    assert!(report.skipped.is_empty());
    assert!(roll.join("img_02.png").is_file());
    assert!(!roll.join("procesado").join("img_02.png").exists());
    assert!(!roll.join("procesado").join("img_02.png.txt").exists());
    assert!(!roll.join("procesado").join("img_02.png.json").exists());
    assert!(!roll.join("originales").join("img_02.png").exists());
}

#[test]
fn test_missing_image_is_skipped_and_roll_continues() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo3",
        &["present.png"],
        json!([
            manual_record("ghost.png", spot_crop()),
            manual_record("present.png", spot_crop()),
        ]),
    );

    let report = run(&test_processor(), &roll);

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].image, "ghost.png");
    assert_eq!(report.skipped[0].reason, SkipReason::Missing);
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.processed[0].image, "present.png");
}

#[test]
fn test_image_without_qualifying_crops_is_clean() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo4",
        &["img_04.png"],
        json!([manual_record(
            "img_04.png",
            json!([{ "imageObjectId": "arruga", "rect": { "x": 0, "y": 0, "w": 50, "h": 50 } }])
        )]),
    );

    let report = run(&test_processor(), &roll);

    assert_eq!(report.processed.len(), 1);
    let image = &report.processed[0];
    assert_eq!(image.defect_count(), 0);
    assert_eq!(image.verdict, Classification::Ok);
    assert!(image.types.is_empty());

    let processed = roll.join("procesado");
    let measurements = read_measurements(&processed.join("img_04.png.txt")).expect("measurements");
    assert!(measurements.is_empty());
    let types = read_defect_types(&processed.join("img_04.png.json")).expect("defect types");
    assert!(types.tipos.is_empty());
    assert!(roll.join("originales").join("img_04.png").is_file());
}

#[test]
fn test_crop_partly_outside_image_is_clamped() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo5",
        &["img_05.png"],
        json!([manual_record(
            "img_05.png",
            json!([{ "imageObjectId": "pegote-cascarilla", "rect": { "x": -5, "y": -5, "w": 40, "h": 40 } }])
        )]),
    );

    let report = run(&test_processor(), &roll);

    let image = &report.processed[0];
    assert_eq!(image.crops_processed, 1);
    assert_eq!(image.defect_count(), 1);
    assert_eq!(image.types, vec!["pegote-cascarilla"]);
    assert_eq!(
        image.defects[0].defect_type.as_deref(),
        Some("pegote-cascarilla")
    );
}

#[test]
fn test_crop_far_outside_image_does_not_stop_the_roll() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo5b",
        &["a.png", "b.png"],
        json!([
            manual_record(
                "a.png",
                json!([{ "imageObjectId": "punto-negro", "rect": { "x": 2147483600, "y": 0, "w": 100, "h": 10 } }])
            ),
            manual_record("b.png", spot_crop())
        ]),
    );

    let report = process_roll(&roll, &roll.join(ANNOTATIONS), 1.0, 0.134).expect("roll processing");

    assert!(report.failed.is_empty());
    assert_eq!(report.processed.len(), 2);

    let far = report
        .processed
        .iter()
        .find(|r| r.image == "a.png")
        .expect("a.png processed");
    assert_eq!(far.crops_processed, 0);
    assert_eq!(far.crops_skipped, 1);
    assert_eq!(far.defect_count(), 0);

    let spot = report
        .processed
        .iter()
        .find(|r| r.image == "b.png")
        .expect("b.png processed");
    assert_eq!(spot.defect_count(), 1);

    let archive = roll.join("originales");
    assert!(archive.join("a.png").is_file());
    assert!(archive.join("b.png").is_file());
    assert!(roll.join("procesado").join("b.png").is_file());
}

#[test]
fn test_rerun_skips_archived_images() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo6",
        &["img_06.png"],
        json!([manual_record("img_06.png", spot_crop())]),
    );
    let processor = test_processor();

    let first = run(&processor, &roll);
    assert_eq!(first.processed.len(), 1);
    let measurement_path = roll.join("procesado").join("img_06.png.txt");
    let written = fs::read_to_string(&measurement_path).expect("measurements");

    let second = run(&processor, &roll);
    assert!(second.processed.is_empty());
    assert_eq!(second.skipped.len(), 1);
    assert_eq!(second.skipped[0].reason, SkipReason::AlreadyArchived);
    assert_eq!(fs::read_to_string(&measurement_path).expect("measurements"), written);
}

#[test]
fn test_interrupted_run_only_archives_on_resume() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo7",
        &["img_07.png"],
        json!([manual_record("img_07.png", spot_crop())]),
    );
    let processor = test_processor();
    run(&processor, &roll);

    // Original put back as if the archive move never happened
    fs::copy(roll.join("originales").join("img_07.png"), roll.join("img_07.png"))
        .expect("restore original");

    let report = run(&processor, &roll);

    assert!(report.processed.is_empty());
    assert_eq!(report.archived_only, vec!["img_07.png".to_string()]);
    assert!(!roll.join("img_07.png").exists());
    assert!(roll.join("originales").join("img_07.png").is_file());
}

#[test]
fn test_unreadable_image_fails_alone_and_keeps_original() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo8",
        &["good.png"],
        json!([
            manual_record("bad.png", spot_crop()),
            manual_record("good.png", spot_crop()),
        ]),
    );
    fs::write(roll.join("bad.png"), b"definitely not a png").expect("write corrupt image");

    let report = run(&test_processor(), &roll);

    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.image, "bad.png");
    match &failure.error {
        InspectionError::Io {
            roll: roll_name,
            image,
            operation,
            ..
        } => {
            assert_eq!(roll_name, "rollo8");
            assert_eq!(image, "bad.png");
            assert_eq!(operation, "read image");
        }
        other => panic!("expected an Io error, got {:?}", other),
    }

    assert!(roll.join("bad.png").is_file());
    assert!(!roll.join("originales").join("bad.png").exists());
    let manifest = Manifest::load(&roll.join("procesado").join(".manifest.json"));
    assert!(!manifest.contains("bad.png"));
    assert!(manifest.contains("good.png"));
}

#[test]
fn test_unreadable_annotations_abort_the_roll() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = tmp.path().join("rollo9");
    fs::create_dir_all(&roll).expect("create roll folder");
    fs::write(roll.join(ANNOTATIONS), "{ not json").expect("write annotations");

    let result = test_processor().process_roll(&roll, &roll.join(ANNOTATIONS), &CancellationToken::new());
    assert!(matches!(result, Err(InspectionError::Annotation(_))));

    let missing = test_processor().process_roll(
        &roll,
        &roll.join("absent.json"),
        &CancellationToken::new(),
    );
    assert!(matches!(missing, Err(InspectionError::Annotation(_))));
}

#[test]
fn test_cancelled_roll_leaves_images_in_place() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo10",
        &["img_10.png"],
        json!([manual_record("img_10.png", spot_crop())]),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = test_processor().process_roll(&roll, &roll.join(ANNOTATIONS), &cancel);

    assert!(matches!(result, Err(InspectionError::Cancelled)));
    assert!(roll.join("img_10.png").is_file());
    assert!(!roll.join("procesado").join("img_10.png").exists());
}

#[tokio::test]
async fn test_concurrent_runner_matches_sequential() {
    let tmp = TempDir::new().expect("temp dir");
    let images = ["a.png", "b.png", "c.png"];
    let records = json!([
        manual_record("a.png", spot_crop()),
        manual_record("b.png", spot_crop()),
        manual_record("c.png", json!([])),
    ]);
    let sequential_roll = create_roll(&tmp, "sequential", &images, records.clone());
    let concurrent_roll = create_roll(&tmp, "concurrent", &images, records);

    let processor = Arc::new(test_processor());
    let sequential = run(&processor, &sequential_roll);
    let concurrent = Arc::clone(&processor)
        .process_roll_concurrent(
            concurrent_roll.clone(),
            concurrent_roll.join(ANNOTATIONS),
            CancellationToken::new(),
        )
        .await
        .expect("concurrent roll processing");

    let names: Vec<_> = concurrent.processed.iter().map(|r| r.image.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.png", "c.png"]);
    assert_eq!(concurrent.total_defects(), sequential.total_defects());
    assert_eq!(concurrent.verdict(), sequential.verdict());

    for image in images {
        let sidecar = format!("{}.txt", image);
        assert_eq!(
            fs::read_to_string(sequential_roll.join("procesado").join(&sidecar)).expect("sequential"),
            fs::read_to_string(concurrent_roll.join("procesado").join(&sidecar)).expect("concurrent"),
        );
        assert!(concurrent_roll.join("originales").join(image).is_file());
    }

    let manifest = Manifest::load(&concurrent_roll.join("procesado").join(".manifest.json"));
    assert_eq!(manifest.images.len(), 3);
}

#[tokio::test]
async fn test_concurrent_runner_honours_cancellation() {
    let tmp = TempDir::new().expect("temp dir");
    let roll = create_roll(
        &tmp,
        "rollo11",
        &["img_11.png"],
        json!([manual_record("img_11.png", spot_crop())]),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = Arc::new(test_processor())
        .process_roll_concurrent(roll.clone(), roll.join(ANNOTATIONS), cancel)
        .await;

    assert!(matches!(result, Err(InspectionError::Cancelled)));
    assert!(roll.join("img_11.png").is_file());
}
