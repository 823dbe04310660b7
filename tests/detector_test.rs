//! Integration tests for the detection enrichment stage

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use tempfile::TempDir;

use channel_ingest::config::{AppConfig, DetectorConfig};
use channel_ingest::db::Database;
use channel_ingest::detector::{Detector, ObjectDetector};
use channel_ingest::error::{IngestError, Result};
use channel_ingest::loader::DetectionLoader;
use channel_ingest::models::{DetectionRecord, ImageCategory, MessageKey, RawDetection};

mock! {
    pub Yolo {}

    #[async_trait]
    impl ObjectDetector for Yolo {
        async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>>;
    }
}

struct Fixture {
    dir: TempDir,
    db: Database,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("warehouse.db").display());
        let db = Database::new(&url).unwrap();
        Self { dir, db }
    }

    fn image_root(&self) -> PathBuf {
        self.dir.path().join("images")
    }

    fn add_image(&self, channel: &str, name: &str) -> PathBuf {
        let dir = self.image_root().join(channel);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"\xFF\xD8\xFF").unwrap();
        path
    }

    fn config(&self) -> DetectorConfig {
        let mut config = AppConfig::default().detector;
        config.export_csv = Some(self.dir.path().join("out/detections.csv").to_string_lossy().into_owned());
        config
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_already_processed_image_is_never_detected() {
    let fx = Fixture::new();
    fx.add_image("Foo", "42.jpg");
    fx.add_image("Foo", "43.jpg");

    let loader = DetectionLoader::new(fx.db.clone());
    loader.initialize_schema().unwrap();
    loader
        .load(&[DetectionRecord {
            message_id: 42,
            channel_name: "Foo".to_string(),
            image_path: "old/42.jpg".to_string(),
            detected_class: None,
            confidence_score: 0.0,
            image_category: ImageCategory::Other,
            all_detections: "[]".to_string(),
            detected_at: Utc::now(),
        }])
        .unwrap();

    let mut mock = MockYolo::new();
    mock.expect_detect()
        .withf(|image| image.ends_with("Foo/42.jpg"))
        .times(0)
        .returning(|_| Ok(Vec::new()));
    mock.expect_detect()
        .withf(|image| image.ends_with("Foo/43.jpg"))
        .times(1)
        .returning(|_| Ok(vec![RawDetection::new("person", 0.8)]));

    let mut detector = Detector::new(mock, fx.db.clone(), fx.config());
    let report = detector.process(&fx.image_root()).await.unwrap();

    assert_eq!(report.images_found, 2);
    assert_eq!(report.skipped_processed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(report.count(ImageCategory::Lifestyle), 1);
}

#[tokio::test]
async fn test_second_run_detects_nothing() {
    let fx = Fixture::new();
    fx.add_image("Foo", "1.jpg");

    let mut first = MockYolo::new();
    first.expect_detect().times(1).returning(|_| Ok(vec![RawDetection::new("cup", 0.6)]));
    Detector::new(first, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    let mut second = MockYolo::new();
    second.expect_detect().times(0);
    let report = Detector::new(second, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    assert_eq!(report.skipped_processed, 1);
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn test_detection_record_contents() {
    let fx = Fixture::new();
    fx.add_image("CheMed123", "9.jpg");

    let mut mock = MockYolo::new();
    mock.expect_detect().returning(|_| {
        Ok(vec![
            RawDetection::new("bottle", 0.4),
            RawDetection::new("cup", 0.9),
        ])
    });

    let mut detector = Detector::new(mock, fx.db.clone(), fx.config());
    let report = detector.process(&fx.image_root()).await.unwrap();
    assert_eq!(report.count(ImageCategory::ProductDisplay), 1);

    let stored = fx.db.get_detection(&MessageKey::new(9, "CheMed123")).unwrap().unwrap();
    assert_eq!(stored.detected_class.as_deref(), Some("cup"));
    assert!((stored.confidence_score - 0.9).abs() < f64::EPSILON);
    assert_eq!(stored.image_category, ImageCategory::ProductDisplay);

    let all: Vec<RawDetection> = serde_json::from_str(&stored.all_detections).unwrap();
    assert_eq!(all.len(), 2);

    let csv = fs::read_to_string(fx.dir.path().join("out/detections.csv")).unwrap();
    assert!(csv.contains("product_display"));
}

#[tokio::test]
async fn test_nothing_detected_is_recorded_as_processed() {
    let fx = Fixture::new();
    fx.add_image("Foo", "5.png");

    let mut mock = MockYolo::new();
    mock.expect_detect().returning(|_| Ok(Vec::new()));

    Detector::new(mock, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    let stored = fx.db.get_detection(&MessageKey::new(5, "Foo")).unwrap().unwrap();
    assert_eq!(stored.detected_class, None);
    assert_eq!(stored.confidence_score, 0.0);
    assert_eq!(stored.image_category, ImageCategory::Other);
}

#[tokio::test]
async fn test_failed_image_is_skipped_and_retried_later() {
    let fx = Fixture::new();
    fx.add_image("Foo", "1.jpg");
    fx.add_image("Foo", "2.jpg");

    let mut mock = MockYolo::new();
    mock.expect_detect()
        .withf(|image| image.ends_with("Foo/1.jpg"))
        .returning(|image| {
            Err(IngestError::Detection {
                path: image.to_path_buf(),
                reason: "corrupt".to_string(),
            })
        });
    mock.expect_detect()
        .withf(|image| image.ends_with("Foo/2.jpg"))
        .returning(|_| Ok(vec![RawDetection::new("vase", 0.3)]));

    let mut detector = Detector::new(mock, fx.db.clone(), fx.config());
    let report = detector.process(&fx.image_root()).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(detector.metrics().images_failed, 1);
    assert!(fx.db.get_detection(&MessageKey::new(1, "Foo")).unwrap().is_none());
    assert!(fx.db.get_detection(&MessageKey::new(2, "Foo")).unwrap().is_some());
}

#[tokio::test]
async fn test_out_of_range_confidence_fails_that_image() {
    let fx = Fixture::new();
    fx.add_image("Foo", "1.jpg");

    let mut mock = MockYolo::new();
    mock.expect_detect().returning(|_| Ok(vec![RawDetection::new("cup", 1.7)]));

    let report = Detector::new(mock, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(fx.db.count_rows("image_detections").unwrap(), 0);
}

#[tokio::test]
async fn test_non_numeric_image_names_are_skipped() {
    let fx = Fixture::new();
    let cover = fx.add_image("Foo", "cover.jpg");

    let mut mock = MockYolo::new();
    mock.expect_detect().times(0);

    let report = Detector::new(mock, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    assert_eq!(file_name(&cover), "cover.jpg");
    assert_eq!(report.skipped_invalid, 1);
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn test_min_confidence_filters_classification_but_keeps_raw() {
    let fx = Fixture::new();
    fx.add_image("Foo", "8.jpg");

    let mut config = fx.config();
    config.min_confidence = 0.5;

    let mut mock = MockYolo::new();
    mock.expect_detect().returning(|_| {
        Ok(vec![
            RawDetection::new("person", 0.3),
            RawDetection::new("bottle", 0.7),
        ])
    });

    Detector::new(mock, fx.db.clone(), config)
        .process(&fx.image_root())
        .await
        .unwrap();

    let stored = fx.db.get_detection(&MessageKey::new(8, "Foo")).unwrap().unwrap();
    assert_eq!(stored.image_category, ImageCategory::ProductDisplay);
    assert_eq!(stored.detected_class.as_deref(), Some("bottle"));
    let all: Vec<RawDetection> = serde_json::from_str(&stored.all_detections).unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_missing_image_root_is_empty_run() {
    let fx = Fixture::new();
    let mut mock = MockYolo::new();
    mock.expect_detect().times(0);

    let report = Detector::new(mock, fx.db.clone(), fx.config())
        .process(&fx.image_root())
        .await
        .unwrap();

    assert_eq!(report.images_found, 0);
}
