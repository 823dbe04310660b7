//! End-to-end tests for the pipeline orchestrator

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use channel_ingest::client::ChannelClient;
use channel_ingest::config::AppConfig;
use channel_ingest::db::Database;
use channel_ingest::detector::ObjectDetector;
use channel_ingest::error::{ClientError, IngestError, Result};
use channel_ingest::models::{ImageCategory, MediaKind, PlatformMessage, RawDetection};
use channel_ingest::pipeline::{self, Pipeline, Stage, StageStatus};

/// Serves the same two messages for every channel, the newest with a photo
struct StaticClient {
    fail_auth: bool,
}

#[async_trait]
impl ChannelClient for StaticClient {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn authenticate(&mut self) -> std::result::Result<(), ClientError> {
        if self.fail_auth {
            return Err(ClientError::Authentication("denied".to_string()));
        }
        Ok(())
    }

    async fn fetch_page(&self, _channel: &str, before: Option<i64>) -> std::result::Result<Vec<PlatformMessage>, ClientError> {
        if before.is_some() {
            return Ok(Vec::new());
        }
        Ok(vec![
            PlatformMessage {
                id: Some(11),
                posted_at: Some(Utc::now()),
                text: Some("new stock".to_string()),
                media: Some(MediaKind::Photo {
                    url: "https://cdn.example/11.jpg".to_string(),
                }),
                views: Some(40),
                forwards: Some(2),
            },
            PlatformMessage {
                id: Some(10),
                posted_at: Some(Utc::now()),
                text: None,
                media: None,
                views: Some(12),
                forwards: None,
            },
        ])
    }

    async fn download_media(&self, _message: &PlatformMessage, destination: &Path) -> std::result::Result<PathBuf, ClientError> {
        std::fs::create_dir_all(destination.parent().unwrap())?;
        std::fs::write(destination, b"jpeg")?;
        Ok(destination.to_path_buf())
    }

    async fn disconnect(&mut self) {}
}

/// Labels every image as a person holding a bottle
#[derive(Clone, Default)]
struct CountingDetector {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ObjectDetector for CountingDetector {
    async fn detect(&self, _image: &Path) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![RawDetection::new("person", 0.9), RawDetection::new("bottle", 0.6)])
    }
}

fn config(dir: &TempDir, channels: &[&str]) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = format!("sqlite://{}", dir.path().join("warehouse.db").display());
    config.scraper.channels = channels.iter().map(ToString::to_string).collect();
    config.scraper.channel_delay_secs = 0;
    config.scraper.staging_dir = dir.path().join("staging").to_string_lossy().into_owned();
    config.scraper.image_dir = dir.path().join("images").to_string_lossy().into_owned();
    config.detector.export_csv = None;
    config.transform.enabled = false;
    config
}

fn database(config: &AppConfig) -> Database {
    Database::new(&config.database.url).unwrap()
}

#[tokio::test]
async fn test_full_run_without_transform() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, &["https://t.me/Foo", "@Bar"]);
    let db = database(&config);
    let detector = CountingDetector::default();

    let report = Pipeline::new(config, db.clone(), StaticClient { fail_auth: false }, detector.clone())
        .run()
        .await
        .unwrap();

    let order: Vec<Stage> = report.stages.iter().map(|s| s.stage).collect();
    assert_eq!(
        order,
        vec![Stage::Scrape, Stage::RawLoad, Stage::Transform, Stage::DetectAndLoad, Stage::Verify]
    );
    assert_eq!(report.status_of(Stage::Transform), Some(StageStatus::Skipped));
    assert_eq!(report.status_of(Stage::DetectAndLoad), Some(StageStatus::Completed));

    assert_eq!(report.scrape.as_ref().unwrap().channels_staged, 2);
    assert_eq!(report.load.as_ref().unwrap().records_upserted, 4);

    let detection = report.detection.as_ref().unwrap();
    assert_eq!(detection.processed, 2);
    assert_eq!(detection.count(ImageCategory::Promotional), 2);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 2);

    let verify = report.verify.as_ref().unwrap();
    assert_eq!(verify.counts["telegram_messages"], 4);
    assert_eq!(verify.counts["image_detections"], 2);
    assert_eq!(report.metrics.messages_scraped, 4);
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_incremental() {
    let dir = tempfile::tempdir().unwrap();
    let detector = CountingDetector::default();

    for _ in 0..2 {
        let config = config(&dir, &["Foo"]);
        let db = database(&config);
        Pipeline::new(config, db, StaticClient { fail_auth: false }, detector.clone())
            .run()
            .await
            .unwrap();
    }

    let config = config(&dir, &["Foo"]);
    let counts = pipeline::verify(&database(&config), &[]).unwrap().counts;
    assert_eq!(counts["telegram_messages"], 2);
    assert_eq!(counts["image_detections"], 1);
    // The second run found the image already processed
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_detect_stage_skipped_without_images() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, &[]);
    let db = database(&config);
    let detector = CountingDetector::default();

    let report = Pipeline::new(config, db, StaticClient { fail_auth: false }, detector.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(report.status_of(Stage::DetectAndLoad), Some(StageStatus::Skipped));
    assert_eq!(report.status_of(Stage::Verify), Some(StageStatus::Completed));
    assert!(report.detection.is_none());
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_authentication_failure_aborts_in_scrape_stage() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir, &["Foo"]);
    let db = database(&config);

    let err = Pipeline::new(config, db, StaticClient { fail_auth: true }, CountingDetector::default())
        .run()
        .await
        .unwrap_err();

    match err {
        IngestError::Stage { stage, source } => {
            assert_eq!(stage, "scrape");
            assert!(matches!(*source, IngestError::Client(ClientError::Authentication(_))));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_verify_unknown_extra_table_fails_verify_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir, &[]);
    config.pipeline.verify_tables = vec!["fct_messages".to_string()];
    let db = database(&config);

    let err = Pipeline::new(config, db, StaticClient { fail_auth: false }, CountingDetector::default())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Stage { stage: "verify", .. }));
}

#[cfg(unix)]
#[tokio::test]
async fn test_transform_failure_is_fatal_and_stops_detection() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir, &["Foo"]);
    config.transform.enabled = true;
    config.transform.program = "false".to_string();
    let db = database(&config);
    let detector = CountingDetector::default();

    let err = Pipeline::new(config, db, StaticClient { fail_auth: false }, detector.clone())
        .run()
        .await
        .unwrap_err();

    match err {
        IngestError::Stage { stage, source } => {
            assert_eq!(stage, "transform");
            assert!(matches!(*source, IngestError::Transform { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_transform_success_completes_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir, &["Foo"]);
    config.transform.enabled = true;
    config.transform.program = "true".to_string();
    let db = database(&config);

    let report = Pipeline::new(config, db, StaticClient { fail_auth: false }, CountingDetector::default())
        .run()
        .await
        .unwrap();

    assert_eq!(report.status_of(Stage::Transform), Some(StageStatus::Completed));
    assert_eq!(report.status_of(Stage::DetectAndLoad), Some(StageStatus::Completed));
}
