//! Object detection enrichment.
//!
//! The [`Detector`] walks the staged image tree, runs an [`ObjectDetector`]
//! on every image that has no detection row yet, classifies the result and
//! loads the whole run as one batch. A detection row is the only record that
//! an image was processed, so images that fail are simply retried next run.

mod process;

pub use process::{parse_detections, CommandDetector};

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DetectorConfig;
use crate::db::Database;
use crate::error::{IngestError, Result};
use crate::loader::DetectionLoader;
use crate::metrics::RunMetrics;
use crate::models::{DetectionRecord, ImageCategory, MessageKey, RawDetection};
use crate::staging;
use crate::validation::InputValidator;

/// Object detection capability
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Detect objects in one image
    async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>>;
}

/// Summary of one detection run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectionReport {
    /// Images discovered under the root
    pub images_found: usize,
    /// Images that already had a detection row
    pub skipped_processed: usize,
    /// Files whose path does not map to a message key
    pub skipped_invalid: usize,
    /// Images that produced a record this run
    pub processed: usize,
    /// Images whose detection failed; retried next run
    pub failed: usize,
    /// Processed images per category
    pub categories: HashMap<ImageCategory, usize>,
}

impl DetectionReport {
    /// Images classified as `category` in this run
    pub fn count(&self, category: ImageCategory) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }
}

/// Categorize an image from its detections. Order does not matter.
pub fn classify(detections: &[RawDetection], person_labels: &[String], commercial_labels: &[String]) -> ImageCategory {
    let has = |labels: &[String]| detections.iter().any(|d| labels.iter().any(|l| *l == d.label));

    match (has(person_labels), has(commercial_labels)) {
        (true, true) => ImageCategory::Promotional,
        (false, true) => ImageCategory::ProductDisplay,
        (true, false) => ImageCategory::Lifestyle,
        (false, false) => ImageCategory::Other,
    }
}

/// Highest-confidence detection; the first one wins a tie
pub fn top_detection(detections: &[RawDetection]) -> Option<&RawDetection> {
    detections.iter().fold(None, |best: Option<&RawDetection>, d| match best {
        Some(b) if b.confidence >= d.confidence => Some(b),
        _ => Some(d),
    })
}

/// Identity of an image: `<channel>/<message_id>.<ext>`
pub fn image_identity(path: &Path) -> Option<MessageKey> {
    let message_id = path.file_stem()?.to_str()?.parse::<i64>().ok()?;
    let channel = path.parent()?.file_name()?.to_str()?;
    Some(MessageKey::new(message_id, channel))
}

/// Runs detection over staged images and loads the results
pub struct Detector<D: ObjectDetector> {
    detector: D,
    db: Database,
    config: DetectorConfig,
    metrics: RunMetrics,
}

impl<D: ObjectDetector> Detector<D> {
    /// Detector writing through `db`
    pub fn new(detector: D, db: Database, config: DetectorConfig) -> Self {
        Self {
            detector,
            db,
            config,
            metrics: RunMetrics::new(),
        }
    }

    /// Metrics accumulated so far
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Summarize raw detections into a record
    pub fn build_record(&self, key: &MessageKey, image: &Path, detections: &[RawDetection]) -> Result<DetectionRecord> {
        let considered: Vec<RawDetection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence)
            .cloned()
            .collect();

        let top = top_detection(&considered);
        let category = classify(&considered, &self.config.person_labels, &self.config.commercial_labels);

        Ok(DetectionRecord {
            message_id: key.message_id,
            channel_name: key.channel_name.clone(),
            image_path: image.to_string_lossy().into_owned(),
            detected_class: top.map(|d| d.label.clone()),
            confidence_score: top.map_or(0.0, |d| d.confidence),
            image_category: category,
            all_detections: serde_json::to_string(detections)?,
            detected_at: Utc::now(),
        })
    }

    /// Detect every not-yet-processed image under `image_root`
    #[instrument(skip(self), fields(root = %image_root.display()))]
    pub async fn process(&mut self, image_root: &Path) -> Result<DetectionReport> {
        let loader = DetectionLoader::new(self.db.clone());
        loader.initialize_schema()?;

        let mut processed: HashSet<MessageKey> = self.db.processed_keys()?;
        let images = staging::list_images(image_root)?;
        let mut report = DetectionReport {
            images_found: images.len(),
            ..DetectionReport::default()
        };
        let mut records = Vec::new();

        for image in &images {
            let Some(key) = image_identity(image) else {
                warn!(path = %image.display(), "Image name is not <channel>/<message_id>, skipping");
                report.skipped_invalid += 1;
                continue;
            };

            if processed.contains(&key) {
                debug!(%key, "Already processed");
                report.skipped_processed += 1;
                continue;
            }

            match self.detect_one(&key, image).await {
                Ok(record) => {
                    self.metrics.record_detection(record.image_category.as_str(), true);
                    *report.categories.entry(record.image_category).or_default() += 1;
                    report.processed += 1;
                    processed.insert(key);
                    records.push(record);
                }
                Err(e) => {
                    error!(%key, path = %image.display(), error = %e, "Detection failed");
                    self.metrics.record_detection("", false);
                    report.failed += 1;
                }
            }
        }

        loader.load(&records)?;

        if let Some(export) = &self.config.export_csv {
            if let Err(e) = staging::write_detections_csv(Path::new(export), &records) {
                warn!(path = %export, error = %e, "Detection CSV export failed");
            }
        }

        info!(
            found = report.images_found,
            processed = report.processed,
            skipped = report.skipped_processed,
            failed = report.failed,
            "Detection finished"
        );
        Ok(report)
    }

    async fn detect_one(&self, key: &MessageKey, image: &Path) -> Result<DetectionRecord> {
        let detections = self.detector.detect(image).await?;

        for detection in &detections {
            InputValidator::validate_confidence(detection.confidence).map_err(|e| IngestError::Detection {
                path: image.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        self.build_record(key, image, &detections)
    }
}
