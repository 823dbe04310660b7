//! Loaders that promote staged data into the relational store.
//!
//! Both loaders upsert on `(message_id, channel_name)`, so loading the same
//! input twice leaves the store unchanged apart from refreshed timestamps.

use std::path::Path;

use tracing::{debug, error, info, instrument};

use crate::db::Database;
use crate::error::Result;
use crate::metrics::RunMetrics;
use crate::models::DetectionRecord;
use crate::staging;

/// Summary of one raw load
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Staged files found under the root
    pub files_seen: usize,
    /// Files committed
    pub files_loaded: usize,
    /// Files rolled back and skipped
    pub files_failed: usize,
    /// Rows inserted or refreshed across committed files
    pub records_upserted: usize,
}

/// Loads staged message files into `telegram_messages`
pub struct RawLoader {
    db: Database,
    metrics: RunMetrics,
}

impl RawLoader {
    /// Loader writing through `db`
    pub fn new(db: Database) -> Self {
        Self {
            db,
            metrics: RunMetrics::new(),
        }
    }

    /// Metrics accumulated so far
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Create the raw table if absent. Never drops data.
    pub fn initialize_schema(&self) -> Result<()> {
        self.db.create_message_schema()
    }

    /// Load every staged file under `staging_root`.
    ///
    /// Each file is its own transaction. A file that fails to parse or write
    /// is logged and skipped; the remaining files still load.
    #[instrument(skip(self), fields(root = %staging_root.display()))]
    pub fn load(&mut self, staging_root: &Path) -> Result<LoadReport> {
        let files = staging::list_staged_files(staging_root)?;
        let mut report = LoadReport {
            files_seen: files.len(),
            ..LoadReport::default()
        };

        for path in &files {
            let outcome = staging::read_staged_file(path).and_then(|records| self.db.upsert_messages(&records));

            match outcome {
                Ok(count) => {
                    debug!(path = %path.display(), records = count, "Loaded staged file");
                    report.files_loaded += 1;
                    report.records_upserted += count;
                    self.metrics.record_file_load(count, true);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to load staged file");
                    report.files_failed += 1;
                    self.metrics.record_file_load(0, false);
                }
            }
        }

        info!(
            files = report.files_seen,
            loaded = report.files_loaded,
            failed = report.files_failed,
            records = report.records_upserted,
            "Raw load finished"
        );
        Ok(report)
    }
}

/// Loads detection results into `image_detections`
pub struct DetectionLoader {
    db: Database,
}

impl DetectionLoader {
    /// Loader writing through `db`
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the detection table if absent. Never drops data.
    pub fn initialize_schema(&self) -> Result<()> {
        self.db.create_detection_schema()
    }

    /// Upsert a batch of detections in one transaction
    pub fn load(&self, records: &[DetectionRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = self.db.upsert_detections(records)?;
        info!(records = count, "Detections loaded");
        Ok(count)
    }
}
