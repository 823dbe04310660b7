use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names exported through the `metrics` facade
pub mod names {
    /// Counter, labeled by channel
    pub const MESSAGES_SCRAPED_TOTAL: &str = "channel_ingest_messages_scraped_total";
    /// Counter, labeled by channel
    pub const IMAGES_DOWNLOADED_TOTAL: &str = "channel_ingest_images_downloaded_total";
    /// Counter
    pub const FLOOD_WAITS_TOTAL: &str = "channel_ingest_flood_waits_total";
    /// Counter, labeled by outcome
    pub const FILES_LOADED_TOTAL: &str = "channel_ingest_files_loaded_total";
    /// Counter
    pub const RECORDS_UPSERTED_TOTAL: &str = "channel_ingest_records_upserted_total";
    /// Counter, labeled by category
    pub const IMAGES_DETECTED_TOTAL: &str = "channel_ingest_images_detected_total";
    /// Histogram in seconds, labeled by stage
    pub const STAGE_DURATION: &str = "channel_ingest_stage_duration_seconds";
    /// Counter, labeled by operation
    pub const ERRORS_TOTAL: &str = "channel_ingest_errors_total";
}

/// In-process tally of one pipeline run.
///
/// Every recording method also forwards to the global `metrics` recorder, so
/// an exporter installed by the host process sees the same numbers.
#[derive(Debug, Default, Clone)]
pub struct RunMetrics {
    /// Normalized messages read from channels
    pub messages_scraped: u64,
    /// Photos saved to the image area
    pub images_downloaded: u64,
    /// Flood-wait signals honored
    pub flood_waits: u64,
    /// Staged files committed
    pub files_loaded: u64,
    /// Staged files rolled back
    pub files_failed: u64,
    /// Message rows inserted or refreshed
    pub records_upserted: u64,
    /// Images that produced a detection record
    pub images_detected: u64,
    /// Images whose detection failed
    pub images_failed: u64,
    /// Every recorded error, whatever the operation
    pub errors: u64,
}

impl RunMetrics {
    /// Empty tally
    pub fn new() -> Self {
        Self::default()
    }

    /// Record messages scraped from one channel
    pub fn record_scrape(&mut self, channel: &str, messages: usize, images: usize) {
        self.messages_scraped += messages as u64;
        self.images_downloaded += images as u64;
        counter!(names::MESSAGES_SCRAPED_TOTAL, "channel" => channel.to_string()).increment(messages as u64);
        counter!(names::IMAGES_DOWNLOADED_TOTAL, "channel" => channel.to_string()).increment(images as u64);
    }

    /// Record a flood-wait suspension
    pub fn record_flood_wait(&mut self, seconds: u64) {
        self.flood_waits += 1;
        counter!(names::FLOOD_WAITS_TOTAL).increment(1);
        histogram!("channel_ingest_flood_wait_seconds").record(seconds as f64);
    }

    /// Record the outcome of loading one staged file
    pub fn record_file_load(&mut self, records: usize, success: bool) {
        if success {
            self.files_loaded += 1;
            self.records_upserted += records as u64;
            counter!(names::FILES_LOADED_TOTAL, "status" => "success").increment(1);
            counter!(names::RECORDS_UPSERTED_TOTAL, "table" => "telegram_messages").increment(records as u64);
        } else {
            self.files_failed += 1;
            counter!(names::FILES_LOADED_TOTAL, "status" => "error").increment(1);
            self.record_error("load");
        }
    }

    /// Record the outcome of detecting one image
    pub fn record_detection(&mut self, category: &str, success: bool) {
        if success {
            self.images_detected += 1;
            counter!(names::IMAGES_DETECTED_TOTAL, "category" => category.to_string()).increment(1);
        } else {
            self.images_failed += 1;
            self.record_error("detect");
        }
    }

    /// Record how long a stage took
    pub fn record_stage(&self, stage: &'static str, duration: Duration, success: bool) {
        histogram!(
            names::STAGE_DURATION,
            "stage" => stage,
            "status" => if success { "success" } else { "error" }
        )
        .record(duration.as_secs_f64());
    }

    /// Record error metrics
    pub fn record_error(&mut self, operation: &'static str) {
        self.errors += 1;
        counter!(names::ERRORS_TOTAL, "operation" => operation).increment(1);
    }

    /// Fold another tally into this one
    pub fn merge(&mut self, other: &RunMetrics) {
        self.messages_scraped += other.messages_scraped;
        self.images_downloaded += other.images_downloaded;
        self.flood_waits += other.flood_waits;
        self.files_loaded += other.files_loaded;
        self.files_failed += other.files_failed;
        self.records_upserted += other.records_upserted;
        self.images_detected += other.images_detected;
        self.images_failed += other.images_failed;
        self.errors += other.errors;
    }
}
