//! Channel scraper.
//!
//! Drives a [`ChannelClient`] over the configured channels, normalizes
//! platform payloads into [`MessageRecord`]s, downloads photos and stages one
//! JSON file per channel per run date.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rand::Rng;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ChannelClient, MessageIter};
use crate::config::ScraperConfig;
use crate::error::{ClientError, Result};
use crate::metrics::RunMetrics;
use crate::models::{MediaKind, MessageRecord, PlatformMessage};
use crate::staging;
use crate::validation::InputValidator;

/// Summary of one scrape run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScrapeReport {
    /// Channel identifiers processed, valid or not
    pub channels_attempted: usize,
    /// Channels that produced a staged file
    pub channels_staged: usize,
    /// Records written to staged files
    pub messages: usize,
    /// Photos saved
    pub images_downloaded: usize,
    /// Photos that failed to download; their records keep no path
    pub image_failures: usize,
    /// Flood-wait signals honored
    pub flood_waits: usize,
    /// Channels whose batch could not be written to the staging area
    pub staging_failures: usize,
    /// Files created during this run, in write order
    pub staged_files: Vec<PathBuf>,
}

/// Outcome of reading one channel
#[derive(Debug, Default)]
struct ChannelBatch {
    records: Vec<MessageRecord>,
    images_downloaded: usize,
    image_failures: usize,
}

/// Reduce a channel URL, `@handle` or bare name to its canonical name.
///
/// `https://t.me/Foo`, `@Foo` and `Foo/` all become `Foo`.
pub fn normalize_channel_name(identifier: &str) -> String {
    identifier
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .replace('@', "")
        .trim()
        .to_string()
}

/// Turn a platform payload into a strict record.
///
/// Payloads without a positive id or a timestamp are rejected. The image path is left
/// empty; the scraper fills it after a successful download.
pub fn normalize_message(message: &PlatformMessage, channel: &str) -> Option<MessageRecord> {
    let Some(message_id) = message.id else {
        warn!(channel, "Dropping message without id");
        return None;
    };
    if let Err(e) = InputValidator::validate_message_id(message_id) {
        warn!(channel, error = %e, "Dropping message with invalid id");
        return None;
    }
    let Some(posted_at) = message.posted_at else {
        warn!(channel, message_id, "Dropping message without timestamp");
        return None;
    };

    Some(MessageRecord {
        message_id,
        channel_name: channel.to_string(),
        posted_at,
        text: message.text.clone().unwrap_or_default(),
        has_media: message.media.is_some(),
        image_path: None,
        view_count: message.views.unwrap_or(0).max(0),
        forward_count: message.forwards.unwrap_or(0).max(0),
    })
}

/// Where a channel's photo for `message_id` is stored
pub fn image_path_for(image_root: &Path, channel: &str, message_id: i64) -> PathBuf {
    image_root.join(channel).join(format!("{message_id}.jpg"))
}

/// Scrapes channels through a client it owns for the duration of a run
pub struct Scraper<C: ChannelClient> {
    client: C,
    config: ScraperConfig,
    metrics: RunMetrics,
}

impl<C: ChannelClient> Scraper<C> {
    /// Wrap `client` with the scrape settings
    pub fn new(client: C, config: ScraperConfig) -> Self {
        Self {
            client,
            config,
            metrics: RunMetrics::new(),
        }
    }

    /// Metrics accumulated so far
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Scrape every channel once.
    ///
    /// Authentication failure aborts the run. After that, a failing channel
    /// is logged and skipped, and the client is disconnected at the end.
    #[instrument(skip_all, fields(client = self.client.name(), channels = channel_identifiers.len()))]
    pub async fn run(&mut self, channel_identifiers: &[String]) -> Result<ScrapeReport> {
        self.client.authenticate().await?;

        let report = self.scrape_all(channel_identifiers).await;
        self.client.disconnect().await;
        Ok(report)
    }

    async fn scrape_all(&mut self, channel_identifiers: &[String]) -> ScrapeReport {
        let run_date = Utc::now().date_naive();
        let mut report = ScrapeReport::default();

        for identifier in channel_identifiers {
            let channel = normalize_channel_name(identifier);
            report.channels_attempted += 1;

            if let Err(e) = InputValidator::validate_channel_name(&channel) {
                warn!(identifier = %identifier, error = %e, "Skipping invalid channel");
            } else {
                self.scrape_and_stage(&channel, run_date, &mut report).await;
            }

            self.pause_between_channels().await;
        }

        info!(
            attempted = report.channels_attempted,
            staged = report.channels_staged,
            messages = report.messages,
            images = report.images_downloaded,
            staging_failures = report.staging_failures,
            "Scrape finished"
        );
        report
    }

    /// Scrape one channel and stage its batch. Every failure stays within
    /// the channel.
    async fn scrape_and_stage(&mut self, channel: &str, run_date: NaiveDate, report: &mut ScrapeReport) {
        let batch = match self.scrape_channel(channel).await {
            Ok(batch) => batch,
            Err(ClientError::FloodWait { seconds }) => {
                warn!(channel, seconds, "Flood wait requested, suspending run");
                self.metrics.record_flood_wait(seconds);
                report.flood_waits += 1;
                tokio::time::sleep(Duration::from_secs(seconds)).await;
                return;
            }
            Err(e) => {
                error!(channel, error = %e, "Channel scrape failed");
                self.metrics.record_error("scrape");
                return;
            }
        };

        report.images_downloaded += batch.images_downloaded;
        report.image_failures += batch.image_failures;
        self.metrics
            .record_scrape(channel, batch.records.len(), batch.images_downloaded);

        if batch.records.is_empty() {
            info!(channel, "No messages to stage");
            return;
        }

        let root = Path::new(&self.config.staging_dir);
        let path = match staging::write_staged_file(root, run_date, channel, &batch.records) {
            Ok(path) => path,
            Err(e) => {
                error!(channel, messages = batch.records.len(), error = %e, "Storage failure, batch not staged");
                self.metrics.record_error("stage");
                report.staging_failures += 1;
                return;
            }
        };
        info!(channel, messages = batch.records.len(), path = %path.display(), "Channel staged");

        report.messages += batch.records.len();
        report.channels_staged += 1;
        report.staged_files.push(path);
    }

    /// Read up to `message_limit` messages, downloading photos as we go.
    ///
    /// Any client error discards the whole channel batch.
    async fn scrape_channel(&self, channel: &str) -> std::result::Result<ChannelBatch, ClientError> {
        let image_root = Path::new(&self.config.image_dir);
        let mut batch = ChannelBatch::default();
        let mut messages = MessageIter::new(&self.client, channel, self.config.message_limit);

        while let Some(message) = messages.next().await? {
            let Some(mut record) = normalize_message(&message, channel) else {
                continue;
            };

            if let Some(MediaKind::Photo { .. }) = &message.media {
                let destination = image_path_for(image_root, channel, record.message_id);
                match self.client.download_media(&message, &destination).await {
                    Ok(path) => {
                        record.image_path = Some(path.to_string_lossy().into_owned());
                        batch.images_downloaded += 1;
                    }
                    Err(e) => {
                        warn!(channel, message_id = record.message_id, error = %e, "Photo download failed");
                        batch.image_failures += 1;
                    }
                }
            }

            batch.records.push(record);
        }

        debug!(channel, messages = batch.records.len(), "Channel read");
        Ok(batch)
    }

    async fn pause_between_channels(&self) {
        let jitter_ms = match self.config.channel_jitter_ms {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };
        let delay = Duration::from_secs(self.config.channel_delay_secs) + Duration::from_millis(jitter_ms);
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Pausing between channels");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_channel_name_forms() {
        assert_eq!(normalize_channel_name("https://t.me/Foo"), "Foo");
        assert_eq!(normalize_channel_name("@Foo"), "Foo");
        assert_eq!(normalize_channel_name("Foo/"), "Foo");
        assert_eq!(normalize_channel_name("  https://t.me/lobelia4cosmetics/ "), "lobelia4cosmetics");
    }

    #[test]
    fn test_normalize_message_defaults() {
        let message = PlatformMessage {
            id: Some(5),
            posted_at: Some(Utc::now()),
            ..PlatformMessage::default()
        };
        let record = normalize_message(&message, "Foo").unwrap();
        assert_eq!(record.text, "");
        assert!(!record.has_media);
        assert_eq!(record.view_count, 0);
        assert_eq!(record.forward_count, 0);
        assert_eq!(record.image_path, None);
    }

    #[test]
    fn test_normalize_message_requires_identity() {
        let no_id = PlatformMessage {
            posted_at: Some(Utc::now()),
            ..PlatformMessage::default()
        };
        let no_time = PlatformMessage {
            id: Some(1),
            ..PlatformMessage::default()
        };
        let zero_id = PlatformMessage {
            id: Some(0),
            posted_at: Some(Utc::now()),
            ..PlatformMessage::default()
        };
        assert!(normalize_message(&no_id, "Foo").is_none());
        assert!(normalize_message(&no_time, "Foo").is_none());
        assert!(normalize_message(&zero_id, "Foo").is_none());
    }

    #[test]
    fn test_image_path_layout() {
        assert_eq!(
            image_path_for(Path::new("data/raw/images"), "Foo", 42),
            PathBuf::from("data/raw/images/Foo/42.jpg")
        );
    }
}
