//! Data models for channel messages, detections and pipeline bookkeeping
//!
//! This module contains the strict internal record types the pipeline moves
//! between stages, plus the loosely-typed payload a channel client hands us
//! before normalization.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A normalized channel post, as staged to the data lake and loaded into the
/// raw store.
///
/// `(message_id, channel_name)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Platform message identifier, unique within a channel
    pub message_id: i64,
    /// Canonical channel name (no scheme, path or `@`)
    pub channel_name: String,
    /// When the message was posted (absolute UTC instant)
    pub posted_at: DateTime<Utc>,
    /// Message text, empty when the platform had none
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    /// True if any media object was attached
    #[serde(default)]
    pub has_media: bool,
    /// Local path of the downloaded photo, if the download succeeded
    #[serde(default)]
    pub image_path: Option<String>,
    /// View counter at scrape time
    #[serde(default)]
    pub view_count: i64,
    /// Forward counter at scrape time
    #[serde(default)]
    pub forward_count: i64,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// A message row as stored in the raw table
#[derive(Debug, Clone, PartialEq)]
pub struct DbMessage {
    /// The staged fields
    pub record: MessageRecord,
    /// Timestamp of the most recent upsert touching this row
    pub loaded_at: DateTime<Utc>,
}

/// Kind of media attached to a platform message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// A photo, downloadable from the given location
    Photo {
        /// Where the client can fetch the full image
        url: String,
    },
    /// Video, document, poll or anything else we do not download
    Other,
}

/// A message as reported by a channel client, before validation.
///
/// Every field is optional because platforms omit fields freely;
/// [`crate::scraper::normalize_message`] decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformMessage {
    /// Platform message id
    pub id: Option<i64>,
    /// Post timestamp
    pub posted_at: Option<DateTime<Utc>>,
    /// Text body
    pub text: Option<String>,
    /// Attached media
    pub media: Option<MediaKind>,
    /// View counter
    pub views: Option<i64>,
    /// Forward counter
    pub forwards: Option<i64>,
}

/// One raw detection from the object-detection capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class label, e.g. `person` or `bottle`
    #[serde(alias = "class_name")]
    pub label: String,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
}

impl RawDetection {
    /// Convenience constructor
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Coarse category assigned to an image from its detections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageCategory {
    /// A person together with a product
    Promotional,
    /// A product without a person
    ProductDisplay,
    /// A person without a product
    Lifestyle,
    /// Anything else, including nothing detected
    Other,
}

impl ImageCategory {
    /// Stored string form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Promotional => "promotional",
            Self::ProductDisplay => "product_display",
            Self::Lifestyle => "lifestyle",
            Self::Other => "other",
        }
    }

    /// All categories, in reporting order
    pub const ALL: [ImageCategory; 4] = [
        Self::Promotional,
        Self::ProductDisplay,
        Self::Lifestyle,
        Self::Other,
    ];
}

impl fmt::Display for ImageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "promotional" => Ok(Self::Promotional),
            "product_display" => Ok(Self::ProductDisplay),
            "lifestyle" => Ok(Self::Lifestyle),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown image category: {other}")),
        }
    }
}

/// Top-1 summary of the detections for one image-bearing message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    /// Message id derived from the image file stem
    pub message_id: i64,
    /// Channel derived from the image's parent directory
    pub channel_name: String,
    /// Image location on disk
    pub image_path: String,
    /// Highest-confidence label, `None` when nothing was detected
    pub detected_class: Option<String>,
    /// Confidence of `detected_class`, 0.0 when nothing was detected
    pub confidence_score: f64,
    /// Derived category
    pub image_category: ImageCategory,
    /// JSON-encoded list of every raw detection
    pub all_detections: String,
    /// When detection ran
    pub detected_at: DateTime<Utc>,
}

/// Identity of a message across the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    /// Platform message id
    pub message_id: i64,
    /// Canonical channel name
    pub channel_name: String,
}

impl MessageKey {
    /// Build a key
    pub fn new(message_id: i64, channel_name: impl Into<String>) -> Self {
        Self {
            message_id,
            channel_name: channel_name.into(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_name, self.message_id)
    }
}
