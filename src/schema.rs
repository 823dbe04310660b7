//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite,
//! plus the create-if-absent DDL for each table. Nothing here ever drops or
//! truncates existing data.

/// Raw channel messages table schema
pub mod telegram_messages {
    /// Table name
    pub const TABLE: &str = "telegram_messages";
    /// Platform message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Canonical channel name column
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Post timestamp column
    pub const POSTED_AT: &str = "posted_at";
    /// Message text column
    pub const TEXT: &str = "message_text";
    /// Flag indicating attached media
    pub const HAS_MEDIA: &str = "has_media";
    /// Downloaded photo path column
    pub const IMAGE_PATH: &str = "image_path";
    /// View counter column
    pub const VIEW_COUNT: &str = "view_count";
    /// Forward counter column
    pub const FORWARD_COUNT: &str = "forward_count";
    /// Last upsert timestamp column
    pub const LOADED_AT: &str = "loaded_at";

    /// Create-if-absent DDL
    pub const CREATE: &str = "
        CREATE TABLE IF NOT EXISTS telegram_messages (
            message_id    INTEGER NOT NULL,
            channel_name  TEXT    NOT NULL,
            posted_at     TEXT    NOT NULL,
            message_text  TEXT    NOT NULL DEFAULT '',
            has_media     INTEGER NOT NULL DEFAULT 0,
            image_path    TEXT,
            view_count    INTEGER NOT NULL DEFAULT 0 CHECK (view_count >= 0),
            forward_count INTEGER NOT NULL DEFAULT 0 CHECK (forward_count >= 0),
            loaded_at     TEXT    NOT NULL,
            UNIQUE (message_id, channel_name)
        );
        CREATE INDEX IF NOT EXISTS idx_telegram_messages_posted_at
            ON telegram_messages (channel_name, posted_at);
    ";
}

/// Object detection results table schema
pub mod image_detections {
    /// Table name
    pub const TABLE: &str = "image_detections";
    /// Platform message identifier column
    pub const MESSAGE_ID: &str = "message_id";
    /// Canonical channel name column
    pub const CHANNEL_NAME: &str = "channel_name";
    /// Image path column
    pub const IMAGE_PATH: &str = "image_path";
    /// Top-1 label column, NULL when nothing was detected
    pub const DETECTED_CLASS: &str = "detected_class";
    /// Top-1 confidence column
    pub const CONFIDENCE_SCORE: &str = "confidence_score";
    /// Image category column
    pub const IMAGE_CATEGORY: &str = "image_category";
    /// JSON-encoded raw detections column
    pub const ALL_DETECTIONS: &str = "all_detections";
    /// Detection timestamp column
    pub const DETECTED_AT: &str = "detected_at";

    /// Create-if-absent DDL
    pub const CREATE: &str = "
        CREATE TABLE IF NOT EXISTS image_detections (
            message_id       INTEGER NOT NULL,
            channel_name     TEXT    NOT NULL,
            image_path       TEXT    NOT NULL,
            detected_class   TEXT,
            confidence_score REAL    NOT NULL DEFAULT 0.0
                CHECK (confidence_score >= 0.0 AND confidence_score <= 1.0),
            image_category   TEXT    NOT NULL
                CHECK (image_category IN ('promotional', 'product_display', 'lifestyle', 'other')),
            all_detections   TEXT    NOT NULL DEFAULT '[]',
            detected_at      TEXT    NOT NULL,
            UNIQUE (message_id, channel_name)
        );
    ";
}
