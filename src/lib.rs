//! Channel Ingest - Incremental Channel Ingestion and Image Enrichment
//!
//! A Rust library for scraping public messaging channels into a file-based
//! staging area, upserting them into a relational store, and enriching the
//! staged images with object-detection labels.
//!
//! # Features
//!
//! - Paged, rate-limit aware channel scraping with photo download
//! - Write-once dated staged files
//! - Idempotent upsert loading keyed by `(message_id, channel_name)`
//! - Incremental object detection that skips already-processed images
//! - External transformation tool invocation and table verification

/// Channel client abstraction and the web preview client
pub mod client;
/// Configuration management
pub mod config;
/// Database operations and connection pooling
pub mod db;
/// Object detection and image classification
pub mod detector;
/// Error types
pub mod error;
/// Staged data loaders
pub mod loader;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Stage orchestration
pub mod pipeline;
/// Database schema definitions
pub mod schema;
/// Channel scraping and message normalization
pub mod scraper;
/// File-based staging area
pub mod staging;
/// Transformation tool invocation
pub mod transform;
/// Input validation and sanitization
pub mod validation;

// Re-export key components for easier access
pub use client::{ChannelClient, MessageIter, WebClientSettings, WebPreviewClient};
pub use db::Database;
pub use detector::{CommandDetector, Detector, ObjectDetector};
pub use error::{ClientError, IngestError, Result};
pub use loader::{DetectionLoader, RawLoader};
pub use models::{DetectionRecord, ImageCategory, MessageKey, MessageRecord, PlatformMessage, RawDetection};
pub use pipeline::{Pipeline, PipelineReport, Stage, StageStatus};
pub use crate::scraper::Scraper;
