use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::validation::InputValidator;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scraper: ScraperConfig,
    pub detector: DetectorConfig,
    pub transform: TransformConfig,
    pub pipeline: PipelineConfig,
}

/// Relational store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `sqlite:` URL or plain path
    pub url: String,
    /// Pool size
    pub max_connections: u32,
}

/// Log level, format and optional file sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

/// Channel scraping and staging locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Channel identifiers as URLs, `@handles` or bare names
    #[serde(default)]
    pub channels: Vec<String>,
    /// Most recent N messages fetched per channel
    pub message_limit: usize,
    /// Fixed pause after every channel
    pub channel_delay_secs: u64,
    /// Extra random pause, up to this many milliseconds
    pub channel_jitter_ms: u64,
    /// Root of the dated staged-file tree
    pub staging_dir: String,
    /// Root of the per-channel image tree
    pub image_dir: String,
    /// Base URL of the public channel preview site
    pub base_url: String,
    pub user_agent: String,
    /// HTTP or SOCKS proxy for every request
    #[serde(default)]
    pub proxy_url: Option<String>,
    pub request_timeout_secs: u64,
}

/// Object detection command and classification labels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Inference command; the image path is appended as the last argument
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
    /// Detections below this confidence are ignored for classification
    pub min_confidence: f64,
    pub person_labels: Vec<String>,
    pub commercial_labels: Vec<String>,
    /// Optional CSV audit export of each run's results
    #[serde(default)]
    pub export_csv: Option<String>,
}

/// Transformation tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// When false the transform steps report `Skipped`
    pub enabled: bool,
    pub program: String,
    pub project_dir: String,
    /// Defaults to `project_dir`
    #[serde(default)]
    pub profiles_dir: Option<String>,
    /// Model rebuilt after detections are loaded
    pub detection_target: String,
}

/// Pipeline-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Extra tables counted by the verify stage
    #[serde(default)]
    pub verify_tables: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/warehouse.db".to_string(),
                max_connections: 4,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            scraper: ScraperConfig {
                channels: vec![
                    "https://t.me/CheMed123".to_string(),
                    "https://t.me/lobelia4cosmetics".to_string(),
                    "https://t.me/tikvahpharma".to_string(),
                ],
                message_limit: 100,
                channel_delay_secs: 5,
                channel_jitter_ms: 0,
                staging_dir: "data/raw/telegram_messages".to_string(),
                image_dir: "data/raw/images".to_string(),
                base_url: "https://t.me".to_string(),
                user_agent: concat!("channel-ingest/", env!("CARGO_PKG_VERSION")).to_string(),
                proxy_url: None,
                request_timeout_secs: 30,
            },
            detector: DetectorConfig {
                program: "yolo-detect".to_string(),
                args: Vec::new(),
                timeout_secs: 120,
                min_confidence: 0.0,
                person_labels: vec!["person".to_string()],
                commercial_labels: vec![
                    "bottle".to_string(),
                    "cup".to_string(),
                    "bowl".to_string(),
                    "vase".to_string(),
                ],
                export_csv: Some("data/processed/image_detections.csv".to_string()),
            },
            transform: TransformConfig {
                enabled: true,
                program: "dbt".to_string(),
                project_dir: "medical_warehouse".to_string(),
                profiles_dir: None,
                detection_target: "fct_image_detections".to_string(),
            },
            pipeline: PipelineConfig {
                verify_tables: Vec::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load configuration, optionally layering an explicit file on top of the defaults
    pub fn load_with(config_file: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&AppConfig::default())
            .map_err(|e| anyhow::anyhow!("Failed to build default configuration: {}", e))?;

        let mut builder = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        let config = builder
            // Add environment variables with prefix, e.g. CHANNEL_INGEST_SCRAPER__MESSAGE_LIMIT
            .add_source(
                Environment::with_prefix("CHANNEL_INGEST")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scraper.channels")
                    .with_list_parse_key("pipeline.verify_tables")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database config
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        // Validate scraper config
        if self.scraper.message_limit == 0 {
            return Err(anyhow::anyhow!("message_limit must be greater than 0"));
        }
        if self.scraper.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be greater than 0"));
        }
        for channel in &self.scraper.channels {
            InputValidator::validate_channel_identifier(channel)?;
        }
        if !self.scraper.base_url.starts_with("http://") && !self.scraper.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!("base_url must be an http(s) URL: {}", self.scraper.base_url));
        }

        // Validate detector config
        if self.detector.program.trim().is_empty() {
            return Err(anyhow::anyhow!("detector program cannot be empty"));
        }
        InputValidator::validate_confidence(self.detector.min_confidence)?;
        if self.detector.timeout_secs == 0 {
            return Err(anyhow::anyhow!("detector timeout_secs must be greater than 0"));
        }

        // Validate transform config
        if self.transform.enabled {
            if self.transform.program.trim().is_empty() {
                return Err(anyhow::anyhow!("transform program cannot be empty"));
            }
            InputValidator::validate_transform_target(&self.transform.detection_target)?;
        }

        for table in &self.pipeline.verify_tables {
            InputValidator::validate_table_name(table)?;
        }

        Ok(())
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Profiles directory for the transform tool, defaulting to the project directory
    pub fn transform_profiles_dir(&self) -> PathBuf {
        self.transform
            .profiles_dir
            .as_ref()
            .map_or_else(|| PathBuf::from(&self.transform.project_dir), PathBuf::from)
    }
}
