//! Unit tests for config.rs module

use std::io::Write;

use channel_ingest::config::AppConfig;

#[test]
fn test_default_database_config() {
    let config = AppConfig::default();

    assert_eq!(config.database.url, "sqlite:data/warehouse.db");
    assert_eq!(config.database.max_connections, 4);
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_scraper_config() {
    let config = AppConfig::default();

    assert_eq!(config.scraper.message_limit, 100);
    assert_eq!(config.scraper.channel_delay_secs, 5);
    assert_eq!(config.scraper.channel_jitter_ms, 0);
    assert_eq!(config.scraper.staging_dir, "data/raw/telegram_messages");
    assert_eq!(config.scraper.image_dir, "data/raw/images");
    assert_eq!(config.scraper.channels.len(), 3);
    assert!(config.scraper.proxy_url.is_none());
}

#[test]
fn test_default_detector_config() {
    let config = AppConfig::default();

    assert_eq!(config.detector.min_confidence, 0.0);
    assert_eq!(config.detector.person_labels, vec!["person"]);
    assert_eq!(config.detector.commercial_labels, vec!["bottle", "cup", "bowl", "vase"]);
}

#[test]
fn test_default_transform_config() {
    let config = AppConfig::default();

    assert!(config.transform.enabled);
    assert_eq!(config.transform.program, "dbt");
    assert_eq!(config.transform.detection_target, "fct_image_detections");
}

#[test]
fn test_config_validation_success() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_zero_message_limit() {
    let mut config = AppConfig::default();
    config.scraper.message_limit = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_level() {
    let mut config = AppConfig::default();
    config.logging.level = "verbose".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_invalid_log_format() {
    let mut config = AppConfig::default();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_confidence_out_of_range() {
    let mut config = AppConfig::default();
    config.detector.min_confidence = 1.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_bad_base_url() {
    let mut config = AppConfig::default();
    config.scraper.base_url = "t.me".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_bad_verify_table() {
    let mut config = AppConfig::default();
    config.pipeline.verify_tables = vec!["marts.fct_messages".to_string(), "x; DROP".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_ignores_transform_when_disabled() {
    let mut config = AppConfig::default();
    config.transform.enabled = false;
    config.transform.program = String::new();
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_with_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[scraper]
channels = ["@Foo", "https://t.me/Bar"]
message_limit = 25

[transform]
enabled = false
"#
    )
    .unwrap();

    let config = AppConfig::load_with(Some(file.path())).unwrap();

    assert_eq!(config.scraper.channels, vec!["@Foo", "https://t.me/Bar"]);
    assert_eq!(config.scraper.message_limit, 25);
    assert!(!config.transform.enabled);
    // Untouched keys keep their defaults
    assert_eq!(config.scraper.channel_delay_secs, 5);
    assert_eq!(config.detector.program, "yolo-detect");
}

#[test]
fn test_load_with_invalid_file_values_fails() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[scraper]\nmessage_limit = 0").unwrap();

    assert!(AppConfig::load_with(Some(file.path())).is_err());
}

#[test]
fn test_config_serialization() {
    let config = AppConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let back: AppConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(back.scraper.channels, config.scraper.channels);
    assert_eq!(back.detector.export_csv, config.detector.export_csv);
}
