//! Unit tests for validation.rs module

use channel_ingest::validation::InputValidator;

#[test]
fn test_validate_channel_identifier_valid() {
    assert!(InputValidator::validate_channel_identifier("https://t.me/CheMed123").is_ok());
    assert!(InputValidator::validate_channel_identifier("@tikvahpharma").is_ok());
}

#[test]
fn test_validate_channel_identifier_empty() {
    assert!(InputValidator::validate_channel_identifier("").is_err());
    assert!(InputValidator::validate_channel_identifier("   ").is_err());
}

#[test]
fn test_validate_channel_identifier_too_long() {
    let long = "a".repeat(256);
    assert!(InputValidator::validate_channel_identifier(&long).is_err());
}

#[test]
fn test_validate_channel_identifier_control_chars() {
    assert!(InputValidator::validate_channel_identifier("foo\0").is_err());
    assert!(InputValidator::validate_channel_identifier("foo\nbar").is_err());
}

#[test]
fn test_validate_channel_name_valid() {
    assert!(InputValidator::validate_channel_name("lobelia4cosmetics").is_ok());
    assert!(InputValidator::validate_channel_name("my_channel-1.x").is_ok());
}

#[test]
fn test_validate_channel_name_path_components() {
    assert!(InputValidator::validate_channel_name("").is_err());
    assert!(InputValidator::validate_channel_name(".").is_err());
    assert!(InputValidator::validate_channel_name("..").is_err());
    assert!(InputValidator::validate_channel_name("a/b").is_err());
    assert!(InputValidator::validate_channel_name("a\\b").is_err());
}

#[test]
fn test_validate_message_id() {
    assert!(InputValidator::validate_message_id(1).is_ok());
    assert!(InputValidator::validate_message_id(0).is_err());
    assert!(InputValidator::validate_message_id(-4).is_err());
}

#[test]
fn test_validate_confidence_bounds() {
    assert!(InputValidator::validate_confidence(0.0).is_ok());
    assert!(InputValidator::validate_confidence(1.0).is_ok());
    assert!(InputValidator::validate_confidence(-0.01).is_err());
    assert!(InputValidator::validate_confidence(1.01).is_err());
    assert!(InputValidator::validate_confidence(f64::NAN).is_err());
}

#[test]
fn test_validate_table_name() {
    assert!(InputValidator::validate_table_name("telegram_messages").is_ok());
    assert!(InputValidator::validate_table_name("raw.telegram_messages").is_ok());
    assert!(InputValidator::validate_table_name("").is_err());
    assert!(InputValidator::validate_table_name("drop table").is_err());
    assert!(InputValidator::validate_table_name("t\"x").is_err());
}

#[test]
fn test_validate_transform_target() {
    assert!(InputValidator::validate_transform_target("fct_image_detections").is_ok());
    assert!(InputValidator::validate_transform_target("tag:daily+").is_ok());
    assert!(InputValidator::validate_transform_target("").is_err());
    assert!(InputValidator::validate_transform_target("x; rm -rf /").is_err());
}
