use anyhow::{anyhow, Result};

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a raw channel identifier as given in configuration
    pub fn validate_channel_identifier(identifier: &str) -> Result<()> {
        if identifier.trim().is_empty() {
            return Err(anyhow!("Channel identifier cannot be empty"));
        }

        if identifier.len() > 255 {
            return Err(anyhow!("Channel identifier too long (max 255 characters)"));
        }

        if identifier.contains('\0') || identifier.contains('\r') || identifier.contains('\n') {
            return Err(anyhow!("Channel identifier contains invalid characters"));
        }

        Ok(())
    }

    /// Validate a canonical channel name (after normalization).
    ///
    /// Channel names become directory and file names in the staging area,
    /// so anything that could escape a directory is rejected.
    pub fn validate_channel_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(anyhow!("Channel name cannot be empty"));
        }

        if name == "." || name == ".." {
            return Err(anyhow!("Channel name cannot be a relative path component"));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(anyhow!("Channel name contains invalid characters: {}", name));
        }

        Ok(())
    }

    /// Validate a message identifier
    pub fn validate_message_id(id: i64) -> Result<()> {
        if id <= 0 {
            return Err(anyhow!("Message id must be positive, got {}", id));
        }
        Ok(())
    }

    /// Validate a detection confidence
    pub fn validate_confidence(confidence: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(anyhow!("Confidence must be within [0, 1], got {}", confidence));
        }
        Ok(())
    }

    /// Validate a table name, optionally schema-qualified (`schema.table`)
    pub fn validate_table_name(table: &str) -> Result<()> {
        let parts: Vec<&str> = table.split('.').collect();
        if parts.is_empty() || parts.len() > 2 {
            return Err(anyhow!("Invalid table name: {}", table));
        }

        for part in parts {
            let mut chars = part.chars();
            let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
            if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(anyhow!("Invalid table name: {}", table));
            }
        }

        Ok(())
    }

    /// Validate a transformation selector such as `fct_image_detections` or `tag:daily+`
    pub fn validate_transform_target(target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(anyhow!("Transform target cannot be empty"));
        }

        if !target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '+' | '@' | '/' | '*'))
        {
            return Err(anyhow!("Transform target contains invalid characters: {}", target));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_name_rejects_traversal() {
        assert!(InputValidator::validate_channel_name("..").is_err());
        assert!(InputValidator::validate_channel_name("a/b").is_err());
        assert!(InputValidator::validate_channel_name("CheMed123").is_ok());
    }

    #[test]
    fn test_table_name_allows_schema_prefix() {
        assert!(InputValidator::validate_table_name("raw_marts.fct_messages").is_ok());
        assert!(InputValidator::validate_table_name("1table").is_err());
        assert!(InputValidator::validate_table_name("a.b.c").is_err());
    }
}
