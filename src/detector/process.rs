//! Detection through an external inference command.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::ObjectDetector;
use crate::config::DetectorConfig;
use crate::error::{IngestError, Result};
use crate::models::RawDetection;

/// Runs `<program> <args..> <image>` and reads detections from its stdout.
///
/// The command must print either a JSON array of `{"label", "confidence"}`
/// objects (`class_name` is accepted for `label`) or an object with such an
/// array under `detections`.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    /// Run `program args... <image>` with a per-image timeout
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from the `detector` config section
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn failure(image: &Path, reason: impl Into<String>) -> IngestError {
        IngestError::Detection {
            path: PathBuf::from(image),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ObjectDetector for CommandDetector {
    async fn detect(&self, image: &Path) -> Result<Vec<RawDetection>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(image)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| Self::failure(image, format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| Self::failure(image, format!("could not run {}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(Self::failure(
                image,
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let detections = parse_detections(&stdout).map_err(|e| Self::failure(image, e.to_string()))?;
        debug!(path = %image.display(), count = detections.len(), "Detector output parsed");
        Ok(detections)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectorOutput {
    List(Vec<RawDetection>),
    Wrapped { detections: Vec<RawDetection> },
}

/// Parse detector stdout. Blank output means nothing was detected.
pub fn parse_detections(stdout: &str) -> serde_json::Result<Vec<RawDetection>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(match serde_json::from_str::<DetectorOutput>(stdout.trim())? {
        DetectorOutput::List(list) | DetectorOutput::Wrapped { detections: list } => list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detections_forms() {
        let list = parse_detections(r#"[{"label":"cup","confidence":0.9}]"#).unwrap();
        assert_eq!(list, vec![RawDetection::new("cup", 0.9)]);

        let wrapped = parse_detections(r#"{"detections":[{"class_name":"person","confidence":0.7}]}"#).unwrap();
        assert_eq!(wrapped, vec![RawDetection::new("person", 0.7)]);

        assert!(parse_detections("  \n").unwrap().is_empty());
        assert!(parse_detections("not json").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_detector_runs_program() {
        let detector = CommandDetector::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"printf '[{"label":"bottle","confidence":0.4}]'"#.to_string(),
                "detector".to_string(),
            ],
            Duration::from_secs(10),
        );

        let detections = detector.detect(Path::new("/tmp/1.jpg")).await.unwrap();
        assert_eq!(detections, vec![RawDetection::new("bottle", 0.4)]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_detector_nonzero_exit_is_error() {
        let detector = CommandDetector::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 3".to_string(), "detector".to_string()],
            Duration::from_secs(10),
        );

        let err = detector.detect(Path::new("/tmp/1.jpg")).await.unwrap_err();
        assert!(matches!(err, IngestError::Detection { .. }));
        assert!(err.to_string().contains("boom"));
    }
}
