//! End-to-end pipeline orchestration.
//!
//! Stages run strictly in order:
//! Scrape → RawLoad → Transform → DetectAndLoad → Verify.
//!
//! Every stage consumes the [`StageToken`] produced by its predecessor, so a
//! stage cannot be started out of order. The first failing stage aborts the
//! run with [`IngestError::Stage`]; nothing is retried automatically.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::client::ChannelClient;
use crate::config::AppConfig;
use crate::db::Database;
use crate::detector::{DetectionReport, Detector, ObjectDetector};
use crate::error::{IngestError, Result};
use crate::loader::{DetectionLoader, LoadReport, RawLoader};
use crate::logging::OperationTimer;
use crate::metrics::RunMetrics;
use crate::schema::{image_detections, telegram_messages};
use crate::scraper::{ScrapeReport, Scraper};
use crate::staging;
use crate::transform::{TransformAction, TransformRunner};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Channels into the staging area
    Scrape,
    /// Staged files into the raw table
    RawLoad,
    /// `deps`, `run` and `test` of the transformation tool
    Transform,
    /// Object detection, detection load and the mart refresh
    DetectAndLoad,
    /// Row counts
    Verify,
}

impl Stage {
    /// Name used in logs and metric labels
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::RawLoad => "raw_load",
            Self::Transform => "transform",
            Self::DetectAndLoad => "detect_and_load",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// The stage did its work
    Completed,
    /// Nothing to do, or disabled by configuration
    Skipped,
}

/// Proof that a stage finished, handed to the next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageToken {
    stage: Option<Stage>,
    status: StageStatus,
}

impl StageToken {
    fn start() -> Self {
        Self {
            stage: None,
            status: StageStatus::Completed,
        }
    }

    fn completed(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            status: StageStatus::Completed,
        }
    }

    fn skipped(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            status: StageStatus::Skipped,
        }
    }

    /// Stage that produced this token, `None` for the run start
    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// How that stage ended
    pub fn status(&self) -> StageStatus {
        self.status
    }
}

/// Outcome and timing of one finished stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// Which stage
    pub stage: Stage,
    /// How it ended
    pub status: StageStatus,
    /// Wall-clock time spent in it
    pub duration: Duration,
}

/// Row counts gathered by the verify stage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Rows per table name
    pub counts: BTreeMap<String, i64>,
}

/// Everything a pipeline run produced
#[derive(Debug, Default, Clone)]
pub struct PipelineReport {
    /// Finished stages in execution order
    pub stages: Vec<StageResult>,
    /// Scrape summary, once the scrape stage ran
    pub scrape: Option<ScrapeReport>,
    /// Raw load summary
    pub load: Option<LoadReport>,
    /// Detection summary, `None` when the stage was skipped
    pub detection: Option<DetectionReport>,
    /// Final row counts
    pub verify: Option<VerifyReport>,
    /// Tallies merged from every stage
    pub metrics: RunMetrics,
}

impl PipelineReport {
    /// Status of `stage`, if it ran
    pub fn status_of(&self, stage: Stage) -> Option<StageStatus> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| s.status)
    }
}

/// Count rows in the raw tables plus `extra_tables`. Read-only.
pub fn verify(db: &Database, extra_tables: &[String]) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    let tables = [telegram_messages::TABLE, image_detections::TABLE]
        .into_iter()
        .map(str::to_string)
        .chain(extra_tables.iter().cloned());

    for table in tables {
        let count = db.count_rows(&table)?;
        info!(table = %table, rows = count, "Verified table");
        report.counts.insert(table, count);
    }
    Ok(report)
}

/// One full ingestion run
pub struct Pipeline<C: ChannelClient, D: ObjectDetector> {
    config: AppConfig,
    db: Database,
    client: Option<C>,
    detector: Option<D>,
    transform: TransformRunner,
    report: PipelineReport,
}

impl<C: ChannelClient, D: ObjectDetector> Pipeline<C, D> {
    /// Assemble a run from its collaborators
    pub fn new(config: AppConfig, db: Database, client: C, detector: D) -> Self {
        let transform = TransformRunner::from_config(&config);
        Self {
            config,
            db,
            client: Some(client),
            detector: Some(detector),
            transform,
            report: PipelineReport::default(),
        }
    }

    /// Run every stage in order, stopping at the first failure
    pub async fn run(mut self) -> Result<PipelineReport> {
        info!("Pipeline run started");

        let timer = OperationTimer::new(Stage::Scrape.as_str());
        let result = self.scrape(StageToken::start()).await;
        let token = self.checkpoint(Stage::Scrape, timer, result)?;

        let timer = OperationTimer::new(Stage::RawLoad.as_str());
        let result = self.raw_load(token);
        let token = self.checkpoint(Stage::RawLoad, timer, result)?;

        let timer = OperationTimer::new(Stage::Transform.as_str());
        let result = self.run_transforms(token).await;
        let token = self.checkpoint(Stage::Transform, timer, result)?;

        let timer = OperationTimer::new(Stage::DetectAndLoad.as_str());
        let result = self.detect_and_load(token).await;
        let token = self.checkpoint(Stage::DetectAndLoad, timer, result)?;

        let timer = OperationTimer::new(Stage::Verify.as_str());
        let result = self.verify_counts(token);
        self.checkpoint(Stage::Verify, timer, result)?;

        info!(stages = self.report.stages.len(), "Pipeline run finished");
        Ok(self.report)
    }

    /// Record a stage's outcome; a failure is wrapped with the stage name
    fn checkpoint(&mut self, stage: Stage, timer: OperationTimer, result: Result<StageToken>) -> Result<StageToken> {
        let duration = timer.elapsed();
        self.report
            .metrics
            .record_stage(stage.as_str(), duration, result.is_ok());

        match result {
            Ok(token) => {
                info!(stage = %stage, status = ?token.status(), duration_ms = duration.as_millis() as u64, "Stage finished");
                self.report.stages.push(StageResult {
                    stage,
                    status: token.status(),
                    duration,
                });
                Ok(token)
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "Stage failed, aborting run");
                self.report.metrics.record_error(stage.as_str());
                Err(e.in_stage(stage.as_str()))
            }
        }
    }

    async fn scrape(&mut self, _previous: StageToken) -> Result<StageToken> {
        let client = self
            .client
            .take()
            .ok_or_else(|| IngestError::Other("channel client already consumed".to_string()))?;

        let mut scraper = Scraper::new(client, self.config.scraper.clone());
        let report = scraper.run(&self.config.scraper.channels).await?;

        self.report.metrics.merge(scraper.metrics());
        self.report.scrape = Some(report);
        Ok(StageToken::completed(Stage::Scrape))
    }

    fn raw_load(&mut self, _previous: StageToken) -> Result<StageToken> {
        let mut loader = RawLoader::new(self.db.clone());
        loader.initialize_schema()?;
        DetectionLoader::new(self.db.clone()).initialize_schema()?;

        let report = loader.load(Path::new(&self.config.scraper.staging_dir))?;
        if report.files_failed > 0 {
            warn!(failed = report.files_failed, "Some staged files were not loaded");
        }

        self.report.metrics.merge(loader.metrics());
        self.report.load = Some(report);
        Ok(StageToken::completed(Stage::RawLoad))
    }

    async fn run_transforms(&mut self, _previous: StageToken) -> Result<StageToken> {
        if !self.config.transform.enabled {
            info!("Transform disabled, skipping");
            return Ok(StageToken::skipped(Stage::Transform));
        }

        for action in [TransformAction::Deps, TransformAction::Run, TransformAction::Test] {
            self.transform.execute(&self.transform.command(action)).await?;
        }
        Ok(StageToken::completed(Stage::Transform))
    }

    async fn detect_and_load(&mut self, _previous: StageToken) -> Result<StageToken> {
        let image_root = Path::new(&self.config.scraper.image_dir).to_path_buf();
        if staging::list_images(&image_root)?.is_empty() {
            info!(root = %image_root.display(), "No staged images, skipping detection");
            return Ok(StageToken::skipped(Stage::DetectAndLoad));
        }

        let detector = self
            .detector
            .take()
            .ok_or_else(|| IngestError::Other("object detector already consumed".to_string()))?;

        let mut detector = Detector::new(detector, self.db.clone(), self.config.detector.clone());
        let report = detector.process(&image_root).await?;
        self.report.metrics.merge(detector.metrics());
        self.report.detection = Some(report);

        if self.config.transform.enabled {
            self.transform
                .run_select(&self.config.transform.detection_target)
                .await?;
        }
        Ok(StageToken::completed(Stage::DetectAndLoad))
    }

    fn verify_counts(&mut self, _previous: StageToken) -> Result<StageToken> {
        let report = verify(&self.db, &self.config.pipeline.verify_tables)?;
        self.report.verify = Some(report);
        Ok(StageToken::completed(Stage::Verify))
    }
}
