//! The two run modes: collect evidence, or consolidate a stored report
//!
//! Configuration and catalog errors are the only fatal outcomes of `collect`;
//! everything below target level degrades into the report instead.

use crate::ai::{Annotator, LambdaAnnotator, MockAnnotator};
use crate::catalog::TargetCatalog;
use crate::collectors::{
    AwsApi, AwsCli, Collector, LogCollector, MetricsCollector, RdsCollector, ScreenshotCollector,
};
use crate::config::{AiBackend, Config};
use crate::error::{ConfigError, ReportError};
use crate::model::TimeWindow;
use crate::orchestrator::Orchestrator;
use crate::report::{merge, PandocEngine, ReportWriter, RunHeader, RunReport, WrittenReport};
use chrono::Utc;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a collect or consolidate run
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub written: WrittenReport,
}

/// Immutable configuration plus the wiring between components
pub struct Pipeline {
    config: Arc<Config>,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` for out-of-range settings.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collectors backed by the given AWS client, in report order
    pub fn collectors(&self, api: Arc<dyn AwsApi>) -> Vec<Arc<dyn Collector>> {
        let mut collectors: Vec<Arc<dyn Collector>> = Vec::new();
        if self.config.run.enable_screenshots {
            collectors.push(Arc::new(ScreenshotCollector::from_config(
                Arc::clone(&api),
                &self.config,
            )));
        } else {
            info!("Screenshot collection disabled");
        }
        collectors.push(Arc::new(MetricsCollector::from_config(
            Arc::clone(&api),
            &self.config,
        )));
        collectors.push(Arc::new(LogCollector::new(
            Arc::clone(&api),
            self.config.logs.clone(),
        )));
        if self.config.rds.enabled {
            collectors.push(Arc::new(RdsCollector::from_config(api, &self.config)));
        } else {
            info!("Database metric collection disabled");
        }
        collectors
    }

    /// The configured annotator, or `None` when AI analysis is off
    ///
    /// An endpoint client that cannot be built disables annotation for the
    /// run rather than failing it.
    pub fn annotator(&self) -> Option<Arc<dyn Annotator>> {
        if !self.config.run.enable_ai_analysis {
            info!("AI analysis disabled");
            return None;
        }
        match self.config.ai.backend {
            AiBackend::Mock => {
                info!("Using mock analysis backend");
                Some(Arc::new(MockAnnotator::categorizing("Unclassified")))
            }
            AiBackend::Lambda => match LambdaAnnotator::from_config(&self.config.ai) {
                Ok(annotator) => Some(Arc::new(annotator)),
                Err(e) => {
                    warn!("AI analysis unavailable for this run: {}", e);
                    None
                }
            },
        }
    }

    fn writer(&self, environment: &str) -> ReportWriter {
        let writer = ReportWriter::new(self.config.output.directory.join(environment));
        if self.config.run.generate_pdf {
            writer.with_pdf(Box::new(PandocEngine::new(&self.config.output.pdf_command)))
        } else {
            writer
        }
    }

    /// Collect evidence for every resolved target using the `aws` CLI
    pub async fn collect(&self) -> Result<RunOutcome, ConfigError> {
        let cli = AwsCli::new(self.config.run.aws_cli.clone());
        if !cli.is_available().await {
            warn!(
                "'{}' is not runnable; every collector will report a failure",
                self.config.run.aws_cli
            );
        }
        let collectors = self.collectors(Arc::new(cli));
        self.collect_with(collectors, self.annotator()).await
    }

    /// Collect with explicit collectors and annotator
    pub async fn collect_with(
        &self,
        collectors: Vec<Arc<dyn Collector>>,
        annotator: Option<Arc<dyn Annotator>>,
    ) -> Result<RunOutcome, ConfigError> {
        let catalog = TargetCatalog::resolve(&self.config)?;
        let run = &self.config.run;
        let window = TimeWindow::from_days_back(run.start_days_back, run.end_days_back, Utc::now());
        let header = RunHeader::new(&run.environment, window);
        info!(
            "Run {} for {}: {} target(s), window {}",
            header.run_id,
            run.environment,
            catalog.len(),
            window
        );

        let orchestrator = Orchestrator::from_config(&self.config, collectors, annotator);
        let targets = orchestrator.run(catalog.targets(), window).await;
        let report = merge(targets, header);

        let summary = &report.summary;
        info!(
            "Run {} finished: {} target(s), {} failed collector(s), {} error occurrence(s)",
            report.run_id, summary.target_count, summary.failure_count, summary.error_occurrences
        );

        let writer = self.writer(&report.environment);
        Ok(write_report(writer, report).await)
    }

    /// Re-merge a stored JSON report and render it again
    ///
    /// The stored summary is recomputed. A fresh run id and timestamp are
    /// issued unless `keep_run_id` is set. Screenshot links point back at the
    /// evidence next to `input`, wherever the new reports are written.
    pub async fn consolidate(
        &self,
        input: &Path,
        keep_run_id: bool,
    ) -> Result<RunOutcome, ReportError> {
        let path = input.to_path_buf();
        let stored = tokio::task::spawn_blocking(move || RunReport::load(&path))
            .await
            .map_err(|e| ReportError::Read(std::io::Error::other(e.to_string())))??;
        if !stored.is_consistent() {
            warn!(
                "Stored summary in {} does not match its targets; recomputing",
                input.display()
            );
        }

        let header = if keep_run_id {
            None
        } else {
            Some(RunHeader::new(&stored.environment, stored.window))
        };
        let report = stored.regenerate(header);
        info!(
            "Consolidated {} target(s) from {} as run {}",
            report.targets.len(),
            input.display(),
            report.run_id
        );

        let evidence_dir = match input.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let writer = self
            .writer(&report.environment)
            .with_artifact_root(evidence_dir);
        Ok(write_report(writer, report).await)
    }
}

async fn write_report(writer: ReportWriter, report: RunReport) -> RunOutcome {
    let report = Arc::new(report);
    let written = writer.write_in_background(Arc::clone(&report)).await;
    let report = Arc::try_unwrap(report).unwrap_or_else(|shared| (*shared).clone());
    RunOutcome { report, written }
}
