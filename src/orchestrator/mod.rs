//! Concurrent evidence collection across monitoring targets
//!
//! One task per target, bounded by a semaphore, and one task per collector job
//! inside a target. Each job is retried under a `RetryPolicy`, each attempt is
//! bounded by the per-job timeout, and everything is bounded by the run
//! deadline. Results are merged into a `TargetReport` at a single point per
//! target, where evidence is persisted and log entries become findings. File
//! writes run on the blocking pool.

mod retry;

pub use retry::{Retried, RetryPolicy};

use crate::ai::classifier::classify;
use crate::ai::{AnnotationRequest, Annotations, Annotator};
use crate::artifacts::ArtifactStore;
use crate::collectors::Collector;
use crate::config::Config;
use crate::error::{AnnotationError, StoreError};
use crate::model::{CollectionResult, CollectorKind, ErrorFinding, MonitoringTarget, TimeWindow};
use crate::report::{AnnotationStatus, CollectorRecord, CollectorStatus, TargetReport};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, timeout_at, Instant};

/// Failure reason for an attempt that exceeded the per-job timeout
pub const TIMEOUT_REASON: &str = "timeout";
/// Failure reason for work cut off by the run deadline
pub const DEADLINE_REASON: &str = "run_deadline_exceeded";

/// Scheduling knobs, usually derived from `Config`
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Maximum number of targets collected at the same time
    pub concurrency_limit: usize,
    /// Retry policy for collector jobs
    pub retry: RetryPolicy,
    /// Bound on a single collector attempt
    pub per_job_timeout: Duration,
    /// Bound on the whole run, measured from `run`
    pub run_deadline: Duration,
    /// Retry policy for the annotation call
    pub annotation_retry: RetryPolicy,
    /// Minimum error occurrences before annotation is attempted
    pub min_errors: usize,
    /// Maximum excerpts sent per annotation request
    pub max_excerpts: usize,
    /// Application context sent with every annotation request
    pub context: Option<String>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency_limit: config.run.concurrency_limit,
            retry: RetryPolicy::from_run_config(&config.run),
            per_job_timeout: config.run.per_job_timeout(),
            run_deadline: config.run.run_deadline(),
            annotation_retry: RetryPolicy::for_annotation(&config.ai, &config.run),
            min_errors: config.ai.min_errors,
            max_excerpts: config.ai.max_excerpts,
            context: if config.run.enable_ai_analysis {
                config.ai.load_context()
            } else {
                None
            },
        }
    }
}

/// Runs every applicable collector for every target
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    collectors: Vec<Arc<dyn Collector>>,
    /// `None` when AI analysis is disabled for the run
    annotator: Option<Arc<dyn Annotator>>,
    store: ArtifactStore,
    settings: OrchestratorSettings,
}

/// Terminal state of one job
struct JobOutcome {
    result: CollectionResult,
    attempts: u32,
}

impl Orchestrator {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        annotator: Option<Arc<dyn Annotator>>,
        store: ArtifactStore,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collectors,
                annotator,
                store,
                settings,
            }),
        }
    }

    /// Orchestrator writing evidence under the configured environment directory
    pub fn from_config(
        config: &Config,
        collectors: Vec<Arc<dyn Collector>>,
        annotator: Option<Arc<dyn Annotator>>,
    ) -> Self {
        Self::new(
            collectors,
            annotator,
            ArtifactStore::new(config.environment_dir()),
            OrchestratorSettings::from_config(config),
        )
    }

    /// Collect all targets
    ///
    /// Returns exactly one report per target, in the order given.
    pub async fn run(&self, targets: &[MonitoringTarget], window: TimeWindow) -> Vec<TargetReport> {
        let settings = &self.inner.settings;
        let deadline = Instant::now() + settings.run_deadline;
        let semaphore = Arc::new(Semaphore::new(settings.concurrency_limit.max(1)));

        info!(
            "Collecting {} target(s) for {} with concurrency {}",
            targets.len(),
            window,
            settings.concurrency_limit
        );

        let mut set = JoinSet::new();
        for (index, target) in targets.iter().enumerate() {
            let inner = Arc::clone(&self.inner);
            let semaphore = Arc::clone(&semaphore);
            let target = target.clone();
            set.spawn(async move {
                let report = inner.run_target(target, window, semaphore, deadline).await;
                (index, report)
            });
        }

        let mut slots: Vec<Option<TargetReport>> = vec![None; targets.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, report)) => {
                    log_target_report(&report);
                    slots[index] = Some(report);
                }
                Err(e) => error!("Target task ended unexpectedly: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    TargetReport::failed(
                        target.clone(),
                        &self.inner.applicable_kinds(target),
                        "collection task aborted",
                        false,
                    )
                })
            })
            .collect()
    }
}

fn log_target_report(report: &TargetReport) {
    let failed = report.failed_collectors().count();
    let total = report.collectors.len();
    if failed == 0 {
        info!(
            "Target {} complete: {} collector(s) succeeded, {} finding(s)",
            report.target,
            total,
            report.findings.len()
        );
    } else {
        warn!(
            "Target {} complete with failures: {}/{} collector(s) failed",
            report.target, failed, total
        );
    }
}

impl Inner {
    fn applicable(&self, target: &MonitoringTarget) -> Vec<Arc<dyn Collector>> {
        self.collectors
            .iter()
            .filter(|c| c.applies_to(target))
            .cloned()
            .collect()
    }

    fn applicable_kinds(&self, target: &MonitoringTarget) -> Vec<CollectorKind> {
        self.applicable(target).iter().map(|c| c.kind()).collect()
    }

    /// Annotation status for a target that produced no findings
    fn idle_annotation(&self) -> AnnotationStatus {
        if self.annotator.is_some() {
            AnnotationStatus::NotRequired
        } else {
            AnnotationStatus::Disabled
        }
    }

    async fn run_target(
        &self,
        target: MonitoringTarget,
        window: TimeWindow,
        semaphore: Arc<Semaphore>,
        deadline: Instant,
    ) -> TargetReport {
        let jobs = self.applicable(&target);
        let kinds: Vec<CollectorKind> = jobs.iter().map(|c| c.kind()).collect();

        let permit = match timeout_at(deadline, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                let mut report = TargetReport::failed(target, &kinds, "scheduler closed", false);
                report.annotation = self.idle_annotation();
                return report;
            }
            Err(_) => {
                warn!("Run deadline reached before {} was started", target);
                let mut report = TargetReport::failed(target, &kinds, DEADLINE_REASON, true);
                report.annotation = self.idle_annotation();
                return report;
            }
        };
        debug!("Starting {} job(s) for {}", jobs.len(), target);

        let mut set = JoinSet::new();
        for (slot, collector) in jobs.iter().enumerate() {
            let collector = Arc::clone(collector);
            let target = target.clone();
            let retry = self.settings.retry.clone();
            let per_job = self.settings.per_job_timeout;
            set.spawn(async move {
                let outcome = run_job(collector, target, window, retry, per_job, deadline).await;
                (slot, outcome)
            });
        }

        let mut outcomes: Vec<Option<JobOutcome>> = (0..jobs.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, outcome)) => outcomes[slot] = Some(outcome),
                Err(e) => error!("Collector task for {} ended unexpectedly: {}", target, e),
            }
        }
        drop(permit);

        let mut report = TargetReport::new(target);
        for (kind, outcome) in kinds.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or(JobOutcome {
                result: CollectionResult::failure("collector task aborted", false),
                attempts: 0,
            });
            let record = self.merge_outcome(&mut report, kind, outcome).await;
            report.collectors.push(record);
        }

        let mut findings = std::mem::take(&mut report.findings);
        report.annotation = self.annotate(&report.target, &mut findings, deadline).await;

        let target = report.target.clone();
        match self
            .persist(findings, move |store, findings| {
                store.save_findings(&target, findings)
            })
            .await
        {
            Ok((findings, _)) => report.findings = findings,
            Err(e) => warn!("Could not store classified errors for {}: {}", report.target, e),
        }

        report
    }

    /// Run one store write on the blocking pool, handing `data` back
    async fn persist<T, R, F>(&self, data: T, write: F) -> Result<(T, R), StoreError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(&ArtifactStore, &T) -> Result<R, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let written = write(&store, &data);
            written.map(|value| (data, value))
        })
        .await;
        joined.map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Fold one job outcome into the report, persisting its evidence
    async fn merge_outcome(
        &self,
        report: &mut TargetReport,
        kind: CollectorKind,
        outcome: JobOutcome,
    ) -> CollectorRecord {
        let JobOutcome { result, attempts } = outcome;
        let target = report.target.clone();
        let status = match result {
            CollectionResult::Screenshots(images) => {
                let persisted = self
                    .persist(images, move |store, images| {
                        store.save_screenshots(&target, images)
                    })
                    .await;
                match persisted {
                    Ok((_, refs)) => {
                        let items = refs.len();
                        report.screenshots = refs;
                        CollectorStatus::Succeeded { items }
                    }
                    Err(e) => store_failure(&report.target, kind, e),
                }
            }
            CollectionResult::MetricRows(rows) if kind == CollectorKind::Rds => {
                let persisted = self
                    .persist(rows, move |store, rows| store.save_rds_rows(&target, rows))
                    .await;
                match persisted {
                    Ok((rows, files)) => {
                        let items = rows.len();
                        report.rds_rows = rows;
                        report.rds_files = files;
                        CollectorStatus::Succeeded { items }
                    }
                    Err(e) => store_failure(&report.target, kind, e),
                }
            }
            CollectionResult::MetricRows(rows) => {
                let persisted = self
                    .persist(rows, move |store, rows| store.save_metric_rows(&target, rows))
                    .await;
                match persisted {
                    Ok((rows, files)) => {
                        let items = rows.len();
                        report.metric_rows = rows;
                        report.metric_files = files;
                        CollectorStatus::Succeeded { items }
                    }
                    Err(e) => store_failure(&report.target, kind, e),
                }
            }
            CollectionResult::LogEntries(entries) => {
                let persisted = self
                    .persist(entries, move |store, entries| {
                        store.save_log_entries(&target, entries)
                    })
                    .await;
                match persisted {
                    Ok((entries, file)) => {
                        let items = entries.len();
                        report.findings = classify(&entries);
                        report.log_file = file;
                        report.log_entries = entries;
                        CollectorStatus::Succeeded { items }
                    }
                    Err(e) => store_failure(&report.target, kind, e),
                }
            }
            CollectionResult::Failure { reason, retryable } => {
                CollectorStatus::Failed { reason, retryable }
            }
        };
        CollectorRecord {
            kind,
            status,
            attempts,
        }
    }

    async fn annotate(
        &self,
        target: &MonitoringTarget,
        findings: &mut [ErrorFinding],
        deadline: Instant,
    ) -> AnnotationStatus {
        let Some(annotator) = &self.annotator else {
            return AnnotationStatus::Disabled;
        };
        let occurrences: usize = findings.iter().map(|f| f.count).sum();
        if findings.is_empty() || occurrences < self.settings.min_errors {
            return AnnotationStatus::NotRequired;
        }

        let request = AnnotationRequest {
            service: target.service_id.clone(),
            target: target.name.clone(),
            excerpts: findings
                .iter()
                .take(self.settings.max_excerpts)
                .map(|f| f.log_excerpt.clone())
                .collect(),
            context: self.settings.context.clone(),
        };
        debug!(
            "Requesting annotation of {} excerpt(s) for {}",
            request.excerpts.len(),
            target
        );

        let attempt = self.settings.annotation_retry.run(
            |_| annotator.annotate(&request),
            |r: &Result<Annotations, AnnotationError>| matches!(r, Err(e) if e.is_retryable()),
        );

        match timeout_at(deadline, attempt).await {
            Err(_) => {
                warn!("Run deadline reached while annotating {}", target);
                AnnotationStatus::Failed {
                    reason: DEADLINE_REASON.to_string(),
                }
            }
            Ok(Retried {
                value: Err(e),
                attempts,
            }) => {
                warn!(
                    "Annotation for {} failed after {} attempt(s): {}",
                    target, attempts, e
                );
                AnnotationStatus::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(Retried {
                value: Ok(annotations),
                ..
            }) => {
                let mut annotated = 0;
                for finding in findings.iter_mut() {
                    if let Some(annotation) = annotations.get(&finding.log_excerpt) {
                        finding.category = Some(annotation.category.clone());
                        finding.ai_summary = Some(annotation.summary.clone());
                        annotated += 1;
                    }
                }
                debug!("Annotated {} finding(s) for {}", annotated, target);
                AnnotationStatus::Applied { annotated }
            }
        }
    }
}

fn store_failure(target: &MonitoringTarget, kind: CollectorKind, err: StoreError) -> CollectorStatus {
    error!("Failed to store {} evidence for {}: {}", kind, target, err);
    CollectorStatus::Failed {
        reason: format!("failed to store {} evidence: {}", kind, err),
        retryable: false,
    }
}

/// Run one collector for one target to a terminal state
async fn run_job(
    collector: Arc<dyn Collector>,
    target: MonitoringTarget,
    window: TimeWindow,
    retry: RetryPolicy,
    per_job: Duration,
    deadline: Instant,
) -> JobOutcome {
    let kind = collector.kind();
    let attempts = AtomicU32::new(0);
    let (collector_ref, target_ref, window_ref, attempts_ref) =
        (collector.as_ref(), &target, &window, &attempts);

    let retried = retry.run(
        |attempt| async move {
            attempts_ref.store(attempt, Ordering::Relaxed);
            match timeout(per_job, collector_ref.collect(target_ref, window_ref)).await {
                Ok(result) => {
                    if let CollectionResult::Failure { reason, retryable } = &result {
                        debug!(
                            "{} attempt {} for {} failed (retryable: {}): {}",
                            kind, attempt, target_ref, retryable, reason
                        );
                    }
                    result
                }
                Err(_) => {
                    warn!(
                        "{} attempt {} for {} timed out after {:?}",
                        kind, attempt, target_ref, per_job
                    );
                    CollectionResult::failure(TIMEOUT_REASON, true)
                }
            }
        },
        CollectionResult::is_retryable_failure,
    );

    match timeout_at(deadline, retried).await {
        Ok(Retried { value, attempts }) => JobOutcome {
            result: value,
            attempts,
        },
        Err(_) => {
            warn!("Run deadline reached during {} for {}", kind, target);
            JobOutcome {
                result: CollectionResult::failure(DEADLINE_REASON, true),
                attempts: attempts.load(Ordering::Relaxed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAnnotator;
    use crate::collectors::{MockCollector, MockStep};
    use crate::model::{LogEntry, MetricRow, WidgetImage};
    use chrono::{TimeZone, Utc};
    use quickcheck_macros::quickcheck;

    fn target(service: &str, name: &str) -> MonitoringTarget {
        MonitoringTarget {
            service_id: service.to_string(),
            name: name.to_string(),
            region: "us-west-2".to_string(),
            dashboard_id: format!("prod-{}-Dashboard", service),
            log_group_id: Some(format!("{}-logs", service.to_lowercase())),
            credential_profile: None,
            rds_instance: None,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::from_days_back(2, 1, Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap())
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            concurrency_limit: 4,
            retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100)),
            per_job_timeout: Duration::from_secs(1),
            run_deadline: Duration::from_secs(600),
            annotation_retry: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(100)),
            min_errors: 1,
            max_excerpts: 25,
            context: None,
        }
    }

    fn image(name: &str) -> WidgetImage {
        WidgetImage {
            widget_name: name.to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        }
    }

    fn rows(n: usize) -> Vec<MetricRow> {
        (0..n)
            .map(|i| MetricRow {
                group: "SRM MS Errors".to_string(),
                metric: "Create Errors".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 10, i as u32, 0).unwrap(),
                value: 1.0 + i as f64,
            })
            .collect()
    }

    fn error_entries() -> Vec<LogEntry> {
        let ts = Utc.with_ymd_and_hms(2024, 3, 8, 10, 0, 0).unwrap();
        [
            "ERROR c.e.Repo java.sql.SQLException: connection refused\nat com.example.Repo.load(Repo.java:10)",
            "ERROR c.e.Repo java.sql.SQLException: connection refused\nat com.example.Repo.load(Repo.java:10)",
            "ERROR c.e.Api java.lang.IllegalStateException: bad state\nat com.example.Api.run(Api.java:5)",
        ]
        .iter()
        .map(|m| LogEntry {
            timestamp: ts,
            message: m.to_string(),
        })
        .collect()
    }

    fn orchestrator(
        collectors: Vec<Arc<dyn Collector>>,
        annotator: Option<Arc<dyn Annotator>>,
        root: &std::path::Path,
        settings: OrchestratorSettings,
    ) -> Orchestrator {
        Orchestrator::new(collectors, annotator, ArtifactStore::new(root), settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_uses_every_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(MockCollector::always(
            CollectorKind::Metrics,
            CollectionResult::failure("Request throttled", true),
        ));
        let orch = orchestrator(vec![collector.clone()], None, dir.path(), settings());

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        let record = reports[0].record(CollectorKind::Metrics).unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(collector.call_count(), 3);
        assert_eq!(
            record.status,
            CollectorStatus::Failed {
                reason: "Request throttled".to_string(),
                retryable: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::failure("AccessDeniedException", false),
        ));
        let orch = orchestrator(vec![collector.clone()], None, dir.path(), settings());

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        assert_eq!(reports[0].collectors[0].attempts, 1);
        assert_eq!(collector.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_target_collection() {
        let dir = tempfile::tempdir().unwrap();
        let screenshots = Arc::new(MockCollector::always(
            CollectorKind::Screenshot,
            CollectionResult::Screenshots(vec![image("Errors")]),
        ));
        let slow = CollectionResult::MetricRows(rows(1));
        let metrics = Arc::new(
            MockCollector::always(CollectorKind::Metrics, CollectionResult::MetricRows(vec![]))
                .for_target(
                    "SRM/EU1",
                    vec![
                        MockStep::Delay(Duration::from_secs(5), slow.clone()),
                        MockStep::Delay(Duration::from_secs(5), slow),
                        MockStep::Return(CollectionResult::MetricRows(rows(3))),
                    ],
                ),
        );
        let logs = Arc::new(
            MockCollector::always(CollectorKind::Logs, CollectionResult::LogEntries(error_entries()))
                .skip_target("SRM/EU1"),
        );
        let orch = orchestrator(
            vec![screenshots, metrics.clone(), logs],
            None,
            dir.path(),
            settings(),
        );

        let reports = orch
            .run(&[target("SRM", "NA1"), target("SRM", "EU1")], window())
            .await;
        assert_eq!(reports.len(), 2);

        let a = &reports[0];
        assert_eq!(a.target.name, "NA1");
        assert_eq!(a.screenshots.len(), 1);
        assert_eq!(a.screenshots[0].path, "SRM/NA1/screenshots/Errors.png");
        assert!(dir.path().join(&a.screenshots[0].path).exists());
        assert_eq!(a.error_occurrences(), 3);
        assert_eq!(a.findings.len(), 2);
        assert_eq!(a.findings[0].count, 2);
        assert_eq!(a.log_file.as_deref(), Some("SRM/NA1/csv_data/error_logs.csv"));
        assert!(dir.path().join("SRM/NA1/csv_data/classified_errors.csv").exists());

        let b = &reports[1];
        assert_eq!(b.target.name, "EU1");
        assert!(b.record(CollectorKind::Logs).is_none());
        let metrics_record = b.record(CollectorKind::Metrics).unwrap();
        assert_eq!(metrics_record.status, CollectorStatus::Succeeded { items: 3 });
        assert_eq!(metrics_record.attempts, 3);
        assert_eq!(b.metric_rows.len(), 3);
        assert_eq!(b.metric_files, vec!["SRM/EU1/csv_data/SRM_MS_Errors.csv"]);
        assert_eq!(metrics.calls_for("SRM/EU1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ai_disabled_leaves_findings_unannotated() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::LogEntries(error_entries()),
        ));
        let orch = orchestrator(vec![logs], None, dir.path(), settings());

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        let report = &reports[0];
        assert_eq!(report.annotation, AnnotationStatus::Disabled);
        assert_eq!(report.log_entries.len(), 3);
        assert!(!report.findings.is_empty());
        assert!(report
            .findings
            .iter()
            .all(|f| f.category.is_none() && f.ai_summary.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_annotations_are_merged_into_findings() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::LogEntries(error_entries()),
        ));
        let annotator = Arc::new(MockAnnotator::categorizing("Database"));
        let mut settings = settings();
        settings.context = Some("Order management service".to_string());
        let orch = orchestrator(vec![logs], Some(annotator.clone()), dir.path(), settings);

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        let report = &reports[0];
        assert_eq!(report.annotation, AnnotationStatus::Applied { annotated: 2 });
        assert!(report
            .findings
            .iter()
            .all(|f| f.category.as_deref() == Some("Database")));
        assert_eq!(annotator.call_count(), 1);

        let request = annotator.last_request().unwrap();
        assert_eq!(request.service, "SRM");
        assert_eq!(request.target, "NA1");
        assert_eq!(request.excerpts.len(), 2);
        assert_eq!(request.context.as_deref(), Some("Order management service"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_annotation_failure_only_degrades_findings() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::LogEntries(error_entries()),
        ));
        let annotator = Arc::new(MockAnnotator::error("Internal server error"));
        let mut settings = settings();
        settings.annotation_retry =
            RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(10));
        let orch = orchestrator(vec![logs], Some(annotator.clone()), dir.path(), settings);

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        let report = &reports[0];
        assert!(matches!(report.annotation, AnnotationStatus::Failed { .. }));
        assert!(report.findings.iter().all(|f| f.category.is_none()));
        assert_eq!(report.failed_collectors().count(), 0);
        // 500 is retryable
        assert_eq!(annotator.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_annotation_skipped_below_min_errors() {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::LogEntries(error_entries()),
        ));
        let quiet = Arc::new(MockCollector::always(
            CollectorKind::Logs,
            CollectionResult::LogEntries(vec![]),
        ));
        let annotator = Arc::new(MockAnnotator::categorizing("Database"));

        let mut strict = settings();
        strict.min_errors = 10;
        let orch = orchestrator(vec![logs], Some(annotator.clone()), dir.path(), strict);
        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        assert_eq!(reports[0].annotation, AnnotationStatus::NotRequired);

        let orch = orchestrator(vec![quiet], Some(annotator.clone()), dir.path(), settings());
        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        assert_eq!(reports[0].annotation, AnnotationStatus::NotRequired);
        assert_eq!(annotator.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_finalizes_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        let collector = Arc::new(MockCollector::new(CollectorKind::Metrics).then_after(
            Duration::from_secs(30),
            CollectionResult::MetricRows(rows(1)),
        ));
        let mut settings = settings();
        settings.concurrency_limit = 1;
        settings.per_job_timeout = Duration::from_secs(60);
        settings.run_deadline = Duration::from_secs(10);
        let orch = orchestrator(vec![collector], None, dir.path(), settings);

        let started = Instant::now();
        let reports = orch
            .run(&[target("SRM", "NA1"), target("SRM", "EU1")], window())
            .await;
        assert_eq!(reports.len(), 2);
        assert!(started.elapsed() < Duration::from_secs(11));

        // First target was running; the second was still waiting for the permit
        // or had just received it when the deadline fired
        assert_eq!(reports[0].collectors[0].attempts, 1);
        assert!(reports[1].collectors[0].attempts <= 1);
        for report in &reports {
            assert_eq!(
                report.collectors[0].status,
                CollectorStatus::Failed {
                    reason: DEADLINE_REASON.to_string(),
                    retryable: true
                }
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_bounds_targets() {
        let dir = tempfile::tempdir().unwrap();
        let targets = vec![target("SRM", "NA1"), target("SRM", "EU1")];
        let collector = || {
            Arc::new(MockCollector::new(CollectorKind::Screenshot).then_after(
                Duration::from_millis(500),
                CollectionResult::Screenshots(vec![]),
            )) as Arc<dyn Collector>
        };

        let mut serial = settings();
        serial.concurrency_limit = 1;
        let orch = orchestrator(vec![collector()], None, dir.path(), serial);
        let started = Instant::now();
        orch.run(&targets, window()).await;
        assert_eq!(started.elapsed().as_millis(), 1000);

        let orch = orchestrator(vec![collector()], None, dir.path(), settings());
        let started = Instant::now();
        orch.run(&targets, window()).await;
        assert_eq!(started.elapsed().as_millis(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rds_rows_kept_apart_from_dashboard_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = Arc::new(MockCollector::always(
            CollectorKind::Metrics,
            CollectionResult::MetricRows(rows(2)),
        ));
        let db_row = MetricRow {
            group: "srm-storage".to_string(),
            metric: "CPUUtilization".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 10, 0, 0).unwrap(),
            value: 77.0,
        };
        let rds = Arc::new(MockCollector::always(
            CollectorKind::Rds,
            CollectionResult::MetricRows(vec![db_row.clone()]),
        ));
        let orch = orchestrator(vec![metrics, rds], None, dir.path(), settings());

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        let report = &reports[0];
        assert_eq!(report.metric_rows.len(), 2);
        assert_eq!(report.rds_rows, vec![db_row]);
        assert_eq!(
            report.rds_files,
            vec!["SRM/NA1/csv_data/rds/CPUUtilization_srm-storage.csv"]
        );
        assert!(dir.path().join(&report.rds_files[0]).exists());
        assert_eq!(
            report.record(CollectorKind::Rds).unwrap().status,
            CollectorStatus::Succeeded { items: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_turns_success_into_permanent_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let collector = Arc::new(MockCollector::always(
            CollectorKind::Screenshot,
            CollectionResult::Screenshots(vec![image("Errors")]),
        ));
        let orch = orchestrator(vec![collector], None, &blocker, settings());

        let reports = orch.run(&[target("SRM", "NA1")], window()).await;
        match &reports[0].collectors[0].status {
            CollectorStatus::Failed { reason, retryable } => {
                assert!(reason.starts_with("failed to store screenshot evidence"));
                assert!(!retryable);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(reports[0].screenshots.is_empty());
    }

    #[quickcheck]
    fn prop_one_report_per_target(count: u8, fail_mask: u8) -> bool {
        let count = (count % 8) as usize;
        let targets: Vec<MonitoringTarget> = (0..count)
            .map(|i| target("SRM", &format!("T{}", i)))
            .collect();

        let mut collector = MockCollector::always(
            CollectorKind::Metrics,
            CollectionResult::MetricRows(vec![]),
        );
        for (i, t) in targets.iter().enumerate() {
            if fail_mask & (1 << i) != 0 {
                collector = collector.for_target(
                    &t.key(),
                    vec![MockStep::Return(CollectionResult::failure("NotFound", false))],
                );
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(vec![Arc::new(collector)], None, dir.path(), settings());
        let rt = tokio::runtime::Runtime::new().unwrap();
        let reports = rt.block_on(orch.run(&targets, window()));

        reports.len() == targets.len()
            && reports
                .iter()
                .zip(&targets)
                .all(|(report, target)| &report.target == target)
    }
}
