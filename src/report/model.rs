//! Canonical run-level report model
//!
//! `TargetReport`s are produced by the orchestrator; `merge` folds them into a
//! `RunReport` whose summary is always recomputed from the targets.

use crate::error::ReportError;
use crate::model::{
    CollectorKind, ErrorFinding, LogEntry, MetricRow, MonitoringTarget, Timestamp, TimeWindow,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Version of the JSON layout written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// Error occurrences above which a target is flagged as critical
pub const CRITICAL_ERROR_OCCURRENCES: usize = 100;
/// High-CPU datapoints above which a target is flagged as critical
pub const CRITICAL_HIGH_CPU_POINTS: usize = 10;
/// Utilization percentage considered high for CPU and memory
pub const HIGH_UTILIZATION_PERCENT: f64 = 80.0;

/// Terminal state of one collector for one target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CollectorStatus {
    Succeeded { items: usize },
    Failed { reason: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectorRecord {
    pub kind: CollectorKind,
    pub status: CollectorStatus,
    /// Attempts consumed, including the final one
    pub attempts: u32,
}

impl CollectorRecord {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, CollectorStatus::Failed { .. })
    }
}

/// What happened to AI annotation for a target
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnnotationStatus {
    /// AI analysis switched off for the run
    #[default]
    Disabled,
    /// No findings, or fewer error occurrences than the configured minimum
    NotRequired,
    Applied { annotated: usize },
    Failed { reason: String },
}

/// Stored widget image, path relative to the environment directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenshotRef {
    pub widget_name: String,
    pub path: String,
}

/// Everything collected for one target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetReport {
    pub target: MonitoringTarget,
    /// One record per scheduled collector, in scheduling order
    pub collectors: Vec<CollectorRecord>,
    pub screenshots: Vec<ScreenshotRef>,
    pub metric_rows: Vec<MetricRow>,
    /// Relative paths of the per-group metric CSV files
    pub metric_files: Vec<String>,
    pub log_entries: Vec<LogEntry>,
    /// Relative path of the error log CSV, if logs were collected
    pub log_file: Option<String>,
    /// Log entries grouped by error signature, most frequent first
    pub findings: Vec<ErrorFinding>,
    pub annotation: AnnotationStatus,
    /// Database metric rows; group is the instance id
    #[serde(default)]
    pub rds_rows: Vec<MetricRow>,
    /// Relative paths of the per-metric database CSV files
    #[serde(default)]
    pub rds_files: Vec<String>,
}

/// Error signature seen on more than one target of the same service
#[derive(Debug, Clone, PartialEq)]
pub struct SharedPattern {
    pub service: String,
    pub signature: String,
    pub error_type: String,
    /// Target names in report order
    pub targets: Vec<String>,
    pub occurrences: usize,
}

/// Derived view of notable metric datapoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricOverview {
    pub high_cpu: Vec<MetricRow>,
    pub high_memory: Vec<MetricRow>,
    pub performance_issues: Vec<MetricRow>,
}

impl TargetReport {
    pub fn new(target: MonitoringTarget) -> Self {
        Self {
            target,
            collectors: Vec::new(),
            screenshots: Vec::new(),
            metric_rows: Vec::new(),
            metric_files: Vec::new(),
            log_entries: Vec::new(),
            log_file: None,
            findings: Vec::new(),
            annotation: AnnotationStatus::Disabled,
            rds_rows: Vec::new(),
            rds_files: Vec::new(),
        }
    }

    /// Report in which every listed collector failed with the same reason
    pub fn failed(
        target: MonitoringTarget,
        kinds: &[CollectorKind],
        reason: &str,
        retryable: bool,
    ) -> Self {
        let mut report = Self::new(target);
        report.collectors = kinds
            .iter()
            .map(|kind| CollectorRecord {
                kind: *kind,
                status: CollectorStatus::Failed {
                    reason: reason.to_string(),
                    retryable,
                },
                attempts: 0,
            })
            .collect();
        report
    }

    pub fn record(&self, kind: CollectorKind) -> Option<&CollectorRecord> {
        self.collectors.iter().find(|r| r.kind == kind)
    }

    pub fn failed_collectors(&self) -> impl Iterator<Item = &CollectorRecord> {
        self.collectors.iter().filter(|r| r.is_failed())
    }

    /// Total log entries represented by the findings
    pub fn error_occurrences(&self) -> usize {
        self.findings.iter().map(|f| f.count).sum()
    }

    pub fn metric_overview(&self) -> MetricOverview {
        let mut overview = MetricOverview::default();
        for row in &self.metric_rows {
            let metric = row.metric.to_lowercase();
            let group = row.group.to_lowercase();
            // The metric name decides first; "Max CPU and Memory" mentions both
            let is_cpu =
                metric.contains("cpu") || (!metric.contains("memory") && group.contains("cpu"));
            let is_memory =
                metric.contains("memory") || (!metric.contains("cpu") && group.contains("memory"));

            if is_cpu && row.value > HIGH_UTILIZATION_PERCENT {
                overview.high_cpu.push(row.clone());
            } else if is_memory && row.value > HIGH_UTILIZATION_PERCENT {
                overview.high_memory.push(row.clone());
            } else if ["performance", "latency", "duration", "response"]
                .iter()
                .any(|n| group.contains(n))
            {
                overview.performance_issues.push(row.clone());
            }
        }
        overview
    }

    /// Reasons this target deserves attention, empty when healthy
    pub fn critical_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let errors = self.error_occurrences();
        if errors > CRITICAL_ERROR_OCCURRENCES {
            issues.push(format!("{} error occurrences", errors));
        }
        let high_cpu = self.metric_overview().high_cpu.len();
        if high_cpu > CRITICAL_HIGH_CPU_POINTS {
            issues.push(format!("{} high-CPU datapoints", high_cpu));
        }
        for record in self.failed_collectors() {
            issues.push(format!("{} collection failed", record.kind));
        }
        issues
    }

    /// Every collector succeeded and no error was logged in the window
    pub fn is_healthy(&self) -> bool {
        self.failed_collectors().next().is_none() && self.error_occurrences() == 0
    }
}

/// Per-kind collector outcome counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindTotals {
    pub succeeded: usize,
    pub failed: usize,
}

/// Statistics derived from the target reports
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub target_count: usize,
    pub totals: BTreeMap<CollectorKind, KindTotals>,
    /// Failed collector records across all targets
    pub failure_count: usize,
    /// Keys of targets with at least one failed collector
    pub failed_targets: Vec<String>,
    pub screenshots: usize,
    pub metric_rows: usize,
    #[serde(default)]
    pub rds_rows: usize,
    pub log_entries: usize,
    pub error_occurrences: usize,
    pub unique_error_patterns: usize,
    pub annotation_failures: usize,
    #[serde(default)]
    pub healthy_targets: usize,
}

impl RunSummary {
    pub fn from_targets(targets: &[TargetReport]) -> Self {
        let mut summary = RunSummary {
            target_count: targets.len(),
            ..RunSummary::default()
        };

        for report in targets {
            for record in &report.collectors {
                let totals = summary.totals.entry(record.kind).or_default();
                if record.is_failed() {
                    totals.failed += 1;
                    summary.failure_count += 1;
                } else {
                    totals.succeeded += 1;
                }
            }
            if report.failed_collectors().next().is_some() {
                summary.failed_targets.push(report.target.key());
            }
            summary.screenshots += report.screenshots.len();
            summary.metric_rows += report.metric_rows.len();
            summary.rds_rows += report.rds_rows.len();
            summary.log_entries += report.log_entries.len();
            summary.error_occurrences += report.error_occurrences();
            summary.unique_error_patterns += report.findings.len();
            if matches!(report.annotation, AnnotationStatus::Failed { .. }) {
                summary.annotation_failures += 1;
            }
            if report.is_healthy() {
                summary.healthy_targets += 1;
            }
        }

        summary
    }
}

/// Identity and timing of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub run_id: String,
    pub environment: String,
    pub generated_at: Timestamp,
    pub window: TimeWindow,
}

impl RunHeader {
    /// Header with a fresh run id, stamped now
    pub fn new(environment: &str, window: TimeWindow) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            environment: environment.to_string(),
            generated_at: Utc::now(),
            window,
        }
    }
}

/// Consolidated result of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub format_version: u32,
    pub run_id: String,
    pub environment: String,
    pub generated_at: Timestamp,
    pub window: TimeWindow,
    pub targets: Vec<TargetReport>,
    pub summary: RunSummary,
}

/// Fold ordered target reports into a run report
///
/// Pure: the same targets and header always produce the same report.
pub fn merge(targets: Vec<TargetReport>, header: RunHeader) -> RunReport {
    let summary = RunSummary::from_targets(&targets);
    RunReport {
        format_version: FORMAT_VERSION,
        run_id: header.run_id,
        environment: header.environment,
        generated_at: header.generated_at,
        window: header.window,
        targets,
        summary,
    }
}

impl RunReport {
    /// Load a previously written JSON report
    ///
    /// The stored summary is not trusted; use `regenerate` to obtain a
    /// report whose summary matches its targets.
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn header(&self) -> RunHeader {
        RunHeader {
            run_id: self.run_id.clone(),
            environment: self.environment.clone(),
            generated_at: self.generated_at,
            window: self.window,
        }
    }

    /// Re-merge the stored targets
    ///
    /// Without an explicit header the report keeps its own identity.
    pub fn regenerate(self, header: Option<RunHeader>) -> RunReport {
        let header = header.unwrap_or_else(|| self.header());
        merge(self.targets, header)
    }

    /// Whether the stored summary matches a recomputation
    pub fn is_consistent(&self) -> bool {
        self.summary == RunSummary::from_targets(&self.targets)
    }

    /// `(service, targets)` groups in report order
    pub fn by_service(&self) -> Vec<(&str, Vec<&TargetReport>)> {
        let mut groups: Vec<(&str, Vec<&TargetReport>)> = Vec::new();
        for report in &self.targets {
            let service = report.target.service_id.as_str();
            match groups.iter_mut().find(|(s, _)| *s == service) {
                Some((_, members)) => members.push(report),
                None => groups.push((service, vec![report])),
            }
        }
        groups
    }

    /// Signatures shared by at least two targets of one service
    ///
    /// Ordered by service (report order), then by how many targets share the
    /// signature, then by signature.
    pub fn shared_error_patterns(&self) -> Vec<SharedPattern> {
        let mut shared = Vec::new();
        for (service, members) in self.by_service() {
            let mut by_signature: BTreeMap<&str, SharedPattern> = BTreeMap::new();
            for report in members {
                for finding in &report.findings {
                    let entry = by_signature
                        .entry(finding.signature.as_str())
                        .or_insert_with(|| SharedPattern {
                            service: service.to_string(),
                            signature: finding.signature.clone(),
                            error_type: finding.error_type.clone(),
                            targets: Vec::new(),
                            occurrences: 0,
                        });
                    if !entry.targets.contains(&report.target.name) {
                        entry.targets.push(report.target.name.clone());
                    }
                    entry.occurrences += finding.count;
                }
            }
            let mut patterns: Vec<SharedPattern> = by_signature
                .into_values()
                .filter(|p| p.targets.len() >= 2)
                .collect();
            patterns.sort_by(|a, b| b.targets.len().cmp(&a.targets.len()));
            shared.extend(patterns);
        }
        shared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn target(service: &str, name: &str) -> MonitoringTarget {
        MonitoringTarget {
            service_id: service.to_string(),
            name: name.to_string(),
            region: "us-west-2".to_string(),
            dashboard_id: format!("{}-{}", service, name),
            log_group_id: None,
            credential_profile: None,
            rds_instance: None,
        }
    }

    fn header() -> RunHeader {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        RunHeader {
            run_id: "run-1".to_string(),
            environment: "prod".to_string(),
            generated_at: now,
            window: TimeWindow::from_days_back(2, 1, now),
        }
    }

    fn row(group: &str, metric: &str, value: f64) -> MetricRow {
        MetricRow {
            group: group.to_string(),
            metric: metric.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 8, 10, 0, 0).unwrap(),
            value,
        }
    }

    fn finding(signature: &str, count: usize) -> ErrorFinding {
        ErrorFinding {
            signature: signature.to_string(),
            error_type: "Unknown".to_string(),
            location: "Unknown".to_string(),
            log_excerpt: signature.to_string(),
            count,
            category: None,
            ai_summary: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut a = TargetReport::new(target("SRM", "NA1"));
        a.collectors = vec![
            CollectorRecord {
                kind: CollectorKind::Screenshot,
                status: CollectorStatus::Succeeded { items: 1 },
                attempts: 1,
            },
            CollectorRecord {
                kind: CollectorKind::Logs,
                status: CollectorStatus::Succeeded { items: 3 },
                attempts: 1,
            },
        ];
        a.screenshots.push(ScreenshotRef {
            widget_name: "Errors".to_string(),
            path: "SRM/NA1/screenshots/Errors.png".to_string(),
        });
        a.findings = vec![finding("x", 2), finding("y", 1)];

        let b = TargetReport::failed(
            target("SRM", "EU1"),
            &[CollectorKind::Metrics],
            "timeout",
            true,
        );
        let mut b = b;
        b.annotation = AnnotationStatus::Failed {
            reason: "Request timeout".to_string(),
        };

        let report = merge(vec![a, b], header());
        let s = &report.summary;
        assert_eq!(s.target_count, 2);
        assert_eq!(s.failure_count, 1);
        assert_eq!(s.failed_targets, vec!["SRM/EU1"]);
        assert_eq!(s.screenshots, 1);
        assert_eq!(s.error_occurrences, 3);
        assert_eq!(s.unique_error_patterns, 2);
        assert_eq!(s.annotation_failures, 1);
        assert_eq!(
            s.totals[&CollectorKind::Metrics],
            KindTotals {
                succeeded: 0,
                failed: 1
            }
        );
        assert_eq!(s.totals[&CollectorKind::Logs].succeeded, 1);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_metric_overview() {
        let mut report = TargetReport::new(target("SRM", "NA1"));
        report.metric_rows = vec![
            row("Max CPU and Memory", "CPUUtilization", 91.0),
            row("Max CPU and Memory", "CPUUtilization", 75.0),
            row("Max CPU and Memory", "MemoryUtilization", 85.0),
            row("SRM performance in MS", "CreateLatency", 812.0),
            row("SRM MS Errors", "Errors", 4.0),
        ];
        let overview = report.metric_overview();
        assert_eq!(overview.high_cpu.len(), 1);
        assert_eq!(overview.high_memory.len(), 1);
        assert_eq!(overview.performance_issues.len(), 1);
    }

    #[test]
    fn test_critical_issues() {
        let mut report = TargetReport::new(target("SRM", "NA1"));
        assert!(report.critical_issues().is_empty());
        report.findings = vec![finding("x", 101)];
        report.metric_rows = (0..11)
            .map(|_| row("Max CPU and Memory", "CPUUtilization", 95.0))
            .collect();
        report.collectors.push(CollectorRecord {
            kind: CollectorKind::Logs,
            status: CollectorStatus::Failed {
                reason: "AccessDenied".to_string(),
                retryable: false,
            },
            attempts: 1,
        });
        let issues = report.critical_issues();
        assert_eq!(issues.len(), 3);
        assert!(issues[0].contains("101"));
    }

    #[test]
    fn test_healthy_requires_success_and_no_errors() {
        let mut report = TargetReport::new(target("SRM", "NA1"));
        report.collectors.push(CollectorRecord {
            kind: CollectorKind::Metrics,
            status: CollectorStatus::Succeeded { items: 0 },
            attempts: 1,
        });
        assert!(report.is_healthy());

        let mut with_errors = report.clone();
        with_errors.findings = vec![finding("x", 1)];
        assert!(!with_errors.is_healthy());

        let failed = TargetReport::failed(target("SRM", "EU1"), &[CollectorKind::Rds], "x", false);
        assert!(!failed.is_healthy());

        let run = merge(vec![report, with_errors, failed], header());
        assert_eq!(run.summary.healthy_targets, 1);
    }

    #[test]
    fn test_shared_error_patterns_across_regions() {
        let mut na = TargetReport::new(target("SRM", "NA1"));
        na.findings = vec![finding("TimeoutException: upstream", 5), finding("only-na", 2)];
        let mut eu = TargetReport::new(target("SRM", "EU1"));
        eu.findings = vec![finding("TimeoutException: upstream", 3)];
        let mut other = TargetReport::new(target("SRA", "NA1"));
        other.findings = vec![finding("only-na", 9)];

        let report = merge(vec![other, na, eu], header());
        let shared = report.shared_error_patterns();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].service, "SRM");
        assert_eq!(shared[0].signature, "TimeoutException: upstream");
        assert_eq!(shared[0].targets, vec!["NA1", "EU1"]);
        assert_eq!(shared[0].occurrences, 8);
    }

    #[test]
    fn test_rds_rows_counted_and_optional_in_json() {
        let mut report = TargetReport::new(target("SRM", "NA1"));
        report.rds_rows = vec![row("srm-storage", "CPUUtilization", 72.0)];
        let run = merge(vec![report], header());
        assert_eq!(run.summary.rds_rows, 1);

        let mut json = serde_json::to_value(&run).unwrap();
        let stored = json["targets"][0].as_object_mut().unwrap();
        stored.remove("rds_rows");
        stored.remove("rds_files");
        let loaded: RunReport = serde_json::from_value(json).unwrap();
        assert!(loaded.targets[0].rds_rows.is_empty());
        assert!(!loaded.is_consistent());
    }

    #[test]
    fn test_json_shape() {
        let report = merge(
            vec![TargetReport::failed(
                target("SRM", "NA1"),
                &[CollectorKind::Logs],
                "AccessDenied",
                false,
            )],
            header(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["format_version"], 1);
        assert_eq!(json["targets"][0]["collectors"][0]["kind"], "logs");
        assert_eq!(json["targets"][0]["collectors"][0]["status"]["state"], "failed");
        assert_eq!(json["targets"][0]["annotation"]["state"], "disabled");
        assert_eq!(json["summary"]["totals"]["logs"]["failed"], 1);
    }

    #[test]
    fn test_load_and_regenerate() {
        let mut report = merge(vec![TargetReport::new(target("SRM", "NA1"))], header());
        // Tamper with the stored summary
        report.summary.failure_count = 42;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, serde_json::to_string(&report).unwrap()).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert!(!loaded.is_consistent());
        let regenerated = loaded.regenerate(None);
        assert!(regenerated.is_consistent());
        assert_eq!(regenerated.run_id, "run-1");
        assert_eq!(regenerated.summary.failure_count, 0);

        let fresh = regenerated.regenerate(Some(RunHeader::new("prod", header().window)));
        assert_ne!(fresh.run_id, "run-1");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            RunReport::load(&dir.path().join("missing.json")),
            Err(ReportError::Read(_))
        ));
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ nope").unwrap();
        assert!(matches!(RunReport::load(&bad), Err(ReportError::Parse(_))));
    }

    #[test]
    fn test_by_service_keeps_order() {
        let report = merge(
            vec![
                TargetReport::new(target("SRA", "NA1")),
                TargetReport::new(target("SRM", "EU1")),
                TargetReport::new(target("SRM", "NA1")),
            ],
            header(),
        );
        let groups = report.by_service();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "SRA");
        assert_eq!(groups[1].1.len(), 2);
    }

    /// Random target report with arbitrary collector outcomes and findings
    #[derive(Debug, Clone)]
    struct ArbitraryTarget(TargetReport);

    impl Arbitrary for ArbitraryTarget {
        fn arbitrary(g: &mut Gen) -> Self {
            let names = ["NA1", "EU1", "AP1", "AU1"];
            let services = ["SRM", "SRA"];
            let mut report = TargetReport::new(target(
                g.choose(&services).copied().unwrap_or("SRM"),
                g.choose(&names).copied().unwrap_or("NA1"),
            ));
            for kind in CollectorKind::ALL {
                if bool::arbitrary(g) {
                    let status = if bool::arbitrary(g) {
                        CollectorStatus::Succeeded {
                            items: usize::arbitrary(g) % 50,
                        }
                    } else {
                        CollectorStatus::Failed {
                            reason: String::arbitrary(g),
                            retryable: bool::arbitrary(g),
                        }
                    };
                    report.collectors.push(CollectorRecord {
                        kind,
                        status,
                        attempts: u32::arbitrary(g) % 4,
                    });
                }
            }
            let finding_count = usize::arbitrary(g) % 5;
            report.findings = (0..finding_count)
                .map(|i| finding(&format!("sig-{}", i), 1 + usize::arbitrary(g) % 20))
                .collect();
            if bool::arbitrary(g) {
                report.annotation = AnnotationStatus::Failed {
                    reason: "Request timeout".to_string(),
                };
            }
            ArbitraryTarget(report)
        }
    }

    #[quickcheck]
    fn prop_merge_is_idempotent(targets: Vec<ArbitraryTarget>) -> bool {
        let targets: Vec<TargetReport> = targets.into_iter().map(|t| t.0).collect();
        let first = merge(targets.clone(), header());
        let second = merge(targets, header());
        first == second && first.clone().regenerate(None) == first
    }

    #[quickcheck]
    fn prop_summary_is_derivable(targets: Vec<ArbitraryTarget>) -> bool {
        let targets: Vec<TargetReport> = targets.into_iter().map(|t| t.0).collect();
        let count = targets.len();
        let report = merge(targets, header());
        report.targets.len() == count
            && report.summary == RunSummary::from_targets(&report.targets)
            && report.summary.failure_count
                == report
                    .summary
                    .totals
                    .values()
                    .map(|t| t.failed)
                    .sum::<usize>()
    }

    #[quickcheck]
    fn prop_json_roundtrip_preserves_summary(targets: Vec<ArbitraryTarget>) -> bool {
        let targets: Vec<TargetReport> = targets.into_iter().map(|t| t.0).collect();
        let report = merge(targets, header());
        let text = serde_json::to_string(&report).unwrap();
        let loaded: RunReport = serde_json::from_str(&text).unwrap();
        loaded.is_consistent() && loaded.summary == report.summary
    }
}
