//! Core value types shared by the catalog, collectors and report model
//!
//! Everything here is created once per run and never mutated after it has been
//! handed to the next stage.

use crate::error::CollectorError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// One (service, region) monitoring unit
///
/// Identity is `(service_id, name)`; two targets with the same identity never
/// coexist in a resolved catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MonitoringTarget {
    /// Service the target belongs to (e.g. "SRM")
    pub service_id: String,
    /// Upper-cased target name, usually a region code such as "NA1"
    pub name: String,
    /// AWS region the resources live in
    pub region: String,
    /// CloudWatch dashboard name
    pub dashboard_id: String,
    /// CloudWatch log group, absent when the target has no log extraction
    pub log_group_id: Option<String>,
    /// Named credential profile; `None` uses the default credential chain
    pub credential_profile: Option<String>,
    /// Database instance identifier or fragment, absent when not monitored
    #[serde(default)]
    pub rds_instance: Option<String>,
}

impl MonitoringTarget {
    /// Human-readable identity, `service/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.service_id, self.name)
    }
}

impl fmt::Display for MonitoringTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.service_id, self.name, self.region)
    }
}

/// Half-open collection window, always `start < end`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    /// Window covering whole days relative to today's UTC midnight
    ///
    /// `start_days_back = 2, end_days_back = 1` covers the two days before
    /// today, ending one second before midnight.
    pub fn from_days_back(start_days_back: u32, end_days_back: u32, now: Timestamp) -> Self {
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        let start = today - Duration::days(i64::from(start_days_back));
        let end = today - Duration::days(i64::from(end_days_back) - 1) - Duration::seconds(1);
        Self { start, end }
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format("%Y-%m-%d %H:%M:%S UTC"),
            self.end.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Kind of evidence a collector produces
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CollectorKind {
    Screenshot,
    Metrics,
    Logs,
    Rds,
}

impl CollectorKind {
    pub const ALL: [CollectorKind; 4] = [
        CollectorKind::Screenshot,
        CollectorKind::Metrics,
        CollectorKind::Logs,
        CollectorKind::Rds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorKind::Screenshot => "screenshot",
            CollectorKind::Metrics => "metrics",
            CollectorKind::Logs => "logs",
            CollectorKind::Rds => "rds",
        }
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered dashboard widget
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetImage {
    pub widget_name: String,
    /// PNG bytes as returned by the image API
    pub bytes: Vec<u8>,
}

/// One metric datapoint that crossed its group threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRow {
    /// Dashboard widget title the metric came from
    pub group: String,
    /// Metric label, usually the metric name
    pub metric: String,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Cleaned and anonymized log event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub message: String,
}

/// Outcome of a single collector call
///
/// Owned by the orchestrator until merged into a target report. Not
/// serializable on purpose: image bytes only ever reach disk as files.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionResult {
    Screenshots(Vec<WidgetImage>),
    MetricRows(Vec<MetricRow>),
    LogEntries(Vec<LogEntry>),
    Failure { reason: String, retryable: bool },
}

impl CollectionResult {
    pub fn failure(reason: impl Into<String>, retryable: bool) -> Self {
        CollectionResult::Failure {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CollectionResult::Failure { .. })
    }

    pub fn is_retryable_failure(&self) -> bool {
        matches!(
            self,
            CollectionResult::Failure {
                retryable: true,
                ..
            }
        )
    }

    /// Number of evidence items carried; zero for failures
    pub fn item_count(&self) -> usize {
        match self {
            CollectionResult::Screenshots(images) => images.len(),
            CollectionResult::MetricRows(rows) => rows.len(),
            CollectionResult::LogEntries(entries) => entries.len(),
            CollectionResult::Failure { .. } => 0,
        }
    }
}

impl From<CollectorError> for CollectionResult {
    fn from(err: CollectorError) -> Self {
        let retryable = err.is_retryable();
        CollectionResult::Failure {
            reason: err.to_string(),
            retryable,
        }
    }
}

/// A group of log entries sharing one error signature
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorFinding {
    /// Normalized `Type: message` used for grouping
    pub signature: String,
    /// Exception type, or "Unknown" when none could be extracted
    pub error_type: String,
    /// `Class.method` of the first stack frame, or "Unknown"
    pub location: String,
    /// First raw message seen for this signature (truncated)
    pub log_excerpt: String,
    /// Number of log entries with this signature
    pub count: usize,
    /// Category assigned by the analysis endpoint
    pub category: Option<String>,
    /// Summary produced by the analysis endpoint
    pub ai_summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_window_covers_previous_two_days() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap();
        let window = TimeWindow::from_days_back(2, 1, now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap());
        assert!(window.start < window.end);
    }

    #[test]
    fn test_single_day_window() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let window = TimeWindow::from_days_back(1, 1, now);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    }

    #[test]
    fn test_collector_kind_order_and_names() {
        let mut kinds = vec![
            CollectorKind::Rds,
            CollectorKind::Logs,
            CollectorKind::Screenshot,
            CollectorKind::Metrics,
        ];
        kinds.sort();
        assert_eq!(kinds, CollectorKind::ALL.to_vec());
        assert_eq!(
            serde_json::to_string(&CollectorKind::Metrics).unwrap(),
            "\"metrics\""
        );
        assert_eq!(serde_json::to_string(&CollectorKind::Rds).unwrap(), "\"rds\"");
    }

    #[test]
    fn test_failure_from_collector_error() {
        let result: CollectionResult = CollectorError::Throttled("Rate exceeded".to_string()).into();
        assert!(result.is_retryable_failure());
        assert_eq!(result.item_count(), 0);

        let result: CollectionResult = CollectorError::NotFound("dashboard".to_string()).into();
        assert!(result.is_failure());
        assert!(!result.is_retryable_failure());
    }

    #[test]
    fn test_item_count() {
        let now = Utc::now();
        let result = CollectionResult::LogEntries(vec![
            LogEntry {
                timestamp: now,
                message: "a".to_string(),
            },
            LogEntry {
                timestamp: now,
                message: "b".to_string(),
            },
        ]);
        assert_eq!(result.item_count(), 2);
        assert!(!result.is_failure());
    }

    #[test]
    fn test_target_key_and_display() {
        let target = MonitoringTarget {
            service_id: "SRM".to_string(),
            name: "NA1".to_string(),
            region: "us-west-2".to_string(),
            dashboard_id: "prod-SRM-Dashboard".to_string(),
            log_group_id: None,
            credential_profile: None,
            rds_instance: None,
        };
        assert_eq!(target.key(), "SRM/NA1");
        assert_eq!(target.to_string(), "SRM/NA1 (us-west-2)");
    }
}
