use super::aws_cli::{AwsApi, AwsRequest};
use super::Collector;
use crate::anonymizer::anonymize;
use crate::config::LogsConfig;
use crate::error::CollectorError;
use crate::model::{CollectionResult, CollectorKind, LogEntry, MonitoringTarget, TimeWindow};
use chrono::DateTime;
use log::{debug, info, warn};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Error-log extractor for CloudWatch Logs
///
/// Pages through `filter-log-events` for the target's log group, then drops
/// excluded entries, strips framework noise lines and anonymizes what is
/// left. Targets without a log group are not applicable.
pub struct LogCollector {
    api: Arc<dyn AwsApi>,
    settings: LogsConfig,
}

/// One page of filter-log-events output
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsPage {
    #[serde(default)]
    events: Vec<RawEvent>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    timestamp: i64,
    #[serde(default)]
    message: String,
}

impl LogCollector {
    pub fn new(api: Arc<dyn AwsApi>, settings: LogsConfig) -> Self {
        Self { api, settings }
    }

    /// Whether the whole entry should be dropped
    fn is_excluded(&self, message: &str) -> bool {
        message.trim().is_empty()
            || self
                .settings
                .exclude_patterns
                .iter()
                .any(|p| message.contains(p.as_str()))
    }

    /// Remove noise lines and collapse whitespace, keeping line structure
    fn clean_message(&self, message: &str) -> String {
        message
            .lines()
            .filter(|line| {
                !self
                    .settings
                    .noise_patterns
                    .iter()
                    .any(|p| line.contains(p.as_str()))
            })
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn process_events(&self, events: Vec<RawEvent>) -> Vec<LogEntry> {
        let mut entries = Vec::with_capacity(events.len());
        for event in events {
            if self.is_excluded(&event.message) {
                continue;
            }
            let cleaned = self.clean_message(&event.message);
            if cleaned.is_empty() {
                continue;
            }
            let Some(timestamp) = DateTime::from_timestamp_millis(event.timestamp) else {
                warn!("Dropping log event with invalid timestamp {}", event.timestamp);
                continue;
            };
            let message = if self.settings.anonymize {
                anonymize(&cleaned)
            } else {
                cleaned
            };
            entries.push(LogEntry { timestamp, message });
        }
        entries
    }

    async fn fetch(
        &self,
        target: &MonitoringTarget,
        log_group: &str,
        window: &TimeWindow,
    ) -> Result<Vec<LogEntry>, CollectorError> {
        let mut raw_events = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0;

        while raw_events.len() < self.settings.max_entries && pages < self.settings.max_pages {
            let remaining = self.settings.max_entries - raw_events.len();
            let mut request = AwsRequest::new("logs", "filter-log-events", target)
                .arg("--log-group-name", log_group)
                .arg("--start-time", window.start_millis().to_string())
                .arg("--end-time", window.end_millis().to_string())
                .arg("--limit", remaining.min(self.settings.page_size).to_string())
                .flag("--no-paginate");
            if !self.settings.filter_pattern.is_empty() {
                request = request.arg("--filter-pattern", self.settings.filter_pattern.clone());
            }
            if let Some(token) = &next_token {
                request = request.arg("--next-token", token.clone());
            }

            let page: FilterLogEventsPage = serde_json::from_value(self.api.call(&request).await?)
                .map_err(|e| CollectorError::ParseError(format!("invalid log events page: {}", e)))?;
            pages += 1;
            debug!(
                "{}: page {} returned {} event(s)",
                target.key(),
                pages,
                page.events.len()
            );

            raw_events.extend(page.events.into_iter().take(remaining));
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        if next_token.is_some() {
            info!(
                "{}: stopped after {} page(s) / {} event(s); more events exist",
                target.key(),
                pages,
                raw_events.len()
            );
        }

        let fetched = raw_events.len();
        let entries = self.process_events(raw_events);
        info!(
            "Collected {} log entr(ies) for {} ({} fetched)",
            entries.len(),
            target.key(),
            fetched
        );
        Ok(entries)
    }
}

impl Collector for LogCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Logs
    }

    fn applies_to(&self, target: &MonitoringTarget) -> bool {
        target.log_group_id.is_some()
    }

    fn collect<'a>(
        &'a self,
        target: &'a MonitoringTarget,
        window: &'a TimeWindow,
    ) -> Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>> {
        Box::pin(async move {
            let Some(log_group) = target.log_group_id.as_deref() else {
                return CollectionResult::failure("target has no log group", false);
            };
            match self.fetch(target, log_group, window).await {
                Ok(entries) => CollectionResult::LogEntries(entries),
                Err(e) => e.into(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::mock::MockAws;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn target(log_group: Option<&str>) -> MonitoringTarget {
        MonitoringTarget {
            service_id: "SRM".to_string(),
            name: "NA1".to_string(),
            region: "us-west-2".to_string(),
            dashboard_id: "prod-SRM-Dashboard".to_string(),
            log_group_id: log_group.map(str::to_string),
            credential_profile: None,
            rds_instance: None,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::from_days_back(2, 1, Utc::now())
    }

    fn page(messages: &[&str], next: Option<&str>) -> Value {
        let events: Vec<Value> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| json!({"timestamp": 1_709_892_000_000i64 + i as i64, "message": m}))
            .collect();
        match next {
            Some(token) => json!({"events": events, "nextToken": token}),
            None => json!({"events": events}),
        }
    }

    fn arg_value(request: &AwsRequest, name: &str) -> Option<String> {
        request
            .args
            .iter()
            .position(|a| a == name)
            .and_then(|i| request.args.get(i + 1).cloned())
    }

    #[test]
    fn test_not_applicable_without_log_group() {
        let collector = LogCollector::new(Arc::new(MockAws::new()), LogsConfig::default());
        assert!(!collector.applies_to(&target(None)));
        assert!(collector.applies_to(&target(Some("srm-logs"))));
    }

    #[test]
    fn test_clean_message_strips_noise() {
        let collector = LogCollector::new(Arc::new(MockAws::new()), LogsConfig::default());
        let raw = "ERROR  com.example.Api   failed\n\tat org.springframework.web.Handler(H.java:1)\n\tat com.example.Api.run(Api.java:9)\n\n";
        assert_eq!(
            collector.clean_message(raw),
            "ERROR com.example.Api failed\nat com.example.Api.run(Api.java:9)"
        );
    }

    #[tokio::test]
    async fn test_pages_until_token_exhausted() {
        let aws = Arc::new(
            MockAws::new()
                .respond("filter-log-events", Ok(page(&["ERROR one", "ERROR two"], Some("t1"))))
                .respond("filter-log-events", Ok(page(&["ERROR three"], None))),
        );
        let collector = LogCollector::new(aws.clone(), LogsConfig::default());

        let result = collector.collect(&target(Some("srm-logs")), &window()).await;
        assert_eq!(result.item_count(), 3);

        let calls = aws.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(arg_value(&calls[0], "--next-token"), None);
        assert_eq!(arg_value(&calls[1], "--next-token").as_deref(), Some("t1"));
        assert_eq!(
            arg_value(&calls[0], "--log-group-name").as_deref(),
            Some("srm-logs")
        );
        assert_eq!(
            arg_value(&calls[0], "--filter-pattern").as_deref(),
            Some("ERROR -METRICS_AGG")
        );
    }

    #[tokio::test]
    async fn test_respects_max_entries_and_pages() {
        let settings = LogsConfig {
            max_entries: 3,
            page_size: 2,
            ..LogsConfig::default()
        };
        let aws = Arc::new(
            MockAws::new()
                .respond("filter-log-events", Ok(page(&["a1", "a2"], Some("t1"))))
                .respond("filter-log-events", Ok(page(&["b1", "b2"], Some("t2")))),
        );
        let collector = LogCollector::new(aws.clone(), settings);
        let result = collector.collect(&target(Some("g")), &window()).await;
        assert_eq!(result.item_count(), 3);
        assert_eq!(aws.calls_to("filter-log-events"), 2);
        assert_eq!(arg_value(&aws.calls()[1], "--limit").as_deref(), Some("1"));

        let settings = LogsConfig {
            max_pages: 1,
            ..LogsConfig::default()
        };
        let aws = Arc::new(
            MockAws::new().respond("filter-log-events", Ok(page(&["a1"], Some("t1")))),
        );
        let collector = LogCollector::new(aws.clone(), settings);
        assert_eq!(collector.collect(&target(Some("g")), &window()).await.item_count(), 1);
        assert_eq!(aws.calls_to("filter-log-events"), 1);
    }

    #[tokio::test]
    async fn test_excludes_and_anonymizes() {
        let aws = Arc::new(MockAws::new().respond(
            "filter-log-events",
            Ok(page(
                &[
                    "ERROR NotificationDispatcherImpl failed to send",
                    "ERROR user jane@example.com rejected",
                    "   ",
                    "at org.apache.catalina.Valve(Valve.java:1)",
                ],
                None,
            )),
        ));
        let collector = LogCollector::new(aws, LogsConfig::default());
        match collector.collect(&target(Some("g")), &window()).await {
            CollectionResult::LogEntries(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].message, "ERROR user [EMAIL_REDACTED] rejected");
                assert_eq!(entries[0].timestamp.timestamp_millis(), 1_709_892_000_001);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_throttling_is_retryable() {
        let aws = Arc::new(MockAws::new().respond(
            "filter-log-events",
            Err(CollectorError::Throttled("Rate exceeded".to_string())),
        ));
        let collector = LogCollector::new(aws, LogsConfig::default());
        let result = collector.collect(&target(Some("g")), &window()).await;
        assert!(result.is_retryable_failure());
    }
}
