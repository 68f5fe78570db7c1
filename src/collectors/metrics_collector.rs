use super::aws_cli::{AwsApi, AwsRequest};
use super::dashboard::{fetch_widgets, resolve_metric_definitions, MetricDefinition};
use super::Collector;
use crate::config::{Config, MetricGroup};
use crate::error::CollectorError;
use crate::model::{CollectionResult, CollectorKind, MetricRow, MonitoringTarget, TimeWindow};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Exports threshold-crossing datapoints of selected dashboard widgets
///
/// For every configured metric group the widget with the matching title is
/// looked up on the target's dashboard; each of its metric definitions
/// becomes one query and only datapoints strictly above the group threshold
/// are kept.
pub struct MetricsCollector {
    api: Arc<dyn AwsApi>,
    groups: Vec<MetricGroup>,
    period_seconds: u32,
}

/// Upper bound on get-metric-data pages fetched for one group
const MAX_PAGES: usize = 50;

/// Subset of the get-metric-data response that is used
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDataResponse {
    #[serde(default)]
    metric_data_results: Vec<MetricDataResult>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricDataResult {
    id: String,
    #[serde(default)]
    timestamps: Vec<String>,
    #[serde(default)]
    values: Vec<f64>,
    /// "Complete", "PartialData" or "InternalError"
    #[serde(default)]
    status_code: Option<String>,
}

impl MetricsCollector {
    pub fn new(api: Arc<dyn AwsApi>, groups: Vec<MetricGroup>, period_seconds: u32) -> Self {
        Self {
            api,
            groups,
            period_seconds,
        }
    }

    pub fn from_config(api: Arc<dyn AwsApi>, config: &Config) -> Self {
        Self::new(
            api,
            config.metrics.groups.clone(),
            config.metrics.period_seconds,
        )
    }

    /// Query id accepted by CloudWatch: starts with a lowercase letter,
    /// only alphanumerics and underscores
    fn query_id(index: usize, metric_name: &str) -> String {
        let sanitized: String = metric_name
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("m{}_{}", index, sanitized)
    }

    fn build_queries(&self, definitions: &[MetricDefinition], stat: &str) -> Value {
        let queries: Vec<Value> = definitions
            .iter()
            .enumerate()
            .map(|(i, def)| {
                let dimensions: Vec<Value> = def
                    .dimensions
                    .iter()
                    .map(|(name, value)| json!({"Name": name, "Value": value}))
                    .collect();
                json!({
                    "Id": Self::query_id(i, &def.metric_name),
                    "MetricStat": {
                        "Metric": {
                            "Namespace": def.namespace,
                            "MetricName": def.metric_name,
                            "Dimensions": dimensions,
                        },
                        "Period": self.period_seconds,
                        "Stat": stat,
                    },
                    "ReturnData": true,
                })
            })
            .collect();
        Value::Array(queries)
    }

    async fn collect_group(
        &self,
        group: &MetricGroup,
        title: &str,
        definitions: &[MetricDefinition],
        target: &MonitoringTarget,
        window: &TimeWindow,
    ) -> Result<Vec<MetricRow>, CollectorError> {
        let queries = self.build_queries(definitions, &group.stat).to_string();
        let mut results = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0;

        while pages < MAX_PAGES {
            let mut request = AwsRequest::new("cloudwatch", "get-metric-data", target)
                .arg("--metric-data-queries", queries.clone())
                .arg("--start-time", window.start.to_rfc3339())
                .arg("--end-time", window.end.to_rfc3339())
                .arg("--scan-by", "TimestampAscending")
                .flag("--no-paginate");
            if let Some(token) = &next_token {
                request = request.arg("--next-token", token.clone());
            }

            let page: MetricDataResponse = serde_json::from_value(self.api.call(&request).await?)
                .map_err(|e| CollectorError::ParseError(format!("invalid metric data: {}", e)))?;
            pages += 1;
            results.extend(page.metric_data_results);
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        if next_token.is_some() {
            warn!(
                "{}: '{}' still had data after {} page(s); rows are incomplete",
                target.key(),
                title,
                pages
            );
        }
        for result in &results {
            if result.status_code.as_deref() == Some("InternalError") {
                warn!(
                    "{}: query {} in '{}' reported an internal error",
                    target.key(),
                    result.id,
                    title
                );
            }
        }

        let mut rows = Vec::new();
        for result in results {
            let label = definitions
                .iter()
                .enumerate()
                .find(|(i, def)| Self::query_id(*i, &def.metric_name) == result.id)
                .map(|(_, def)| def.label.clone())
                .unwrap_or_else(|| result.id.clone());

            for (raw_ts, value) in result.timestamps.iter().zip(result.values.iter()) {
                if *value <= group.threshold {
                    continue;
                }
                let timestamp = DateTime::parse_from_rfc3339(raw_ts)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        CollectorError::ParseError(format!("bad timestamp '{}': {}", raw_ts, e))
                    })?;
                rows.push(MetricRow {
                    group: title.to_string(),
                    metric: label.clone(),
                    timestamp,
                    value: *value,
                });
            }
        }
        Ok(rows)
    }

    async fn gather(
        &self,
        target: &MonitoringTarget,
        window: &TimeWindow,
    ) -> Result<Vec<MetricRow>, CollectorError> {
        let widgets = fetch_widgets(self.api.as_ref(), target).await?;
        let mut rows = Vec::new();

        for group in &self.groups {
            let title = group.title_for(&target.service_id);
            let Some(widget) = widgets.iter().find(|w| w.title.as_deref() == Some(title.as_str()))
            else {
                debug!("No widget titled '{}' on {}", title, target.dashboard_id);
                continue;
            };
            let definitions = resolve_metric_definitions(&widget.metrics);
            if definitions.is_empty() {
                continue;
            }
            let group_rows = self
                .collect_group(group, &title, &definitions, target, window)
                .await?;
            debug!(
                "{}: {} datapoint(s) above {} in '{}'",
                target.key(),
                group_rows.len(),
                group.threshold,
                title
            );
            rows.extend(group_rows);
        }

        info!("Collected {} metric row(s) for {}", rows.len(), target.key());
        Ok(rows)
    }
}

impl Collector for MetricsCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Metrics
    }

    fn collect<'a>(
        &'a self,
        target: &'a MonitoringTarget,
        window: &'a TimeWindow,
    ) -> Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>> {
        Box::pin(async move {
            match self.gather(target, window).await {
                Ok(rows) => CollectionResult::MetricRows(rows),
                Err(e) => e.into(),
            }
        })
    }
}
