use super::aws_cli::{AwsApi, AwsRequest};
use super::Collector;
use crate::config::{Config, RdsMetric};
use crate::error::CollectorError;
use crate::model::{CollectionResult, CollectorKind, MetricRow, MonitoringTarget, TimeWindow};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Exports database instance metrics from the AWS/RDS namespace
///
/// The target's `rds_instance` may be an exact identifier or a fragment of
/// one. Rows carry the resolved instance id as their group and the metric
/// name as their label.
pub struct RdsCollector {
    api: Arc<dyn AwsApi>,
    metrics: Vec<RdsMetric>,
    period_seconds: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstances {
    #[serde(default, rename = "DBInstances")]
    db_instances: Vec<DbInstance>,
}

#[derive(Debug, Deserialize)]
struct DbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Map<String, Value>>,
}

/// Pick the instance for `wanted`: an exact match, else the first identifier
/// containing it (case-insensitive)
fn match_instance(wanted: &str, ids: &[String]) -> Option<String> {
    if let Some(exact) = ids.iter().find(|id| id.as_str() == wanted) {
        return Some(exact.clone());
    }
    let needle = wanted.to_lowercase();
    let matches: Vec<&String> = ids
        .iter()
        .filter(|id| id.to_lowercase().contains(&needle))
        .collect();
    if matches.len() > 1 {
        info!(
            "Instance pattern '{}' matched {} instances, using {}",
            wanted,
            matches.len(),
            matches[0]
        );
    }
    matches.first().map(|id| id.to_string())
}

impl RdsCollector {
    pub fn new(api: Arc<dyn AwsApi>, metrics: Vec<RdsMetric>, period_seconds: u32) -> Self {
        Self {
            api,
            metrics,
            period_seconds,
        }
    }

    pub fn from_config(api: Arc<dyn AwsApi>, config: &Config) -> Self {
        Self::new(api, config.rds.metrics.clone(), config.rds.period_seconds)
    }

    async fn resolve_instance(
        &self,
        target: &MonitoringTarget,
        wanted: &str,
    ) -> Result<String, CollectorError> {
        let request = AwsRequest::new("rds", "describe-db-instances", target);
        let response: DescribeInstances = serde_json::from_value(self.api.call(&request).await?)
            .map_err(|e| CollectorError::ParseError(format!("invalid instance list: {}", e)))?;
        let ids: Vec<String> = response.db_instances.into_iter().map(|db| db.id).collect();

        match_instance(wanted, &ids).ok_or_else(|| {
            CollectorError::NotFound(format!(
                "no database instance matching '{}' in {}",
                wanted, target.region
            ))
        })
    }

    async fn collect_metric(
        &self,
        target: &MonitoringTarget,
        instance: &str,
        metric: &RdsMetric,
        window: &TimeWindow,
    ) -> Result<Vec<MetricRow>, CollectorError> {
        let request = AwsRequest::new("cloudwatch", "get-metric-statistics", target)
            .arg("--namespace", "AWS/RDS")
            .arg("--metric-name", metric.name.clone())
            .arg(
                "--dimensions",
                format!("Name=DBInstanceIdentifier,Value={}", instance),
            )
            .arg("--start-time", window.start.to_rfc3339())
            .arg("--end-time", window.end.to_rfc3339())
            .arg("--period", self.period_seconds.to_string())
            .arg("--statistics", metric.stat.clone());

        let response: StatisticsResponse = serde_json::from_value(self.api.call(&request).await?)
            .map_err(|e| CollectorError::ParseError(format!("invalid statistics: {}", e)))?;

        let mut rows = Vec::new();
        for point in response.datapoints {
            let Some(value) = point.get(&metric.stat).and_then(Value::as_f64) else {
                continue;
            };
            if metric.threshold.is_some_and(|limit| value <= limit) {
                continue;
            }
            let raw_ts = point
                .get("Timestamp")
                .and_then(Value::as_str)
                .ok_or_else(|| CollectorError::ParseError("datapoint without Timestamp".into()))?;
            let timestamp = DateTime::parse_from_rfc3339(raw_ts)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| {
                    CollectorError::ParseError(format!("bad timestamp '{}': {}", raw_ts, e))
                })?;
            rows.push(MetricRow {
                group: instance.to_string(),
                metric: metric.name.clone(),
                timestamp,
                value,
            });
        }
        rows.sort_by_key(|row| row.timestamp);
        Ok(rows)
    }

    async fn gather(
        &self,
        target: &MonitoringTarget,
        window: &TimeWindow,
    ) -> Result<Vec<MetricRow>, CollectorError> {
        let wanted = target
            .rds_instance
            .as_deref()
            .ok_or_else(|| CollectorError::NotFound("target has no database instance".into()))?;
        let instance = self.resolve_instance(target, wanted).await?;
        debug!("{}: using database instance {}", target.key(), instance);

        let mut rows = Vec::new();
        for metric in &self.metrics {
            match self.collect_metric(target, &instance, metric, window).await {
                Ok(metric_rows) => rows.extend(metric_rows),
                Err(e) if e.is_retryable() => return Err(e),
                // Engine-specific metrics are absent on other engines
                Err(e) => warn!(
                    "{}: skipping {} for {}: {}",
                    target.key(),
                    metric.name,
                    instance,
                    e
                ),
            }
        }

        info!(
            "Collected {} database metric row(s) for {} ({})",
            rows.len(),
            target.key(),
            instance
        );
        Ok(rows)
    }
}

impl Collector for RdsCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Rds
    }

    fn applies_to(&self, target: &MonitoringTarget) -> bool {
        target.rds_instance.is_some()
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
