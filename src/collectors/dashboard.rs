use super::aws_cli::{AwsApi, AwsRequest};
use crate::error::CollectorError;
use crate::model::MonitoringTarget;
use serde_json::Value;

/// Metric widget of a CloudWatch dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub title: Option<String>,
    /// Raw metric definitions as stored in the dashboard body
    pub metrics: Vec<Value>,
}

/// One resolved metric definition of a widget
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: Vec<(String, String)>,
    /// Label from the options object, falling back to the metric name
    pub label: String,
}

/// Fetch and parse the target's dashboard
pub async fn fetch_widgets(
    api: &dyn AwsApi,
    target: &MonitoringTarget,
) -> Result<Vec<Widget>, CollectorError> {
    let request = AwsRequest::new("cloudwatch", "get-dashboard", target)
        .arg("--dashboard-name", target.dashboard_id.clone());
    let response = api.call(&request).await?;
    let body = response
        .get("DashboardBody")
        .and_then(Value::as_str)
        .ok_or_else(|| CollectorError::ParseError("response has no DashboardBody".to_string()))?;
    parse_dashboard_body(body)
}

/// Extract metric widgets from a dashboard body document
pub fn parse_dashboard_body(body: &str) -> Result<Vec<Widget>, CollectorError> {
    let doc: Value = serde_json::from_str(body)
        .map_err(|e| CollectorError::ParseError(format!("invalid dashboard body: {}", e)))?;

    let widgets = doc
        .get("widgets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    Ok(widgets
        .iter()
        .filter_map(|w| w.get("properties"))
        .map(|props| Widget {
            title: props
                .get("title")
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics: props
                .get("metrics")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
        .collect())
}

/// Resolve a widget's metric arrays into concrete definitions
///
/// Dashboard arrays are `[namespace, metric, key, value, ..., {options}]`
/// where `"."` repeats the entry at the same position of the previous array.
/// Expression-only entries (no leading string) are skipped.
pub fn resolve_metric_definitions(metrics: &[Value]) -> Vec<MetricDefinition> {
    let mut previous: Vec<String> = Vec::new();
    let mut definitions = Vec::new();

    for entry in metrics {
        let Some(items) = entry.as_array() else {
            continue;
        };

        let mut parts: Vec<String> = Vec::new();
        let mut label = None;
        for (pos, item) in items.iter().enumerate() {
            match item {
                Value::String(s) if s == "." => match previous.get(pos) {
                    Some(prev) => parts.push(prev.clone()),
                    None => parts.push(s.clone()),
                },
                Value::String(s) => parts.push(s.clone()),
                Value::Object(options) => {
                    label = options
                        .get("label")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    break;
                }
                _ => break,
            }
        }

        if parts.len() < 2 {
            continue;
        }

        let dimensions = parts[2..]
            .chunks_exact(2)
            .filter(|pair| pair[0] != "." && pair[1] != ".")
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();

        definitions.push(MetricDefinition {
            namespace: parts[0].clone(),
            metric_name: parts[1].clone(),
            dimensions,
            label: label.unwrap_or_else(|| parts[1].clone()),
        });
        previous = parts;
    }

    definitions
}
