use super::aws_cli::{AwsApi, AwsRequest};
use super::dashboard::{fetch_widgets, Widget};
use super::Collector;
use crate::config::{Config, ScreenshotConfig};
use crate::error::CollectorError;
use crate::model::{CollectionResult, CollectorKind, MonitoringTarget, TimeWindow, WidgetImage};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use serde_json::{json, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Renders every metric widget of a target's dashboard to PNG
///
/// A failure on any widget fails the whole collection so the target report
/// never claims a complete set of screenshots when some are missing.
pub struct ScreenshotCollector {
    api: Arc<dyn AwsApi>,
    width: u32,
    height: u32,
    period_seconds: u32,
}

impl ScreenshotCollector {
    pub fn new(api: Arc<dyn AwsApi>, settings: &ScreenshotConfig, period_seconds: u32) -> Self {
        Self {
            api,
            width: settings.width,
            height: settings.height,
            period_seconds,
        }
    }

    pub fn from_config(api: Arc<dyn AwsApi>, config: &Config) -> Self {
        Self::new(api, &config.screenshots, config.metrics.period_seconds)
    }

    /// Widget definition sent to the image API
    fn widget_definition(&self, widget: &Widget, title: &str, target: &MonitoringTarget, window: &TimeWindow) -> Value {
        let stat = if title.contains("Error") { "Sum" } else { "Average" };
        json!({
            "metrics": widget.metrics,
            "view": "timeSeries",
            "stacked": false,
            "stat": stat,
            "period": self.period_seconds,
            "region": target.region,
            "title": title,
            "width": self.width,
            "height": self.height,
            "start": window.start.to_rfc3339(),
            "end": window.end.to_rfc3339(),
        })
    }

    async fn render_widget(
        &self,
        widget: &Widget,
        title: &str,
        target: &MonitoringTarget,
        window: &TimeWindow,
    ) -> Result<WidgetImage, CollectorError> {
        let definition = self.widget_definition(widget, title, target, window);
        let request = AwsRequest::new("cloudwatch", "get-metric-widget-image", target)
            .arg("--metric-widget", definition.to_string());
        let response = self.api.call(&request).await?;

        let encoded = response
            .get("MetricWidgetImage")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CollectorError::ParseError(format!("no image returned for widget '{}'", title))
            })?;
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| {
            CollectorError::ParseError(format!("widget '{}' image is not base64: {}", title, e))
        })?;

        Ok(WidgetImage {
            widget_name: title.to_string(),
            bytes,
        })
    }

    async fn capture(
        &self,
        target: &MonitoringTarget,
        window: &TimeWindow,
    ) -> Result<Vec<WidgetImage>, CollectorError> {
        let widgets = fetch_widgets(self.api.as_ref(), target).await?;
        let mut images = Vec::new();

        for widget in widgets.iter().filter(|w| !w.metrics.is_empty()) {
            let title = widget.title.as_deref().unwrap_or("unknown_metric");
            debug!("Rendering widget '{}' for {}", title, target.key());
            images.push(self.render_widget(widget, title, target, window).await?);
        }

        info!("Captured {} widget image(s) for {}", images.len(), target.key());
        Ok(images)
    }
}

impl Collector for ScreenshotCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Screenshot
    }

    fn collect<'a>(
        &'a self,
        target: &'a MonitoringTarget,
        window: &'a TimeWindow,
    ) -> Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>> {
        Box::pin(async move {
            match self.capture(target, window).await {
                Ok(images) => CollectionResult::Screenshots(images),
                Err(e) => e.into(),
            }
        })
    }
}
