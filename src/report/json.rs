use super::model::RunReport;
use crate::error::RenderError;

/// Canonical pretty-printed JSON, re-ingestible by `RunReport::load`
pub fn render(report: &RunReport) -> Result<String, RenderError> {
    let mut text = serde_json::to_string_pretty(report)?;
    text.push('\n');
    Ok(text)
}
