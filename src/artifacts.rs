//! On-disk layout of evidence and report artifacts
//!
//! Everything lives under the environment directory:
//! `<service>/<target>/screenshots/*.png`, `<service>/<target>/csv_data/*.csv`
//! and `<service>/<target>/csv_data/rds/*.csv`.
//! Paths handed back to callers are relative to that directory and always use `/`.

use crate::error::StoreError;
use crate::model::{ErrorFinding, LogEntry, MetricRow, MonitoringTarget, WidgetImage};
use crate::report::ScreenshotRef;
use log::debug;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

const SCREENSHOT_DIR: &str = "screenshots";
const CSV_DIR: &str = "csv_data";
const RDS_DIR: &str = "csv_data/rds";
const ERROR_LOG_FILE: &str = "error_logs.csv";
const FINDINGS_FILE: &str = "classified_errors.csv";

/// Writes evidence files for targets of one environment
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

/// Turn an arbitrary widget or group title into a safe file stem
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Directory segments `(service, target)` a target's evidence is stored under
///
/// Two targets with equal segments would share a directory, so the catalog
/// refuses to resolve both.
pub fn target_segments(target: &MonitoringTarget) -> (String, String) {
    (
        sanitize_file_name(&target.service_id),
        sanitize_file_name(&target.name),
    )
}

/// Reserve `stem.ext`, suffixing `_2`, `_3`, ... on collisions
fn unique_name(used: &mut HashSet<String>, stem: &str, ext: &str) -> String {
    let mut candidate = format!("{}.{}", stem, ext);
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}_{}.{}", stem, n, ext);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn target_dir(&self, target: &MonitoringTarget) -> PathBuf {
        let (service, name) = target_segments(target);
        self.root.join(service).join(name)
    }

    fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn ensure_dir(&self, target: &MonitoringTarget, sub: &str) -> Result<PathBuf, StoreError> {
        let dir = self.target_dir(target).join(sub);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn save_screenshots(
        &self,
        target: &MonitoringTarget,
        images: &[WidgetImage],
    ) -> Result<Vec<ScreenshotRef>, StoreError> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.ensure_dir(target, SCREENSHOT_DIR)?;
        let mut used = HashSet::new();
        let mut refs = Vec::with_capacity(images.len());

        for image in images {
            let file = unique_name(&mut used, &sanitize_file_name(&image.widget_name), "png");
            let path = dir.join(&file);
            fs::write(&path, &image.bytes)?;
            refs.push(ScreenshotRef {
                widget_name: image.widget_name.clone(),
                path: self.relative(&path),
            });
        }

        debug!("Stored {} screenshot(s) for {}", refs.len(), target.key());
        Ok(refs)
    }

    /// One CSV per metric group, in order of first appearance
    pub fn save_metric_rows(
        &self,
        target: &MonitoringTarget,
        rows: &[MetricRow],
    ) -> Result<Vec<String>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.ensure_dir(target, CSV_DIR)?;
        let used = HashSet::from([ERROR_LOG_FILE.to_string(), FINDINGS_FILE.to_string()]);
        self.write_grouped(&dir, rows, used, |row| row.group.clone())
    }

    /// One CSV per database metric, named `<metric>_<instance>.csv`
    pub fn save_rds_rows(
        &self,
        target: &MonitoringTarget,
        rows: &[MetricRow],
    ) -> Result<Vec<String>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.ensure_dir(target, RDS_DIR)?;
        self.write_grouped(&dir, rows, HashSet::new(), |row| {
            format!("{}_{}", row.metric, row.group)
        })
    }

    fn write_grouped<F>(
        &self,
        dir: &Path,
        rows: &[MetricRow],
        mut used: HashSet<String>,
        key: F,
    ) -> Result<Vec<String>, StoreError>
    where
        F: Fn(&MetricRow) -> String,
    {
        let mut groups: Vec<String> = Vec::new();
        for row in rows {
            let group = key(row);
            if !groups.contains(&group) {
                groups.push(group);
            }
        }

        let mut files = Vec::with_capacity(groups.len());
        for group in &groups {
            let file = unique_name(&mut used, &sanitize_file_name(group), "csv");
            let path = dir.join(&file);
            let mut writer = csv::Writer::from_path(&path)?;
            writer.write_record(["metric", "timestamp", "value"])?;
            for row in rows.iter().filter(|r| &key(r) == group) {
                writer.write_record([
                    row.metric.as_str(),
                    row.timestamp.to_rfc3339().as_str(),
                    row.value.to_string().as_str(),
                ])?;
            }
            writer.flush()?;
            files.push(self.relative(&path));
        }
        Ok(files)
    }

    pub fn save_log_entries(
        &self,
        target: &MonitoringTarget,
        entries: &[LogEntry],
    ) -> Result<Option<String>, StoreError> {
        if entries.is_empty() {
            return Ok(None);
        }
        let path = self.ensure_dir(target, CSV_DIR)?.join(ERROR_LOG_FILE);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["timestamp", "log_message"])?;
        for entry in entries {
            writer.write_record([entry.timestamp.to_rfc3339().as_str(), entry.message.as_str()])?;
        }
        writer.flush()?;
        Ok(Some(self.relative(&path)))
    }

    /// Classified error summary next to the raw error log
    pub fn save_findings(
        &self,
        target: &MonitoringTarget,
        findings: &[ErrorFinding],
    ) -> Result<Option<String>, StoreError> {
        if findings.is_empty() {
            return Ok(None);
        }
        let path = self.ensure_dir(target, CSV_DIR)?.join(FINDINGS_FILE);
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "error_type",
            "location",
            "count",
            "category",
            "ai_summary",
            "log_excerpt",
        ])?;
        for finding in findings {
            writer.write_record([
                finding.error_type.as_str(),
                finding.location.as_str(),
                finding.count.to_string().as_str(),
                finding.category.as_deref().unwrap_or(""),
                finding.ai_summary.as_deref().unwrap_or(""),
                finding.log_excerpt.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(Some(self.relative(&path)))
    }
}
