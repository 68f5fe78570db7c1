use super::model::RunReport;
use super::pdf::PdfEngine;
use super::{json, markdown};
use crate::error::RenderError;
use log::{info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Per-format outcome of writing a report
#[derive(Debug)]
pub struct WrittenReport {
    pub json: Result<PathBuf, RenderError>,
    pub markdown: Result<PathBuf, RenderError>,
    /// `None` when PDF generation is switched off
    pub pdf: Option<Result<PathBuf, RenderError>>,
}

impl WrittenReport {
    pub fn all_succeeded(&self) -> bool {
        self.json.is_ok()
            && self.markdown.is_ok()
            && self.pdf.as_ref().map_or(true, |r| r.is_ok())
    }
}

impl WrittenReport {
    fn task_failed(reason: &str, with_pdf: bool) -> Self {
        let failed = || Err(RenderError::Task(reason.to_string()));
        Self {
            json: failed(),
            markdown: failed(),
            pdf: with_pdf.then(failed),
        }
    }
}

/// Writes the JSON, Markdown and optional PDF artifacts of a run
///
/// Each format is written independently; one failing never prevents the
/// others.
pub struct ReportWriter {
    dir: PathBuf,
    pdf: Option<Box<dyn PdfEngine>>,
    /// Directory the stored screenshot paths are relative to, when it is not `dir`
    artifact_root: Option<PathBuf>,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pdf: None,
            artifact_root: None,
        }
    }

    pub fn with_pdf(mut self, engine: Box<dyn PdfEngine>) -> Self {
        self.pdf = Some(engine);
        self
    }

    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// `write` on the blocking pool
    pub async fn write_in_background(self, report: Arc<RunReport>) -> WrittenReport {
        let with_pdf = self.pdf.is_some();
        match tokio::task::spawn_blocking(move || self.write(&report)).await {
            Ok(written) => written,
            Err(e) => {
                warn!("Report writer task failed: {}", e);
                WrittenReport::task_failed(&e.to_string(), with_pdf)
            }
        }
    }

    fn stamp(report: &RunReport) -> String {
        report.generated_at.format("%Y%m%d_%H%M%S").to_string()
    }

    pub fn json_path(&self, report: &RunReport) -> PathBuf {
        self.dir.join(format!(
            "consolidated_monitoring_{}_{}.json",
            report.environment,
            Self::stamp(report)
        ))
    }

    pub fn markdown_path(&self, report: &RunReport) -> PathBuf {
        self.dir.join(format!(
            "consolidated_monitoring_{}_{}.md",
            report.environment,
            Self::stamp(report)
        ))
    }

    pub fn pdf_path(&self, report: &RunReport) -> PathBuf {
        self.dir.join(format!(
            "monitoring_report_{}_{}.pdf",
            report.environment,
            Self::stamp(report)
        ))
    }

    pub fn write(&self, report: &RunReport) -> WrittenReport {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Could not create report directory {}: {}", self.dir.display(), e);
        }

        let json = json::render(report).and_then(|text| {
            let path = self.json_path(report);
            fs::write(&path, text)?;
            Ok(path)
        });
        log_outcome("JSON", &json);

        let link_base = match &self.artifact_root {
            Some(root) => link_base(&self.dir, root),
            None => String::new(),
        };
        let md = markdown::render(report, &link_base);
        let markdown = write_text(&self.markdown_path(report), &md);
        log_outcome("Markdown", &markdown);

        let pdf = self.pdf.as_ref().map(|engine| {
            let path = self.pdf_path(report);
            engine.convert(&md, &self.dir, &path).map(|_| path)
        });
        if let Some(outcome) = &pdf {
            log_outcome("PDF", outcome);
        }

        WrittenReport {
            json,
            markdown,
            pdf,
        }
    }
}

/// Prefix leading from directory `from` to directory `to`, `/`-separated
///
/// Empty when both are the same directory. Falls back to the absolute
/// location of `to` when either path cannot be resolved.
fn link_base(from: &Path, to: &Path) -> String {
    let (Ok(from), Ok(to)) = (from.canonicalize(), to.canonicalize()) else {
        let absolute = std::path::absolute(to).unwrap_or_else(|_| to.to_path_buf());
        return format!("{}/", absolute.display());
    };
    let common = from
        .components()
        .zip(to.components())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = from
        .components()
        .skip(common)
        .map(|_| "..".to_string())
        .collect();
    parts.extend(to.components().skip(common).filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    }));
    if parts.is_empty() {
        String::new()
    } else {
        format!("{}/", parts.join("/"))
    }
}

fn write_text(path: &Path, text: &str) -> Result<PathBuf, RenderError> {
    fs::write(path, text)?;
    Ok(path.to_path_buf())
}

fn log_outcome(format: &str, outcome: &Result<PathBuf, RenderError>) {
    match outcome {
        Ok(path) => info!("{} report written to {}", format, path.display()),
        Err(e) => warn!("{} report skipped: {}", format, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CollectorKind, MonitoringTarget, TimeWindow};
    use crate::report::model::{merge, RunHeader, ScreenshotRef, TargetReport};
    use crate::report::pdf::MockPdfEngine;
    use chrono::{TimeZone, Utc};

    fn report() -> RunReport {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 6, 7, 8).unwrap();
        let target = MonitoringTarget {
            service_id: "SRM".to_string(),
            name: "NA1".to_string(),
            region: "us-west-2".to_string(),
            dashboard_id: "prod-SRM-Dashboard".to_string(),
            log_group_id: None,
            credential_profile: None,
            rds_instance: None,
        };
        merge(
            vec![TargetReport::failed(
                target,
                &[CollectorKind::Metrics],
                "timeout",
                true,
            )],
            RunHeader {
                run_id: "run-1".to_string(),
                environment: "prod".to_string(),
                generated_at: now,
                window: TimeWindow::from_days_back(2, 1, now),
            },
        )
    }

    #[test]
    fn test_file_names() {
        let writer = ReportWriter::new("/out/prod");
        let report = report();
        assert_eq!(
            writer.json_path(&report),
            PathBuf::from("/out/prod/consolidated_monitoring_prod_20240310_060708.json")
        );
        assert_eq!(
            writer.markdown_path(&report),
            PathBuf::from("/out/prod/consolidated_monitoring_prod_20240310_060708.md")
        );
        assert_eq!(
            writer.pdf_path(&report),
            PathBuf::from("/out/prod/monitoring_report_prod_20240310_060708.pdf")
        );
    }

    #[test]
    fn test_pdf_failure_keeps_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockPdfEngine::new();
        engine
            .expect_convert()
            .times(1)
            .returning(|_, _, _| Err(RenderError::EngineFailed("xelatex not found".to_string())));

        let writer = ReportWriter::new(dir.path()).with_pdf(Box::new(engine));
        let report = report();
        let written = writer.write(&report);

        let json_path = written.json.as_ref().unwrap();
        assert!(json_path.exists());
        assert_eq!(RunReport::load(json_path).unwrap(), report);
        assert!(written.markdown.as_ref().unwrap().exists());
        assert!(matches!(
            written.pdf,
            Some(Err(RenderError::EngineFailed(_)))
        ));
        assert!(!writer.pdf_path(&report).exists());
        assert!(!written.all_succeeded());
    }

    #[test]
    fn test_pdf_engine_receives_markdown_and_resource_dir() {
        let dir = tempfile::tempdir().unwrap();
        let expected_dir = dir.path().to_path_buf();
        let mut engine = MockPdfEngine::new();
        engine
            .expect_convert()
            .withf(move |md, resources, output| {
                md.starts_with("# Production Monitoring Report - PROD")
                    && resources.to_path_buf() == expected_dir
                    && output.extension().and_then(|e| e.to_str()) == Some("pdf")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let writer = ReportWriter::new(dir.path()).with_pdf(Box::new(engine));
        let written = writer.write(&report());
        assert!(written.all_succeeded());
    }

    fn report_with_screenshot() -> RunReport {
        let mut report = report();
        report.targets[0].screenshots.push(ScreenshotRef {
            widget_name: "Errors".to_string(),
            path: "SRM/NA1/screenshots/Errors.png".to_string(),
        });
        report
    }

    #[test]
    fn test_links_resolve_from_another_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let evidence = dir.path().join("a").join("prod");
        let shot = evidence.join("SRM/NA1/screenshots/Errors.png");
        fs::create_dir_all(shot.parent().unwrap()).unwrap();
        fs::write(&shot, [0x89, b'P', b'N', b'G']).unwrap();
        let out = dir.path().join("b").join("prod");

        let written = ReportWriter::new(&out)
            .with_artifact_root(&evidence)
            .write(&report_with_screenshot());
        let md = fs::read_to_string(written.markdown.unwrap()).unwrap();
        assert!(md.contains("![Errors](../../a/prod/SRM/NA1/screenshots/Errors.png)"));

        let link = md
            .lines()
            .find_map(|l| l.strip_prefix("![Errors]("))
            .and_then(|l| l.strip_suffix(')'))
            .unwrap();
        assert!(out.join(link).exists());
    }

    #[test]
    fn test_links_unchanged_when_writing_next_to_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let written = ReportWriter::new(dir.path())
            .with_artifact_root(dir.path())
            .write(&report_with_screenshot());
        let md = fs::read_to_string(written.markdown.unwrap()).unwrap();
        assert!(md.contains("![Errors](SRM/NA1/screenshots/Errors.png)"));
    }

    #[tokio::test]
    async fn test_background_write_produces_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = MockPdfEngine::new();
        engine.expect_convert().times(1).returning(|_, _, _| Ok(()));
        let writer = ReportWriter::new(dir.path()).with_pdf(Box::new(engine));

        let written = writer.write_in_background(Arc::new(report())).await;
        assert!(written.all_succeeded());
        assert!(written.json.unwrap().exists());
        assert!(written.pdf.is_some());
    }

    #[test]
    fn test_task_failure_marks_every_format() {
        let written = WrittenReport::task_failed("panicked", true);
        assert!(matches!(written.json, Err(RenderError::Task(_))));
        assert!(matches!(written.markdown, Err(RenderError::Task(_))));
        assert!(matches!(written.pdf, Some(Err(RenderError::Task(_)))));
        assert!(WrittenReport::task_failed("panicked", false).pdf.is_none());
    }

    #[test]
    fn test_without_pdf_engine() {
        let dir = tempfile::tempdir().unwrap();
        let written = ReportWriter::new(dir.path().join("nested")).write(&report());
        assert!(written.pdf.is_none());
        assert!(written.all_succeeded());
    }
}
