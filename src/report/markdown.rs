//! Human-readable Markdown rendering of a run report
//!
//! Stored screenshot paths are relative to the environment directory. Image
//! links are those paths behind a prefix that leads from the Markdown file's
//! directory to the environment directory; the prefix is empty when the two
//! coincide.

use super::model::{
    AnnotationStatus, CollectorRecord, CollectorStatus, MetricOverview, RunReport, TargetReport,
};
use crate::model::{CollectorKind, MetricRow};

/// Findings listed per target
const TOP_FINDINGS: usize = 10;
/// Characters of an excerpt shown in the findings table
const EXCERPT_CHARS: usize = 160;

/// Render the report; `link_base` (empty or ending in `/`) is prepended to
/// every image link
pub fn render(report: &RunReport, link_base: &str) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# Production Monitoring Report - {}\n\n",
        report.environment.to_uppercase()
    ));
    md.push_str(&format!("**Environment:** {}  \n", report.environment));
    md.push_str(&format!("**Run ID:** {}  \n", report.run_id));
    md.push_str(&format!(
        "**Generated:** {}  \n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    md.push_str(&format!("**Time window:** {}\n\n", report.window));

    render_collection_summary(&mut md, report);
    render_executive_summary(&mut md, report);
    render_shared_patterns(&mut md, report);

    for (service, targets) in report.by_service() {
        md.push_str(&format!("## Service: {}\n\n", service));
        for target in targets {
            render_target(&mut md, target, link_base);
        }
    }

    md
}

fn render_collection_summary(md: &mut String, report: &RunReport) {
    let summary = &report.summary;
    md.push_str("## Data Collection Summary\n\n");
    md.push_str(&format!("- **Targets:** {}\n", summary.target_count));
    md.push_str(&format!("- **Screenshots captured:** {}\n", summary.screenshots));
    md.push_str(&format!(
        "- **Metric datapoints above threshold:** {}\n",
        summary.metric_rows
    ));
    if summary.rds_rows > 0 {
        md.push_str(&format!(
            "- **Database metric datapoints:** {}\n",
            summary.rds_rows
        ));
    }
    md.push_str(&format!("- **Error log entries:** {}\n\n", summary.log_entries));

    if summary.totals.is_empty() {
        md.push_str("No collectors were scheduled.\n\n");
        return;
    }
    md.push_str("| Collector | Succeeded | Failed |\n");
    md.push_str("|-----------|-----------|--------|\n");
    for (kind, totals) in &summary.totals {
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            kind_title(*kind),
            totals.succeeded,
            totals.failed
        ));
    }
    md.push('\n');
}

fn render_executive_summary(md: &mut String, report: &RunReport) {
    let summary = &report.summary;
    md.push_str("## Executive Summary\n\n");
    if summary.target_count > 0 && summary.healthy_targets == summary.target_count {
        md.push_str("**Overall status:** HEALTHY - no errors or collection failures\n\n");
    } else {
        md.push_str(&format!(
            "**Overall status:** ATTENTION REQUIRED - {} of {} target(s) healthy\n\n",
            summary.healthy_targets, summary.target_count
        ));
    }
    md.push_str(&format!(
        "- **Targets with collection failures:** {} of {}\n",
        summary.failed_targets.len(),
        summary.target_count
    ));
    md.push_str(&format!(
        "- **Error occurrences:** {} across {} unique pattern(s)\n",
        summary.error_occurrences, summary.unique_error_patterns
    ));
    if summary.annotation_failures > 0 {
        md.push_str(&format!(
            "- **AI analysis failures:** {}\n",
            summary.annotation_failures
        ));
    }
    md.push('\n');

    md.push_str("### Critical Issues\n\n");
    let mut any = false;
    for target in &report.targets {
        let issues = target.critical_issues();
        if !issues.is_empty() {
            any = true;
            md.push_str(&format!(
                "- **{}**: {}\n",
                target.target.key(),
                issues.join("; ")
            ));
        }
    }
    if !any {
        md.push_str("No critical issues detected.\n");
    }
    md.push('\n');

    let failures: Vec<(&TargetReport, &CollectorRecord)> = report
        .targets
        .iter()
        .flat_map(|t| t.failed_collectors().map(move |r| (t, r)))
        .collect();
    if !failures.is_empty() {
        md.push_str("### Failed Collections\n\n");
        md.push_str("| Target | Collector | Reason | Retryable |\n");
        md.push_str("|--------|-----------|--------|-----------|\n");
        for (target, record) in failures {
            if let CollectorStatus::Failed { reason, retryable } = &record.status {
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    target.target.key(),
                    kind_title(record.kind),
                    cell(reason),
                    if *retryable { "yes" } else { "no" }
                ));
            }
        }
        md.push('\n');
    }
}

fn render_shared_patterns(md: &mut String, report: &RunReport) {
    let shared = report.shared_error_patterns();
    if shared.is_empty() {
        return;
    }
    md.push_str("## Cross-Region Error Patterns\n\n");
    md.push_str("| Service | Error type | Targets | Occurrences | Signature |\n");
    md.push_str("|---------|------------|---------|-------------|-----------|\n");
    for pattern in shared {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            pattern.service,
            cell(&pattern.error_type),
            pattern.targets.join(", "),
            pattern.occurrences,
            cell(&excerpt(&pattern.signature))
        ));
    }
    md.push('\n');
}

fn render_target(md: &mut String, report: &TargetReport, link_base: &str) {
    let target = &report.target;
    md.push_str(&format!("### {} ({})\n\n", target.name, target.region));
    md.push_str(&format!("Dashboard: `{}`", target.dashboard_id));
    if let Some(group) = &target.log_group_id {
        md.push_str(&format!(" | Log group: `{}`", group));
    }
    if let Some(instance) = &target.rds_instance {
        md.push_str(&format!(" | Database: `{}`", instance));
    }
    md.push_str("\n\n");
    if report.is_healthy() {
        md.push_str("**Status:** HEALTHY - no errors detected\n\n");
    } else {
        md.push_str("**Status:** ATTENTION REQUIRED\n\n");
    }

    md.push_str("#### Collection Status\n\n");
    if report.collectors.is_empty() {
        md.push_str("No collectors applied to this target.\n\n");
    } else {
        md.push_str("| Collector | Status | Attempts |\n");
        md.push_str("|-----------|--------|----------|\n");
        for record in &report.collectors {
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                kind_title(record.kind),
                status_text(&record.status),
                record.attempts
            ));
        }
        md.push('\n');
    }

    render_metrics(md, report);
    render_database(md, report);
    render_errors(md, report);
    render_screenshots(md, report, link_base);
}

fn render_metrics(md: &mut String, report: &TargetReport) {
    md.push_str("#### Metric Overview\n\n");
    match report.record(CollectorKind::Metrics).map(|r| &r.status) {
        None => {
            md.push_str("Metrics were not collected for this target.\n\n");
            return;
        }
        Some(CollectorStatus::Failed { reason, .. }) => {
            md.push_str(&format!("Metric collection failed: {}\n\n", reason));
            return;
        }
        Some(CollectorStatus::Succeeded { .. }) => {}
    }
    if report.metric_rows.is_empty() {
        md.push_str("No datapoints crossed their thresholds in this window.\n\n");
        return;
    }

    let MetricOverview {
        high_cpu,
        high_memory,
        performance_issues,
    } = report.metric_overview();
    md.push_str(&format!(
        "- **High CPU datapoints (>80%):** {}{}\n",
        high_cpu.len(),
        peak_suffix(&high_cpu, "%")
    ));
    md.push_str(&format!(
        "- **High memory datapoints (>80%):** {}{}\n",
        high_memory.len(),
        peak_suffix(&high_memory, "%")
    ));
    md.push_str(&format!(
        "- **Performance datapoints:** {}{}\n\n",
        performance_issues.len(),
        peak_suffix(&performance_issues, " ms")
    ));

    metric_table(md, "Group", &report.metric_rows);
}

fn render_database(md: &mut String, report: &TargetReport) {
    let Some(record) = report.record(CollectorKind::Rds) else {
        return;
    };
    md.push_str("#### Database Metrics\n\n");
    if let CollectorStatus::Failed { reason, .. } = &record.status {
        md.push_str(&format!("Database metric collection failed: {}\n\n", reason));
        return;
    }
    if report.rds_rows.is_empty() {
        md.push_str("No database datapoints crossed their thresholds in this window.\n\n");
        return;
    }
    metric_table(md, "Instance", &report.rds_rows);
}

/// Datapoint count and peak per `(group, metric)`, in order of first appearance
fn metric_table(md: &mut String, group_title: &str, rows: &[MetricRow]) {
    md.push_str(&format!("| {} | Metric | Datapoints | Peak |\n", group_title));
    md.push_str(&format!(
        "|{}|--------|------------|------|\n",
        "-".repeat(group_title.len() + 2)
    ));
    let mut seen: Vec<(&str, &str)> = Vec::new();
    for row in rows {
        let key = (row.group.as_str(), row.metric.as_str());
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        let matching = rows
            .iter()
            .filter(|r| r.group == row.group && r.metric == row.metric);
        let (count, peak) = matching.fold((0, f64::MIN), |(n, max), r| (n + 1, max.max(r.value)));
        md.push_str(&format!(
            "| {} | {} | {} | {:.2} |\n",
            cell(&row.group),
            cell(&row.metric),
            count,
            peak
        ));
    }
    md.push('\n');
}

fn peak_suffix(rows: &[MetricRow], unit: &str) -> String {
    rows.iter()
        .map(|r| r.value)
        .fold(None, |max: Option<f64>, v| Some(max.map_or(v, |m| m.max(v))))
        .map(|peak| format!(" (peak {:.1}{})", peak, unit))
        .unwrap_or_default()
}

fn render_errors(md: &mut String, report: &TargetReport) {
    md.push_str("#### Error Analysis\n\n");
    match report.record(CollectorKind::Logs).map(|r| &r.status) {
        None => {
            md.push_str("No log group configured; error logs were not collected.\n\n");
            return;
        }
        Some(CollectorStatus::Failed { reason, .. }) => {
            md.push_str(&format!("Log collection failed: {}\n\n", reason));
            return;
        }
        Some(CollectorStatus::Succeeded { .. }) => {}
    }
    if report.findings.is_empty() {
        md.push_str("No error entries found in this window.\n\n");
        return;
    }

    md.push_str(&format!("AI analysis: {}\n\n", annotation_text(&report.annotation)));
    md.push_str(&format!(
        "{} error occurrence(s) in {} unique pattern(s).\n\n",
        report.error_occurrences(),
        report.findings.len()
    ));

    md.push_str("| # | Error type | Location | Count | Category | Summary |\n");
    md.push_str("|---|------------|----------|-------|----------|---------|\n");
    for (i, finding) in report.findings.iter().take(TOP_FINDINGS).enumerate() {
        let summary = finding
            .ai_summary
            .as_deref()
            .map(str::to_string)
            .unwrap_or_else(|| excerpt(&finding.log_excerpt));
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            i + 1,
            cell(&finding.error_type),
            cell(&finding.location),
            finding.count,
            cell(finding.category.as_deref().unwrap_or("-")),
            cell(&summary)
        ));
    }
    if report.findings.len() > TOP_FINDINGS {
        md.push_str(&format!(
            "\n{} more pattern(s) not shown.\n",
            report.findings.len() - TOP_FINDINGS
        ));
    }
    md.push('\n');
}

fn render_screenshots(md: &mut String, report: &TargetReport, link_base: &str) {
    if report.screenshots.is_empty() {
        return;
    }
    md.push_str("#### Screenshots\n\n");
    for shot in &report.screenshots {
        md.push_str(&format!("**{}**\n\n", shot.widget_name));
        md.push_str(&format!(
            "![{}]({}{})\n\n",
            shot.widget_name, link_base, shot.path
        ));
    }
}

fn kind_title(kind: CollectorKind) -> &'static str {
    match kind {
        CollectorKind::Screenshot => "Screenshots",
        CollectorKind::Metrics => "Metrics",
        CollectorKind::Logs => "Error logs",
        CollectorKind::Rds => "RDS metrics",
    }
}

fn status_text(status: &CollectorStatus) -> String {
    match status {
        CollectorStatus::Succeeded { items: 0 } => "succeeded, nothing found".to_string(),
        CollectorStatus::Succeeded { items } => format!("succeeded, {} item(s)", items),
        CollectorStatus::Failed {
            reason,
            retryable: true,
        } => format!("**failed** (transient): {}", cell(reason)),
        CollectorStatus::Failed { reason, .. } => format!("**failed**: {}", cell(reason)),
    }
}

fn annotation_text(status: &AnnotationStatus) -> String {
    match status {
        AnnotationStatus::Disabled => "disabled".to_string(),
        AnnotationStatus::NotRequired => "not required".to_string(),
        AnnotationStatus::Applied { annotated } => {
            format!("applied to {} pattern(s)", annotated)
        }
        AnnotationStatus::Failed { reason } => format!("failed ({})", reason),
    }
}

/// Single-line, pipe-safe table cell
fn cell(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

fn excerpt(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= EXCERPT_CHARS {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(EXCERPT_CHARS).collect();
        format!("{}...", cut)
    }
}
