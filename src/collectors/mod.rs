use crate::model::{CollectionResult, CollectorKind, MonitoringTarget, TimeWindow};
use std::future::Future;
use std::pin::Pin;

/// AWS command line client adapter
pub mod aws_cli;

/// Dashboard body parsing shared by the screenshot and metric collectors
pub mod dashboard;

/// Dashboard widget screenshots
pub mod screenshot_collector;

/// Threshold-filtered metric export
pub mod metrics_collector;

/// CloudWatch Logs error extraction
pub mod log_collector;

/// Database instance metrics
pub mod rds_collector;

/// Scripted collectors and AWS responses for tests and dry runs
pub mod mock;

pub use aws_cli::{AwsApi, AwsCli, AwsRequest};
pub use log_collector::LogCollector;
pub use metrics_collector::MetricsCollector;
pub use mock::{MockAws, MockCollector, MockStep};
pub use rds_collector::RdsCollector;
pub use screenshot_collector::ScreenshotCollector;

/// Uniform contract for one kind of evidence
///
/// `collect` never fails past its boundary: every error is folded into
/// `CollectionResult::Failure` with a retryable flag the orchestrator acts on.
pub trait Collector: Send + Sync {
    fn kind(&self) -> CollectorKind;

    /// Whether a job should be scheduled for this target at all
    fn applies_to(&self, _target: &MonitoringTarget) -> bool {
        true
    }

    fn collect<'a>(
        &'a self,
        target: &'a MonitoringTarget,
        window: &'a TimeWindow,
    ) -> Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>>;
}
