/// JSON rendering
pub mod json;

/// Markdown rendering
pub mod markdown;

/// Consolidation model and merge
pub mod model;

/// PDF conversion engines
pub mod pdf;

/// Writes all report formats of a run
pub mod writer;

pub use model::{
    merge, AnnotationStatus, CollectorRecord, CollectorStatus, KindTotals, MetricOverview,
    RunHeader, RunReport, RunSummary, ScreenshotRef, SharedPattern, TargetReport, FORMAT_VERSION,
};
pub use pdf::{PandocEngine, PdfEngine};
pub use writer::{ReportWriter, WrittenReport};
