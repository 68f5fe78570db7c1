/// Error types for collection, annotation and reporting
pub mod error;

/// Configuration management
pub mod config;

/// Core value types shared across the pipeline
pub mod model;

/// Resolution of configured services into monitoring targets
pub mod catalog;

/// Redaction of personal and tenant data from log text
pub mod anonymizer;

/// Evidence collectors backed by the AWS CLI
pub mod collectors;

/// Error classification and AI annotation
pub mod ai;

/// Concurrent, retrying collection across targets
pub mod orchestrator;

/// On-disk layout of evidence files
pub mod artifacts;

/// Consolidated report model and renderers
pub mod report;

/// Collect and consolidate run modes
pub mod pipeline;

// Re-export commonly used types
pub use error::{
    AnnotationError, CollectorError, ConfigError, RenderError, ReportError, StoreError,
};
