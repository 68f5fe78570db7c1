use thiserror::Error;

/// Errors that can occur during configuration loading and target resolution
///
/// These are the only run-fatal errors: they abort before any collection starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("Target {target} is missing required field `{field}`")]
    MissingField { target: String, field: &'static str },

    #[error("No monitoring targets resolved from configuration")]
    EmptyCatalog,

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur inside a collector adapter
///
/// Never escapes an adapter: it is folded into a `CollectionResult::Failure`.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to spawn subprocess: {0}")]
    SubprocessSpawn(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Failed to parse output: {0}")]
    ParseError(String),
}

impl CollectorError {
    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CollectorError::Throttled(_) | CollectorError::Timeout | CollectorError::Unavailable(_)
        )
    }
}

/// Errors that can occur while annotating findings with the analysis endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotationError {
    #[error("Analysis endpoint returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Analysis endpoint throttled the request")]
    Throttled,

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl AnnotationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AnnotationError::Throttled | AnnotationError::Timeout => true,
            AnnotationError::Backend { status, .. } => *status >= 500,
            AnnotationError::HttpError(_) => true,
            AnnotationError::InvalidResponse(_) => false,
        }
    }
}

/// Errors that can occur while rendering or writing one report format
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("PDF engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("PDF engine failed: {0}")]
    EngineFailed(String),

    #[error("Report writer task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while persisting collected evidence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Evidence writer task failed: {0}")]
    Task(String),
}

/// Errors that can occur while loading a stored run report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read report: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse report: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_error_retryability() {
        assert!(CollectorError::Throttled("Rate exceeded".to_string()).is_retryable());
        assert!(CollectorError::Timeout.is_retryable());
        assert!(CollectorError::Unavailable("ServiceUnavailable".to_string()).is_retryable());

        assert!(!CollectorError::NotFound("dashboard".to_string()).is_retryable());
        assert!(!CollectorError::PermissionDenied("AccessDenied".to_string()).is_retryable());
        assert!(!CollectorError::SubprocessSpawn("aws".to_string()).is_retryable());
        assert!(!CollectorError::ParseError("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_annotation_error_retryability() {
        assert!(AnnotationError::Throttled.is_retryable());
        assert!(AnnotationError::Timeout.is_retryable());
        assert!(AnnotationError::Backend {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(!AnnotationError::Backend {
            status: 403,
            message: "forbidden".to_string()
        }
        .is_retryable());
        assert!(!AnnotationError::InvalidResponse("not json".to_string()).is_retryable());
    }

    #[test]
    fn test_missing_field_message() {
        let err = ConfigError::MissingField {
            target: "SRM/NA1".to_string(),
            field: "dashboard_id",
        };
        assert_eq!(
            err.to_string(),
            "Target SRM/NA1 is missing required field `dashboard_id`"
        );
    }
}
