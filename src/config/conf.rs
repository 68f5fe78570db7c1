use crate::error::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `ai.api_key` is not set in the file
pub const API_KEY_ENV: &str = "LAMBDA_API_KEY";

/// Complete run configuration
///
/// Loaded once at startup and treated as immutable afterwards. Every section
/// falls back to its defaults, so an empty file yields a usable (if target-less)
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Scheduling, window and feature switches
    pub run: RunConfig,
    /// Credential profile selection
    pub profiles: ProfilesConfig,
    /// Analysis endpoint settings
    pub ai: AiConfig,
    /// Log extraction settings
    pub logs: LogsConfig,
    /// Metric extraction settings
    pub metrics: MetricsConfig,
    /// Database instance metric settings
    pub rds: RdsConfig,
    /// Dashboard image settings
    pub screenshots: ScreenshotConfig,
    /// Output locations and PDF converter
    pub output: OutputConfig,
    /// Services keyed by id, each mapping target names to their resources
    pub services: BTreeMap<String, BTreeMap<String, TargetEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Environment label used in output paths and report names
    pub environment: String,
    /// Window start, in whole days before today's midnight (UTC)
    pub start_days_back: u32,
    /// Window end, in whole days before today's midnight (UTC)
    pub end_days_back: u32,
    pub enable_ai_analysis: bool,
    pub enable_screenshots: bool,
    pub generate_pdf: bool,
    /// Maximum number of targets collected at the same time
    pub concurrency_limit: usize,
    /// Total attempts for a retryable collector failure
    pub retry_limit: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed backoff (0.0 - 1.0)
    pub retry_jitter: f64,
    pub per_job_timeout_seconds: u64,
    /// Upper bound on the whole collection phase
    pub run_deadline_seconds: u64,
    /// Path or name of the AWS command line client
    pub aws_cli: String,
    /// Restrict the run to these services (empty means all)
    pub services: Vec<String>,
    /// Restrict the run to these target names (empty means all)
    pub targets: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            environment: "prod".to_string(),
            start_days_back: 2,
            end_days_back: 1,
            enable_ai_analysis: true,
            enable_screenshots: true,
            generate_pdf: true,
            concurrency_limit: 4,
            retry_limit: 3,
            retry_base_delay_ms: 2000,
            retry_max_delay_ms: 30_000,
            retry_jitter: 0.25,
            per_job_timeout_seconds: 60,
            run_deadline_seconds: 1200,
            aws_cli: "aws".to_string(),
            services: Vec::new(),
            targets: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn per_job_timeout(&self) -> Duration {
        Duration::from_secs(self.per_job_timeout_seconds)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_seconds)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfilesConfig {
    /// Profile used by targets without their own; `None` means the default chain
    pub default: Option<String>,
}

/// Which annotator implementation to build
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiBackend {
    #[default]
    Lambda,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub backend: AiBackend,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Attempts per annotation call; 1 disables retrying
    pub max_attempts: u32,
    /// Minimum error occurrences on a target before annotation is attempted
    pub min_errors: usize,
    /// Maximum number of distinct findings sent in one request
    pub max_excerpts: usize,
    /// Optional file with free-form application context sent along with excerpts
    pub context_file: Option<PathBuf>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            backend: AiBackend::Lambda,
            endpoint: None,
            api_key: None,
            timeout_seconds: 60,
            max_attempts: 1,
            min_errors: 1,
            max_excerpts: 25,
            context_file: None,
        }
    }
}

impl AiConfig {
    /// The configured key, or the one from the environment
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
    }

    /// Read the application context file, if one is configured
    pub fn load_context(&self) -> Option<String> {
        let path = self.context_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!(
                    "Could not read application context {}: {}",
                    path.display(),
                    e
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogsConfig {
    pub filter_pattern: String,
    pub max_entries: usize,
    pub max_pages: usize,
    pub page_size: usize,
    pub anonymize: bool,
    /// Entries whose message contains any of these are dropped entirely
    pub exclude_patterns: Vec<String>,
    /// Lines containing any of these are removed from a message
    pub noise_patterns: Vec<String>,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            filter_pattern: "ERROR -METRICS_AGG".to_string(),
            max_entries: 10_000,
            max_pages: 100,
            page_size: 1000,
            anonymize: true,
            exclude_patterns: vec!["NotificationDispatcherImpl".to_string()],
            noise_patterns: [
                "shared.restclient",
                "platform.shared",
                "platform.boot",
                "java.base",
                "org.springframework",
                "org.apache",
                "jakarta.servlet",
                "jdk.internal",
                "fasterxml.jackson",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One dashboard widget whose metrics are exported as CSV
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricGroup {
    /// Widget title; `{service}` is replaced by the service id
    pub title: String,
    /// CloudWatch statistic (Sum, Average, Maximum, ...)
    pub stat: String,
    /// Only datapoints strictly above this value are kept
    pub threshold: f64,
}

impl MetricGroup {
    pub fn new(title: &str, stat: &str, threshold: f64) -> Self {
        Self {
            title: title.to_string(),
            stat: stat.to_string(),
            threshold,
        }
    }

    pub fn title_for(&self, service_id: &str) -> String {
        self.title.replace("{service}", service_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub period_seconds: u32,
    pub groups: Vec<MetricGroup>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            period_seconds: 300,
            groups: vec![
                MetricGroup::new("{service} MS Errors", "Sum", 0.0),
                MetricGroup::new("External APis Errors", "Sum", 0.0),
                MetricGroup::new("{service} performance in MS", "Average", 500.0),
                MetricGroup::new("External APIs performance in MS", "Average", 500.0),
                MetricGroup::new("Max CPU and Memory", "Maximum", 70.0),
            ],
        }
    }
}

/// One database instance metric exported as CSV
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RdsMetric {
    /// CloudWatch metric name in the AWS/RDS namespace
    pub name: String,
    pub stat: String,
    /// Only datapoints strictly above this value are kept; `None` keeps all
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl RdsMetric {
    pub fn new(name: &str, stat: &str, threshold: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            stat: stat.to_string(),
            threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RdsConfig {
    /// Collect database metrics for targets that name an instance
    pub enabled: bool,
    pub period_seconds: u32,
    pub metrics: Vec<RdsMetric>,
}

impl Default for RdsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_seconds: 300,
            metrics: vec![
                RdsMetric::new("CPUUtilization", "Average", Some(50.0)),
                RdsMetric::new("DatabaseConnections", "Average", None),
                RdsMetric::new("DeadlocksPerSecond", "Sum", Some(0.0)),
                RdsMetric::new("BlockedProcesses", "Sum", Some(0.0)),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScreenshotConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Markdown to PDF converter executable
    pub pdf_command: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
            pdf_command: "pandoc".to_string(),
        }
    }
}

/// Raw per-target entry as written in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetEntry {
    pub dashboard_id: Option<String>,
    pub region: Option<String>,
    pub log_group_id: Option<String>,
    pub profile: Option<String>,
    /// Database instance identifier, or a fragment of one
    pub rds_instance: Option<String>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read, a parse
    /// error for malformed TOML and `ConfigError::ValidationError` for values
    /// outside their allowed range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    ///
    /// Used when command-line overrides are applied before validation.
    pub fn read_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        debug!(
            "Configuration loaded: {} service(s), environment {}",
            config.services.len(),
            config.run.environment
        );
        Ok(config)
    }

    /// Check value ranges and cross-field requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        let run = &self.run;
        if run.environment.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "run.environment must not be empty".to_string(),
            ));
        }
        if run.concurrency_limit == 0 {
            return Err(ConfigError::ValidationError(
                "run.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if run.retry_limit == 0 {
            return Err(ConfigError::ValidationError(
                "run.retry_limit must be at least 1".to_string(),
            ));
        }
        if run.per_job_timeout_seconds == 0 || run.run_deadline_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&run.retry_jitter) {
            return Err(ConfigError::ValidationError(format!(
                "run.retry_jitter must be between 0 and 1, got {}",
                run.retry_jitter
            )));
        }
        if run.start_days_back == 0 || run.start_days_back < run.end_days_back {
            return Err(ConfigError::ValidationError(format!(
                "invalid window: start_days_back={} end_days_back={}",
                run.start_days_back, run.end_days_back
            )));
        }
        if self.metrics.period_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "metrics.period_seconds must be positive".to_string(),
            ));
        }
        if self.rds.period_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "rds.period_seconds must be positive".to_string(),
            ));
        }
        let logs = &self.logs;
        if logs.max_entries == 0 || logs.max_pages == 0 || logs.page_size == 0 {
            return Err(ConfigError::ValidationError(format!(
                "logs limits must be positive: max_entries={} max_pages={} page_size={}",
                logs.max_entries, logs.max_pages, logs.page_size
            )));
        }
        if self.ai.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "ai.max_attempts must be at least 1".to_string(),
            ));
        }
        if run.enable_ai_analysis && self.ai.backend == AiBackend::Lambda {
            let missing = self
                .ai
                .endpoint
                .as_deref()
                .map(|e| e.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::ValidationError(
                    "ai.endpoint is required when AI analysis is enabled".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Directory that receives evidence and reports for this environment
    pub fn environment_dir(&self) -> PathBuf {
        self.output.directory.join(&self.run.environment)
    }
}
