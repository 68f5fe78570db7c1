/// TOML configuration model and validation
mod conf;

pub use conf::{
    AiBackend, AiConfig, Config, LogsConfig, MetricGroup, MetricsConfig, OutputConfig,
    ProfilesConfig, RdsConfig, RdsMetric, RunConfig, ScreenshotConfig, TargetEntry, API_KEY_ENV,
};
