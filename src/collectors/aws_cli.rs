use crate::error::CollectorError;
use crate::model::MonitoringTarget;
use log::debug;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command;

/// One AWS API call, expressed the way the command line client takes it
#[derive(Debug, Clone, PartialEq)]
pub struct AwsRequest {
    /// Service namespace, e.g. "cloudwatch" or "logs"
    pub service: &'static str,
    /// Operation name in CLI form, e.g. "get-dashboard"
    pub operation: &'static str,
    pub region: String,
    pub profile: Option<String>,
    /// Operation-specific arguments
    pub args: Vec<String>,
}

impl AwsRequest {
    pub fn new(service: &'static str, operation: &'static str, target: &MonitoringTarget) -> Self {
        Self {
            service,
            operation,
            region: target.region.clone(),
            profile: target.credential_profile.clone(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: &str, value: impl Into<String>) -> Self {
        self.args.push(name.to_string());
        self.args.push(value.into());
        self
    }

    pub fn flag(mut self, name: &str) -> Self {
        self.args.push(name.to_string());
        self
    }

    /// Full argument vector passed to the executable
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = vec![self.service.to_string(), self.operation.to_string()];
        argv.extend(self.args.iter().cloned());
        argv.push("--region".to_string());
        argv.push(self.region.clone());
        if let Some(profile) = &self.profile {
            argv.push("--profile".to_string());
            argv.push(profile.clone());
        }
        argv.push("--output".to_string());
        argv.push("json".to_string());
        argv
    }
}

/// Boundary to the AWS APIs used by the collectors
///
/// Returns the parsed JSON response or a classified error.
pub trait AwsApi: Send + Sync {
    fn call<'a>(
        &'a self,
        request: &'a AwsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CollectorError>> + Send + 'a>>;
}

/// `AwsApi` implementation that shells out to the AWS command line client
///
/// Each call spawns one process. The child is killed if the future is
/// dropped, so an orchestrator timeout never leaves orphaned processes.
pub struct AwsCli {
    program: String,
}

impl AwsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check whether the executable can be started at all
    pub async fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl AwsApi for AwsCli {
    fn call<'a>(
        &'a self,
        request: &'a AwsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CollectorError>> + Send + 'a>> {
        Box::pin(async move {
            debug!(
                "aws {} {} ({})",
                request.service, request.operation, request.region
            );

            let output = Command::new(&self.program)
                .args(request.command_line())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => CollectorError::SubprocessSpawn(format!(
                        "'{}' not found; is the AWS CLI installed?",
                        self.program
                    )),
                    _ => CollectorError::SubprocessSpawn(format!("{}: {}", self.program, e)),
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(classify_failure(&stderr));
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&stdout).map_err(|e| {
                CollectorError::ParseError(format!(
                    "{} {} returned invalid JSON: {}",
                    request.service, request.operation, e
                ))
            })
        })
    }
}

const THROTTLING: [&str; 5] = [
    "Throttling",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequests",
    "Rate exceeded",
];
const NOT_FOUND: [&str; 4] = [
    "ResourceNotFound",
    "DashboardNotFound",
    "does not exist",
    "NotFoundException",
];
const DENIED: [&str; 7] = [
    "AccessDenied",
    "not authorized",
    "ExpiredToken",
    "InvalidClientTokenId",
    "UnrecognizedClient",
    "could not be found",
    "Unable to locate credentials",
];
const UNAVAILABLE: [&str; 7] = [
    "Could not connect",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalError",
    "Connection reset",
    "Read timeout",
    "Connect timeout",
];

/// Map CLI error output to a collector error
///
/// Throttling and connectivity problems are transient; missing resources and
/// credential problems are not. Anything unrecognised is treated as permanent.
pub fn classify_failure(stderr: &str) -> CollectorError {
    let message = stderr.trim().lines().last().unwrap_or("").trim().to_string();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if contains_any(&THROTTLING) {
        CollectorError::Throttled(message)
    } else if contains_any(&UNAVAILABLE) {
        CollectorError::Unavailable(message)
    } else if contains_any(&NOT_FOUND) {
        CollectorError::NotFound(message)
    } else if contains_any(&DENIED) {
        CollectorError::PermissionDenied(message)
    } else {
        CollectorError::CommandFailed(message)
    }
}
