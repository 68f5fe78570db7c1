use super::aws_cli::{AwsApi, AwsRequest};
use super::Collector;
use crate::error::CollectorError;
use crate::model::{CollectionResult, CollectorKind, MonitoringTarget, TimeWindow};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reaction of a `MockCollector`
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return immediately
    Return(CollectionResult),
    /// Sleep, then return (useful for exercising timeouts)
    Delay(Duration, CollectionResult),
}

/// Scripted collector for tests and dry runs
///
/// Each target walks through its own script; once the script is exhausted
/// the last step repeats. Targets without a dedicated script use the default
/// script.
pub struct MockCollector {
    kind: CollectorKind,
    default_script: Vec<MockStep>,
    target_scripts: HashMap<String, Vec<MockStep>>,
    skipped_targets: Vec<String>,
    cursors: Arc<Mutex<HashMap<String, usize>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockCollector {
    pub fn new(kind: CollectorKind) -> Self {
        Self {
            kind,
            default_script: Vec::new(),
            target_scripts: HashMap::new(),
            skipped_targets: Vec::new(),
            cursors: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Collector that always returns the same result
    pub fn always(kind: CollectorKind, result: CollectionResult) -> Self {
        Self::new(kind).then(result)
    }

    /// Append a step to the default script
    pub fn then(mut self, result: CollectionResult) -> Self {
        self.default_script.push(MockStep::Return(result));
        self
    }

    /// Append a delayed step to the default script
    pub fn then_after(mut self, delay: Duration, result: CollectionResult) -> Self {
        self.default_script.push(MockStep::Delay(delay, result));
        self
    }

    /// Give one target (by `service/name` key) its own script
    pub fn for_target(mut self, key: &str, steps: Vec<MockStep>) -> Self {
        self.target_scripts.insert(key.to_string(), steps);
        self
    }

    /// Report the collector as not applicable to a target
    pub fn skip_target(mut self, key: &str) -> Self {
        self.skipped_targets.push(key.to_string());
        self
    }

    /// Total number of collect() calls across all targets
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of collect() calls for one target
    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    fn next_step(&self, key: &str) -> Option<MockStep> {
        let script = self
            .target_scripts
            .get(key)
            .unwrap_or(&self.default_script);
        if script.is_empty() {
            return None;
        }
        let mut cursors = self.cursors.lock().unwrap();
        let cursor = cursors.entry(key.to_string()).or_insert(0);
        let step = script[(*cursor).min(script.len() - 1)].clone();
        *cursor += 1;
        Some(step)
    }
}

impl Collector for MockCollector {
    fn kind(&self) -> CollectorKind {
        self.kind
    }

    fn applies_to(&self, target: &MonitoringTarget) -> bool {
        !self.skipped_targets.contains(&target.key())
    }

    fn collect<'a>(
        &'a self,
        target: &'a MonitoringTarget,
        _window: &'a TimeWindow,
    ) -> Pin<Box<dyn Future<Output = CollectionResult> + Send + 'a>> {
        Box::pin(async move {
            let key = target.key();
            self.calls.lock().unwrap().push(key.clone());

            match self.next_step(&key) {
                Some(MockStep::Return(result)) => result,
                Some(MockStep::Delay(delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => CollectionResult::failure("no scripted result", false),
            }
        })
    }
}

/// Scripted `AwsApi` keyed by operation name
///
/// Responses for one operation are consumed in order; an operation with no
/// remaining responses fails with a non-retryable error.
#[derive(Default)]
pub struct MockAws {
    responses: Mutex<HashMap<&'static str, VecDeque<Result<Value, CollectorError>>>>,
    calls: Mutex<Vec<AwsRequest>>,
}

impl MockAws {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, operation: &'static str, response: Result<Value, CollectorError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(response);
        self
    }

    /// Every request received so far, in order
    pub fn calls(&self) -> Vec<AwsRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.operation == operation)
            .count()
    }
}

impl AwsApi for MockAws {
    fn call<'a>(
        &'a self,
        request: &'a AwsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CollectorError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .get_mut(request.operation)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| {
                    Err(CollectorError::CommandFailed(format!(
                        "no scripted response for {}",
                        request.operation
                    )))
                })
        })
    }
}
