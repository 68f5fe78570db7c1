use crate::config::AiConfig;
use crate::error::AnnotationError;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Verdict for one error excerpt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub category: String,
    #[serde(default)]
    pub summary: String,
}

/// Annotations keyed by the excerpt they describe
pub type Annotations = BTreeMap<String, Annotation>;

/// One batched annotation request for a single target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationRequest {
    pub service: String,
    pub target: String,
    /// Anonymized error excerpts, most frequent first
    pub excerpts: Vec<String>,
    /// Free-form application context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Trait for error-analysis backends
pub trait Annotator: Send + Sync {
    fn annotate<'a>(
        &'a self,
        request: &'a AnnotationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Annotations, AnnotationError>> + Send + 'a>>;
}

/// Annotator backed by an API Gateway + Lambda endpoint
///
/// Sends the excerpts both as a structured list and as a ready-made
/// `question` prompt, authenticating with an `x-api-key` header.
pub struct LambdaAnnotator {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

/// Payload posted to the endpoint
#[derive(Debug, Serialize)]
struct LambdaRequest<'a> {
    question: String,
    #[serde(flatten)]
    request: &'a AnnotationRequest,
}

impl LambdaAnnotator {
    /// Create a new endpoint client
    ///
    /// # Errors
    ///
    /// Returns `AnnotationError::HttpError` if the HTTP client cannot be built.
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AnnotationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnnotationError::HttpError(format!("failed to build client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    pub fn from_config(config: &AiConfig) -> Result<Self, AnnotationError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| AnnotationError::HttpError("no endpoint configured".to_string()))?;
        let api_key = config.resolved_api_key();
        if api_key.is_none() {
            warn!("No API key configured for the analysis endpoint");
        }
        Self::new(
            endpoint,
            api_key,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    /// Prompt asking the model to classify each numbered excerpt
    pub fn build_prompt(request: &AnnotationRequest) -> String {
        let mut prompt = String::new();
        if let Some(context) = &request.context {
            prompt.push_str("Application context:\n");
            prompt.push_str(context.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!(
            "The following error log excerpts were collected from service {} ({}).\n\
             For each excerpt, assign a short category (for example: database, \
             external-api, validation, configuration, timeout, code-defect) and a \
             one-sentence summary of the likely cause.\n\
             Respond only with a JSON object whose keys are the excerpt numbers and \
             whose values are objects with \"category\" and \"summary\" fields.\n\n",
            request.service, request.target
        ));
        for (i, excerpt) in request.excerpts.iter().enumerate() {
            prompt.push_str(&format!("Excerpt {}:\n{}\n\n", i + 1, excerpt));
        }
        prompt
    }

    /// Extract JSON from model output
    ///
    /// Models sometimes wrap JSON in markdown code blocks or add extra text.
    fn extract_json(text: &str) -> String {
        let text = text.trim();

        if let Some(start) = text.find("```json") {
            let body_start = start + 7;
            if let Some(len) = text[body_start..].find("```") {
                return text[body_start..body_start + len].trim().to_string();
            }
        }

        if let Some(start) = text.find("```") {
            let body_start = start + 3;
            if let Some(len) = text[body_start..].find("```") {
                let candidate = text[body_start..body_start + len].trim();
                if candidate.starts_with('{') && candidate.ends_with('}') {
                    return candidate.to_string();
                }
            }
        }

        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                return text[start..=end].to_string();
            }
        }

        text.to_string()
    }

    /// Interpret a successful response body
    fn parse_response(body: &str, excerpts: &[String]) -> Result<Annotations, AnnotationError> {
        let value: Value = serde_json::from_str(body)
            .or_else(|_| serde_json::from_str(&Self::extract_json(body)))
            .map_err(|e| AnnotationError::InvalidResponse(format!("response is not JSON: {}", e)))?;

        if let Some(message) = value.get("errorMessage").and_then(Value::as_str) {
            let error_type = value
                .get("errorType")
                .and_then(Value::as_str)
                .unwrap_or("Error");
            return Err(AnnotationError::Backend {
                status: 502,
                message: format!("{}: {}", error_type, message),
            });
        }

        let value = match value.get("answer").cloned() {
            Some(Value::String(answer)) => {
                if answer == "Error processing your request" {
                    return Err(AnnotationError::Backend {
                        status: 502,
                        message: answer,
                    });
                }
                serde_json::from_str(&Self::extract_json(&answer)).map_err(|e| {
                    AnnotationError::InvalidResponse(format!("answer is not JSON: {}", e))
                })?
            }
            Some(other) => other,
            None => value,
        };

        let value = match value.get("annotations").cloned() {
            Some(inner) => inner,
            None => value,
        };

        let raw: BTreeMap<String, Annotation> = serde_json::from_value(value).map_err(|e| {
            AnnotationError::InvalidResponse(format!("unexpected annotation shape: {}", e))
        })?;

        Ok(resolve_keys(raw, excerpts))
    }
}

/// Map response keys back to excerpts
///
/// Keys may be the excerpt text itself or its 1-based number. Keys matching
/// neither are dropped.
pub fn resolve_keys(raw: BTreeMap<String, Annotation>, excerpts: &[String]) -> Annotations {
    let mut resolved = Annotations::new();
    for (key, annotation) in raw {
        if excerpts.contains(&key) {
            resolved.insert(key, annotation);
            continue;
        }
        let index = key
            .trim()
            .trim_start_matches("Excerpt")
            .trim()
            .parse::<usize>()
            .ok();
        match index.and_then(|i| i.checked_sub(1)).and_then(|i| excerpts.get(i)) {
            Some(excerpt) => {
                resolved.insert(excerpt.clone(), annotation);
            }
            None => debug!("Ignoring annotation for unknown key '{}'", key),
        }
    }
    resolved
}

impl Annotator for LambdaAnnotator {
    fn annotate<'a>(
        &'a self,
        request: &'a AnnotationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Annotations, AnnotationError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = LambdaRequest {
                question: Self::build_prompt(request),
                request,
            };

            info!(
                "Requesting analysis of {} excerpt(s) for {}",
                request.excerpts.len(),
                request.target
            );

            let mut builder = self.client.post(&self.endpoint).json(&payload);
            if let Some(key) = &self.api_key {
                builder = builder.header("x-api-key", key);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    AnnotationError::Timeout
                } else {
                    AnnotationError::HttpError(format!("HTTP request failed: {}", e))
                }
            })?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(AnnotationError::Throttled);
            }
            let body = response.text().await.map_err(|e| {
                if e.is_timeout() {
                    AnnotationError::Timeout
                } else {
                    AnnotationError::HttpError(format!("failed to read response: {}", e))
                }
            })?;
            if !status.is_success() {
                return Err(AnnotationError::Backend {
                    status: status.as_u16(),
                    message: body,
                });
            }

            let annotations = Self::parse_response(&body, &request.excerpts)?;
            debug!(
                "Endpoint annotated {} of {} excerpt(s)",
                annotations.len(),
                request.excerpts.len()
            );
            Ok(annotations)
        })
    }
}

/// Mock annotator for testing and dry runs
///
/// Either replays scripted responses (cycling after the last one) or, when
/// built with `categorizing`, annotates every excerpt it receives.
pub struct MockAnnotator {
    responses: Vec<Result<Annotations, AnnotationError>>,
    category: Option<String>,
    current_index: Arc<Mutex<usize>>,
    call_count: Arc<Mutex<usize>>,
    last_request: Arc<Mutex<Option<AnnotationRequest>>>,
}

impl MockAnnotator {
    pub fn with_responses(responses: Vec<Result<Annotations, AnnotationError>>) -> Self {
        Self {
            responses,
            category: None,
            current_index: Arc::new(Mutex::new(0)),
            call_count: Arc::new(Mutex::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_response(response: Result<Annotations, AnnotationError>) -> Self {
        Self::with_responses(vec![response])
    }

    /// Annotate every excerpt with the given category
    pub fn categorizing(category: &str) -> Self {
        let mut mock = Self::with_responses(Vec::new());
        mock.category = Some(category.to_string());
        mock
    }

    pub fn error(message: &str) -> Self {
        Self::with_response(Err(AnnotationError::Backend {
            status: 500,
            message: message.to_string(),
        }))
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<AnnotationRequest> {
        self.last_request.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        *self.call_count.lock().unwrap() = 0;
        *self.last_request.lock().unwrap() = None;
        *self.current_index.lock().unwrap() = 0;
    }

    fn next_response(&self, request: &AnnotationRequest) -> Result<Annotations, AnnotationError> {
        if let Some(category) = &self.category {
            return Ok(request
                .excerpts
                .iter()
                .map(|e| {
                    (
                        e.clone(),
                        Annotation {
                            category: category.clone(),
                            summary: format!("Mock analysis for {}", request.target),
                        },
                    )
                })
                .collect());
        }
        if self.responses.is_empty() {
            return Err(AnnotationError::InvalidResponse(
                "no scripted response".to_string(),
            ));
        }
        let mut index = self.current_index.lock().unwrap();
        let response = self.responses[*index % self.responses.len()].clone();
        *index += 1;
        response
    }
}

impl Annotator for MockAnnotator {
    fn annotate<'a>(
        &'a self,
        request: &'a AnnotationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Annotations, AnnotationError>> + Send + 'a>> {
        Box::pin(async move {
            *self.call_count.lock().unwrap() += 1;
            *self.last_request.lock().unwrap() = Some(request.clone());
            self.next_response(request)
        })
    }
}
