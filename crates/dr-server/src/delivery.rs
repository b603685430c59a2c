//! Callback delivery of converted PDFs.
//!
//! [`DeliveryClient`] POSTs a finished artifact as `multipart/form-data` to
//! the URL built from the job's callback base and endpoint variant, retrying
//! transport failures and 5xx responses with exponential backoff. Any other
//! non-success response ends delivery immediately.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dr_core::clock::Sleeper;
use dr_core::config::DeliveryConfig;
use dr_core::events::{EventBus, EventPayload};
use dr_core::{JobError, JobId};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;

/// Longest response body excerpt kept in errors.
const BODY_EXCERPT_LEN: usize = 512;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff schedule for delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DeliveryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier.max(1),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based):
    /// `min(base * multiplier^(retry-1), max_delay)`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.saturating_pow(retry - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Why an artifact could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("unknown delivery endpoint variant: {0}")]
    UnknownEndpoint(String),

    #[error("failed to read artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("callback rejected upload with HTTP {status} after {attempts} attempt(s)")]
    Rejected {
        status: u16,
        attempts: u32,
        body: String,
    },

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl DeliveryError {
    /// HTTP attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryError::UnknownEndpoint(_) | DeliveryError::Artifact { .. } => 0,
            DeliveryError::Rejected { attempts, .. } | DeliveryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn to_job_error(&self) -> JobError {
        match self {
            DeliveryError::Rejected { status, .. } => JobError::DeliveryRejected { status: *status },
            DeliveryError::Exhausted { attempts, last_error } => JobError::DeliveryFailed {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            other => JobError::DeliveryFailed {
                attempts: 0,
                last_error: other.to_string(),
            },
        }
    }
}

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub url: String,
    pub status: u16,
    pub attempts: u32,
}

/// What to deliver and where.
#[derive(Debug, Clone)]
pub struct DeliveryRequest<'a> {
    pub job_id: &'a JobId,
    pub callback_url: &'a str,
    pub endpoint_variant: &'a str,
    pub correlation_token: Option<&'a str>,
    pub original_filename: &'a str,
    /// File name given to the uploaded PDF part.
    pub upload_name: String,
    pub artifact: &'a Path,
}

enum AttemptResult {
    Delivered(u16),
    Retryable(String),
    Rejected { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// DeliveryClient
// ---------------------------------------------------------------------------

pub struct DeliveryClient {
    client: Client,
    policy: RetryPolicy,
    endpoints: BTreeMap<String, String>,
    confirmation_key: String,
    sleeper: Arc<dyn Sleeper>,
    events: Option<Arc<EventBus>>,
}

impl DeliveryClient {
    pub fn new(config: &DeliveryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build delivery HTTP client: {e}");
                Client::new()
            });

        Self {
            client,
            policy: RetryPolicy::from_config(config),
            endpoints: config.endpoints.clone(),
            confirmation_key: config.confirmation_key.clone(),
            sleeper,
            events: None,
        }
    }

    /// Publish a `delivery_attempted` event for every HTTP attempt.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn has_endpoint(&self, variant: &str) -> bool {
        self.endpoints.contains_key(variant)
    }

    /// Expand the template for `variant`.
    pub fn resolve_url(
        &self,
        variant: &str,
        callback_url: &str,
        job_id: &JobId,
        correlation_token: Option<&str>,
    ) -> Result<String, DeliveryError> {
        let template = self
            .endpoints
            .get(variant)
            .ok_or_else(|| DeliveryError::UnknownEndpoint(variant.to_string()))?;
        let base = callback_url.trim_end_matches('/');
        let token = correlation_token.unwrap_or(job_id.as_str());
        Ok(template
            .replace("{base}", base)
            .replace("{id}", job_id.as_str())
            .replace("{token}", token))
    }

    /// Upload the artifact, retrying per the policy.
    pub async fn deliver(&self, req: &DeliveryRequest<'_>) -> Result<DeliveryReceipt, DeliveryError> {
        let url = self.resolve_url(
            req.endpoint_variant,
            req.callback_url,
            req.job_id,
            req.correlation_token,
        )?;
        let bytes = tokio::fs::read(req.artifact)
            .await
            .map_err(|source| DeliveryError::Artifact {
                path: req.artifact.to_path_buf(),
                source,
            })?;

        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_for_retry(attempt - 1);
                tracing::info!(
                    job_id = %req.job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying delivery after backoff"
                );
                self.sleeper.sleep(delay).await;
            }

            let result = self.attempt(&url, req, &bytes).await;
            self.publish_attempt(req.job_id, attempt, &result);

            match result {
                AttemptResult::Delivered(status) => {
                    tracing::info!(job_id = %req.job_id, %url, status, attempt, "Delivered artifact");
                    return Ok(DeliveryReceipt {
                        url,
                        status,
                        attempts: attempt,
                    });
                }
                AttemptResult::Rejected { status, body } => {
                    tracing::warn!(
                        job_id = %req.job_id,
                        %url,
                        status,
                        attempt,
                        "Callback rejected delivery; not retrying"
                    );
                    return Err(DeliveryError::Rejected {
                        status,
                        attempts: attempt,
                        body,
                    });
                }
                AttemptResult::Retryable(message) => {
                    tracing::warn!(
                        job_id = %req.job_id,
                        %url,
                        attempt,
                        max_attempts,
                        error = %message,
                        "Delivery attempt failed"
                    );
                    last_error = message;
                }
            }
        }

        Err(DeliveryError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }

    async fn attempt(&self, url: &str, req: &DeliveryRequest<'_>, bytes: &[u8]) -> AttemptResult {
        let part = match Part::bytes(bytes.to_vec())
            .file_name(req.upload_name.clone())
            .mime_str("application/pdf")
        {
            Ok(part) => part,
            Err(e) => return AttemptResult::Retryable(format!("failed to build upload: {e}")),
        };

        let form = Form::new()
            .part("file", part)
            .text("job_id", req.job_id.to_string())
            .text("original_filename", req.original_filename.to_string())
            .text(
                "correlation_token",
                req.correlation_token.unwrap_or(req.job_id.as_str()).to_string(),
            );

        let response = match self.client.post(url).multipart(form).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return AttemptResult::Retryable(format!("request timed out: {e}")),
            Err(e) => return AttemptResult::Retryable(format!("transport error: {e}")),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return AttemptResult::Retryable(format!("failed to read response: {e}")),
        };

        if status.is_server_error() {
            return AttemptResult::Retryable(format!("HTTP {}: {}", status.as_u16(), excerpt(&body)));
        }
        if !status.is_success() {
            return AttemptResult::Rejected {
                status: status.as_u16(),
                body: excerpt(&body),
            };
        }

        match confirmation(&body, &self.confirmation_key) {
            Confirmation::Confirmed | Confirmation::NotJson => AttemptResult::Delivered(status.as_u16()),
            Confirmation::Missing => AttemptResult::Rejected {
                status: status.as_u16(),
                body: excerpt(&body),
            },
        }
    }

    fn publish_attempt(&self, job_id: &JobId, attempt: u32, result: &AttemptResult) {
        let Some(ref events) = self.events else {
            return;
        };
        let status = match result {
            AttemptResult::Delivered(s) => Some(*s),
            AttemptResult::Rejected { status, .. } => Some(*status),
            AttemptResult::Retryable(_) => None,
        };
        events.publish(EventPayload::DeliveryAttempted {
            job_id: job_id.clone(),
            attempt,
            status,
        });
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Confirmation {
    Confirmed,
    Missing,
    NotJson,
}

/// Inspect a 2xx body. Non-JSON bodies are accepted as-is; JSON bodies must
/// be an object whose `key` is truthy.
fn confirmation(body: &str, key: &str) -> Confirmation {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Confirmation::NotJson;
    };
    let confirmed = match value.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            matches!(s.to_ascii_lowercase().as_str(), "true" | "ok" | "success")
        }
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    };
    if confirmed {
        Confirmation::Confirmed
    } else {
        Confirmation::Missing
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
