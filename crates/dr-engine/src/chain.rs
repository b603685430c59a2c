//! Ordered engine fallback.
//!
//! [`EngineChain`] probes its engines once, then for each job tries the
//! available ones in priority order until one produces a non-empty output
//! file. Every attempt is recorded, whatever its outcome.

use std::path::Path;
use std::time::Duration;

use dr_core::job::{AttemptOutcome, EngineAttempt, JobError};
use tokio::time::Instant;

use crate::engine::{ConvertOutcome, SharedEngine};

/// Extra time an engine gets beyond its own budget before the chain stops
/// waiting for it.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// A successful chain run.
#[derive(Debug, Clone)]
pub struct Converted {
    /// Name of the engine that produced the output.
    pub engine: String,
    /// Every attempt made, in order, ending with the successful one.
    pub attempts: Vec<EngineAttempt>,
}

/// Why a chain run produced nothing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("no conversion engine is available")]
    NoEngineAvailable,

    #[error("all {} conversion engines failed", attempts.len())]
    AllEnginesFailed { attempts: Vec<EngineAttempt> },
}

impl ChainError {
    pub fn attempts(&self) -> &[EngineAttempt] {
        match self {
            ChainError::NoEngineAvailable => &[],
            ChainError::AllEnginesFailed { attempts } => attempts,
        }
    }

    pub fn to_job_error(&self) -> JobError {
        match self {
            ChainError::NoEngineAvailable => JobError::NoEngineAvailable,
            ChainError::AllEnginesFailed { attempts } => JobError::AllEnginesFailed {
                attempted: attempts.len(),
            },
        }
    }
}

struct Slot {
    engine: SharedEngine,
    available: bool,
}

/// Engines in priority order with their cached availability.
pub struct EngineChain {
    slots: Vec<Slot>,
    grace: Duration,
}

impl EngineChain {
    /// Probe every engine once and cache the result.
    pub async fn probe(engines: Vec<SharedEngine>) -> Self {
        let mut slots = Vec::with_capacity(engines.len());
        for engine in engines {
            let available = engine.probe_availability().await;
            if available {
                tracing::info!(engine = engine.name(), "Conversion engine available");
            } else {
                tracing::warn!(engine = engine.name(), "Conversion engine unavailable");
            }
            slots.push(Slot { engine, available });
        }
        Self {
            slots,
            grace: DEFAULT_GRACE,
        }
    }

    /// Override the grace period added to each attempt's budget.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Number of engines configured, available or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of the engines that passed probing, in priority order.
    pub fn available_engines(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.available)
            .map(|s| s.engine.name().to_string())
            .collect()
    }

    /// Every configured engine with its probe result.
    pub fn availability(&self) -> Vec<(String, bool)> {
        self.slots
            .iter()
            .map(|s| (s.engine.name().to_string(), s.available))
            .collect()
    }

    /// Convert `input` into `output`, falling back through available engines.
    ///
    /// `on_attempt` is called after each attempt so callers can observe
    /// progress even if they later abandon the run.
    pub async fn run(
        &self,
        input: &Path,
        output: &Path,
        timeout: Duration,
        on_attempt: &(dyn Fn(&EngineAttempt) + Send + Sync),
    ) -> Result<Converted, ChainError> {
        let mut attempts = Vec::new();

        for slot in self.slots.iter().filter(|s| s.available) {
            let name = slot.engine.name().to_string();
            remove_stale(output).await;

            tracing::debug!(engine = %name, input = %input.display(), "Trying conversion engine");
            let started = Instant::now();
            let outcome = match tokio::time::timeout(
                timeout + self.grace,
                slot.engine.convert(input, output, timeout),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => ConvertOutcome::TimedOut,
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (outcome, detail) = match outcome {
                ConvertOutcome::Success if has_content(output).await => {
                    (AttemptOutcome::Success, None)
                }
                ConvertOutcome::Success => (
                    AttemptOutcome::EmptyOutput,
                    Some("engine reported success but output is missing or empty".to_string()),
                ),
                ConvertOutcome::Failure(reason) => (AttemptOutcome::Failed, Some(reason)),
                ConvertOutcome::TimedOut => (
                    AttemptOutcome::TimedOut,
                    Some(format!("exceeded {}s budget", timeout.as_secs_f32())),
                ),
            };

            let attempt = EngineAttempt {
                engine: name.clone(),
                outcome,
                detail,
                elapsed_ms,
            };
            on_attempt(&attempt);

            if outcome == AttemptOutcome::Success {
                tracing::info!(engine = %name, elapsed_ms, "Conversion succeeded");
                attempts.push(attempt);
                return Ok(Converted {
                    engine: name,
                    attempts,
                });
            }

            tracing::warn!(
                engine = %name,
                outcome = ?attempt.outcome,
                detail = attempt.detail.as_deref().unwrap_or(""),
                "Conversion attempt failed, trying next engine"
            );
            attempts.push(attempt);
        }

        remove_stale(output).await;
        if attempts.is_empty() {
            Err(ChainError::NoEngineAvailable)
        } else {
            Err(ChainError::AllEnginesFailed { attempts })
        }
    }
}

async fn has_content(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn remove_stale(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed stale output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale output"),
    }
}
