//! Job data model and lifecycle state machine.
//!
//! A [`Job`] is one conversion request. Its [`JobStatus`] only ever moves
//! forward along
//!
//! ```text
//! queued -> processing -> completed
//!                      -> failed
//!                      -> uploading -> completed
//!                                   -> upload_failed
//! ```
//!
//! and every timestamp is clamped so it never precedes the one before it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of a caller-supplied job id.
pub const MAX_JOB_ID_LEN: usize = 128;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Job identifier. Either generated (UUID v4) or supplied by the caller.
///
/// Ids end up in artifact file names, so caller-supplied ids are restricted
/// to ASCII alphanumerics plus `-`, `_` and `.`, and may not start with `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Validate a caller-supplied id.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Validation("job id must not be empty".into()));
        }
        if s.len() > MAX_JOB_ID_LEN {
            return Err(Error::Validation(format!(
                "job id must be at most {MAX_JOB_ID_LEN} characters"
            )));
        }
        if s.starts_with('.') {
            return Err(Error::Validation("job id must not start with '.'".into()));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(Error::Validation(format!(
                "job id contains invalid character {bad:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Uploading,
    Completed,
    Failed,
    UploadFailed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Uploading,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::UploadFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Uploading => "uploading",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::UploadFailed => "upload_failed",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::UploadFailed
        )
    }

    /// Whether the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Uploading)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Uploading, Completed)
                | (Uploading, UploadFailed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown job status: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Engine attempts
// ---------------------------------------------------------------------------

/// Outcome of a single engine attempt within the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failed,
    TimedOut,
    /// The engine reported success but produced no usable output.
    EmptyOutput,
}

/// Record of one engine being tried for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineAttempt {
    pub engine: String,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// JobError
// ---------------------------------------------------------------------------

/// Failure recorded on a job that ended in `failed` or `upload_failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum JobError {
    #[error("no conversion engine is available")]
    NoEngineAvailable,

    #[error("all {attempted} conversion engines failed")]
    AllEnginesFailed { attempted: usize },

    #[error("conversion exceeded the {timeout_secs}s job timeout")]
    ConversionTimeout { timeout_secs: u64 },

    #[error("callback rejected the upload with HTTP {status}")]
    DeliveryRejected { status: u16 },

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    DeliveryFailed { attempts: u32, last_error: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            JobError::NoEngineAvailable => "no_engine_available",
            JobError::AllEnginesFailed { .. } => "all_engines_failed",
            JobError::ConversionTimeout { .. } => "conversion_timeout",
            JobError::DeliveryRejected { .. } => "delivery_rejected",
            JobError::DeliveryFailed { .. } => "delivery_failed",
            JobError::Internal { .. } => "internal",
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One conversion request and its tracked lifecycle.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub original_filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub engine_used: Option<String>,
    pub attempts: Vec<EngineAttempt>,
    pub error: Option<JobError>,
    pub callback_url: Option<String>,
    pub correlation_token: Option<String>,
    pub endpoint_variant: String,
    pub delivery_attempts: u32,
}

impl Job {
    /// Create a queued job.
    pub fn new(
        id: JobId,
        original_filename: impl Into<String>,
        endpoint_variant: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            original_filename: original_filename.into(),
            status: JobStatus::Queued,
            created_at: now,
            started_at: None,
            finished_at: None,
            input_path: None,
            output_path: None,
            engine_used: None,
            attempts: Vec::new(),
            error: None,
            callback_url: None,
            correlation_token: None,
            endpoint_variant: endpoint_variant.into(),
            delivery_attempts: 0,
        }
    }

    /// Move to `next`, stamping `started_at` / `finished_at` as appropriate.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        if next == JobStatus::Processing {
            self.started_at = Some(now.max(self.created_at));
        }
        if next.is_terminal() {
            let floor = self.started_at.unwrap_or(self.created_at);
            self.finished_at = Some(now.max(floor));
        }
        self.status = next;
        Ok(())
    }

    /// Record a successful conversion. `engine_used` is write-once.
    pub fn record_conversion(&mut self, engine: &str, output: PathBuf) {
        if self.engine_used.is_none() {
            self.engine_used = Some(engine.to_string());
        }
        self.output_path = Some(output);
    }

    /// Transition to `failed` and record the reason.
    pub fn fail(&mut self, error: JobError, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Failed, now)?;
        self.error = Some(error);
        Ok(())
    }

    /// Transition to `upload_failed` and record the reason.
    pub fn fail_upload(&mut self, error: JobError, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::UploadFailed, now)?;
        self.error = Some(error);
        Ok(())
    }

    /// Artifact files this job still owns.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        self.input_path
            .iter()
            .chain(self.output_path.iter())
            .cloned()
            .collect()
    }

    /// Name offered to downloaders: the original stem with a `.pdf` extension.
    pub fn download_name(&self) -> String {
        let stem = std::path::Path::new(&self.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(self.id.as_str());
        format!("{stem}.pdf")
    }

    /// Time since the job was created, never negative.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.created_at).max(chrono::Duration::zero())
    }

    /// Caller-facing snapshot of this job. Artifact paths are not exposed.
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            original_filename: self.original_filename.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            engine_used: self.engine_used.clone(),
            attempts: self.attempts.clone(),
            error: self.error.as_ref().map(|e| JobErrorView {
                code: e.code().to_string(),
                message: e.to_string(),
            }),
            callback_url: self.callback_url.clone(),
            correlation_token: self.correlation_token.clone(),
            endpoint_variant: self.endpoint_variant.clone(),
            delivery_attempts: self.delivery_attempts,
        }
    }
}

/// Status query response for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub original_filename: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub engine_used: Option<String>,
    pub attempts: Vec<EngineAttempt>,
    pub error: Option<JobErrorView>,
    pub callback_url: Option<String>,
    pub correlation_token: Option<String>,
    pub endpoint_variant: String,
    pub delivery_attempts: u32,
}

/// Serialized form of a [`JobError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobErrorView {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn job() -> Job {
        Job::new(JobId::parse("J1").unwrap(), "report.docx", "direct", t(0))
    }

    // -----------------------------------------------------------------------
    // JobId
    // -----------------------------------------------------------------------

    #[test]
    fn job_id_accepts_tracking_numbers() {
        assert_eq!(JobId::parse("2024-001_a.b").unwrap().as_str(), "2024-001_a.b");
    }

    #[test]
    fn job_id_rejects_path_tricks() {
        assert!(JobId::parse("").is_err());
        assert!(JobId::parse("../etc").is_err());
        assert!(JobId::parse(".hidden").is_err());
        assert!(JobId::parse("a/b").is_err());
        assert!(JobId::parse("a b").is_err());
        assert!(JobId::parse(&"x".repeat(MAX_JOB_ID_LEN + 1)).is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(JobId::parse(a.as_str()).is_ok());
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    #[test]
    fn allowed_edges() {
        use JobStatus::*;
        let allowed = [
            (Queued, Processing),
            (Processing, Uploading),
            (Processing, Completed),
            (Processing, Failed),
            (Uploading, Completed),
            (Uploading, UploadFailed),
        ];
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in JobStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            assert!(JobStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn backward_transition_rejected() {
        let mut job = job();
        job.transition(JobStatus::Processing, t(1)).unwrap();
        job.transition(JobStatus::Completed, t(2)).unwrap();
        let err = job.transition(JobStatus::Processing, t(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn timestamps_never_move_backward() {
        let mut job = job();
        job.transition(JobStatus::Processing, t(-5)).unwrap();
        assert_eq!(job.started_at, Some(t(0)));
        job.fail(JobError::NoEngineAvailable, t(-1)).unwrap();
        assert_eq!(job.finished_at, Some(t(0)));
        assert_eq!(job.error, Some(JobError::NoEngineAvailable));
    }

    #[test]
    fn engine_used_is_write_once() {
        let mut job = job();
        job.record_conversion("libreoffice", PathBuf::from("/tmp/J1.pdf"));
        job.record_conversion("docx2pdf", PathBuf::from("/tmp/J1.pdf"));
        assert_eq!(job.engine_used.as_deref(), Some("libreoffice"));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    #[test]
    fn download_name_uses_original_stem() {
        assert_eq!(job().download_name(), "report.pdf");
        let mut nameless = job();
        nameless.original_filename = String::new();
        assert_eq!(nameless.download_name(), "J1.pdf");
    }

    #[test]
    fn view_hides_paths_and_serializes_error() {
        let mut job = job();
        job.input_path = Some(PathBuf::from("/tmp/J1.docx"));
        job.transition(JobStatus::Processing, t(1)).unwrap();
        job.fail(JobError::AllEnginesFailed { attempted: 2 }, t(2)).unwrap();

        let json = serde_json::to_value(job.view()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["code"], "all_engines_failed");
        assert_eq!(json["error"]["message"], "all 2 conversion engines failed");
        assert!(json.get("input_path").is_none());
    }

    #[test]
    fn age_is_clamped_at_zero() {
        let job = job();
        assert_eq!(job.age(t(-10)), chrono::Duration::zero());
        assert_eq!(job.age(t(30)), chrono::Duration::seconds(30));
    }
}
