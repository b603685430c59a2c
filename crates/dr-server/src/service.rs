//! Job lifecycle orchestration.
//!
//! [`JobService`] owns the job table, artifact directory, worker pool,
//! engine chain and delivery client. `submit` validates and stores a job and
//! hands it to the pool; the pool task then drives the job through
//! conversion and, if a callback was given, delivery. Every other operation
//! is a read or a removal against the store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use dr_core::clock::{Clock, Sleeper, SystemClock, TokioSleeper};
use dr_core::config::Config;
use dr_core::events::{EventBus, EventPayload};
use dr_core::job::EngineAttempt;
use dr_core::{Error, Job, JobError, JobId, JobStatus, JobView, Result};
use dr_engine::{build_engines, ChainError, EngineChain, SharedEngine, ToolRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use crate::artifacts::ArtifactStore;
use crate::delivery::{DeliveryClient, DeliveryRequest};
use crate::pool::{PoolSnapshot, WorkerPool};
use crate::reaper::Reaper;
use crate::store::JobStore;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A conversion request as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub bytes: Bytes,
    pub filename: String,
    pub job_id: Option<String>,
    pub callback_url: Option<String>,
    pub correlation_token: Option<String>,
    pub endpoint_variant: Option<String>,
}

/// A finished PDF ready for download.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub download_name: String,
}

/// Queue depth bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadLevel {
    Idle,
    Light,
    Moderate,
    Heavy,
}

impl LoadLevel {
    pub fn from_queue_size(queue_size: usize) -> Self {
        match queue_size {
            0 => LoadLevel::Idle,
            1..=4 => LoadLevel::Light,
            5..=14 => LoadLevel::Moderate,
            _ => LoadLevel::Heavy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Online,
    /// No engine passed probing; every job will fail.
    Offline,
}

/// Read-only summary of the whole job table.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
    pub upload_failed: usize,
    /// Jobs waiting for or holding a conversion slot.
    pub queue_size: usize,
    pub workers: usize,
    pub busy_workers: usize,
    pub estimated_wait_secs: u64,
    pub load: LoadLevel,
    pub available_engines: Vec<String>,
    pub service_status: ServiceStatus,
}

#[derive(Debug, Default)]
struct ConversionStats {
    total: Duration,
    count: u32,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles a [`JobService`]. Engines are discovered from the config unless
/// supplied explicitly.
pub struct JobServiceBuilder {
    config: Config,
    engines: Option<Vec<SharedEngine>>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    events: Arc<EventBus>,
    engine_grace: Option<Duration>,
}

impl JobServiceBuilder {
    pub fn engines(mut self, engines: Vec<SharedEngine>) -> Self {
        self.engines = Some(engines);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// Extra time an engine gets past its budget before the chain moves on.
    pub fn engine_grace(mut self, grace: Duration) -> Self {
        self.engine_grace = Some(grace);
        self
    }

    /// Validate the config, probe engines and start the worker pool.
    pub async fn build(self) -> Result<Arc<JobService>> {
        let config = self.config;
        config.validate()?;

        let engines = match self.engines {
            Some(engines) => engines,
            None => {
                let registry = ToolRegistry::discover(&config.engines);
                build_engines(&config.engines, &registry)
            }
        };
        let mut chain = EngineChain::probe(engines).await;
        if let Some(grace) = self.engine_grace {
            chain = chain.with_grace(grace);
        }
        if chain.available_engines().is_empty() {
            tracing::warn!("No conversion engine available; jobs will fail until one is installed");
        }

        let artifacts = ArtifactStore::new(&config.conversion.artifact_dir);
        artifacts.ensure_root().await?;

        let delivery =
            DeliveryClient::new(&config.delivery, self.sleeper).with_events(self.events.clone());
        let pool = WorkerPool::new(config.conversion.max_workers);

        Ok(Arc::new(JobService {
            store: Arc::new(JobStore::new()),
            artifacts,
            pool,
            chain,
            delivery,
            clock: self.clock,
            events: self.events,
            in_flight: DashMap::new(),
            stats: Mutex::new(ConversionStats::default()),
            config,
        }))
    }
}

// ---------------------------------------------------------------------------
// JobService
// ---------------------------------------------------------------------------

pub struct JobService {
    config: Config,
    store: Arc<JobStore>,
    artifacts: ArtifactStore,
    pool: WorkerPool,
    chain: EngineChain,
    delivery: DeliveryClient,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    /// Completion signal per job that has a pool task.
    in_flight: DashMap<JobId, watch::Receiver<bool>>,
    stats: Mutex<ConversionStats>,
}

impl JobService {
    pub fn builder(config: Config) -> JobServiceBuilder {
        JobServiceBuilder {
            config,
            engines: None,
            clock: Arc::new(SystemClock),
            sleeper: Arc::new(TokioSleeper),
            events: Arc::new(EventBus::default()),
            engine_grace: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// A reaper sharing this service's store, files and clock.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.store.clone(),
            self.artifacts.clone(),
            self.clock.clone(),
            self.config.cleanup.max_age(),
        )
        .with_events(self.events.clone())
    }

    pub fn available_engines(&self) -> Vec<String> {
        self.chain.available_engines()
    }

    /// Every configured engine with its probe result.
    pub fn engine_availability(&self) -> Vec<(String, bool)> {
        self.chain.availability()
    }

    pub fn pool_snapshot(&self) -> PoolSnapshot {
        self.pool.snapshot()
    }

    // -- operations ---------------------------------------------------------

    /// Validate and enqueue a conversion. The returned view is always
    /// `queued`.
    pub async fn submit(self: &Arc<Self>, req: SubmitRequest) -> Result<JobView> {
        let conversion = &self.config.conversion;
        let filename = Path::new(&req.filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        if !conversion.accepts(&filename) {
            return Err(Error::InvalidFileType {
                filename: req.filename,
                expected: conversion.expected_extensions(),
            });
        }
        if req.bytes.len() as u64 > conversion.max_upload_bytes {
            return Err(Error::FileTooLarge {
                max: conversion.max_upload_bytes,
            });
        }
        if req.bytes.is_empty() {
            return Err(Error::Validation("uploaded file is empty".into()));
        }

        let id = match non_blank(req.job_id) {
            Some(raw) => JobId::parse(&raw)?,
            None => JobId::generate(),
        };
        // A removed job's task may still be winding down on the same id and
        // paths; the id becomes free again once that task has finished.
        if self.in_flight.contains_key(&id) {
            tracing::debug!(job_id = %id, "Id still held by a running task");
            return Err(Error::DuplicateId { id: id.to_string() });
        }
        let callback_url = non_blank(req.callback_url)
            .map(|url| validate_callback(&url).map(|_| url))
            .transpose()?;
        let variant = non_blank(req.endpoint_variant)
            .unwrap_or_else(|| self.config.delivery.default_endpoint.clone());
        if !self.delivery.has_endpoint(&variant) {
            return Err(Error::Validation(format!(
                "unknown delivery endpoint '{variant}'"
            )));
        }

        let extension = Path::new(&filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let input = self.artifacts.input_path(&id, &extension);

        let mut job = Job::new(id.clone(), filename.as_str(), variant, self.clock.now());
        job.input_path = Some(input.clone());
        job.callback_url = callback_url;
        job.correlation_token = non_blank(req.correlation_token);
        let view = job.view();

        self.store.create(job)?;
        if let Err(e) = self.artifacts.write_input(&id, &extension, &req.bytes).await {
            tracing::error!(job_id = %id, error = %e, "Failed to store upload");
            self.store.delete(&id);
            self.artifacts.remove(&input).await;
            return Err(e);
        }
        self.events.publish(EventPayload::JobQueued { job_id: id.clone() });

        let (done_tx, done_rx) = watch::channel(false);
        self.in_flight.insert(id.clone(), done_rx);
        let guard = InFlightGuard {
            service: self.clone(),
            id: id.clone(),
            done: done_tx,
        };
        let service = self.clone();
        let task_id = id.clone();
        let queued = self.pool.submit(id.to_string(), async move {
            let _guard = guard;
            service.process(&task_id).await;
        });
        if let Err(e) = queued {
            self.store.delete(&id);
            self.artifacts.remove(&input).await;
            return Err(e);
        }

        tracing::info!(
            job_id = %id,
            filename = %filename,
            bytes = req.bytes.len(),
            callback = view.callback_url.is_some(),
            "Job queued"
        );
        Ok(view)
    }

    pub fn status(&self, id: &JobId) -> Result<JobView> {
        self.store.get(id).map(|job| job.view())
    }

    /// The converted PDF of a completed job.
    pub async fn artifact(&self, id: &JobId) -> Result<Artifact> {
        let job = self.store.get(id)?;
        if job.status != JobStatus::Completed {
            return Err(Error::not_ready(id, job.status));
        }
        let path = job
            .output_path
            .as_deref()
            .ok_or_else(|| Error::not_found("artifact", id))?;
        let bytes = self.artifacts.read(path).await?;
        Ok(Artifact {
            bytes,
            download_name: job.download_name(),
        })
    }

    /// Remove a job and its files.
    pub async fn cleanup(&self, id: &JobId) -> Result<()> {
        let job = self
            .store
            .delete(id)
            .ok_or_else(|| Error::not_found("job", id))?;

        let mut paths = job.artifact_paths();
        let output = self.artifacts.output_path(id);
        if !paths.contains(&output) {
            paths.push(output);
        }
        let failures = self.artifacts.remove_all(&paths).await;

        self.events.publish(EventPayload::JobRemoved {
            job_id: id.clone(),
            expired: false,
        });
        tracing::info!(job_id = %id, status = %job.status, failures, "Job cleaned up");
        Ok(())
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let counts = self.store.counts();
        let pool = self.pool.snapshot();
        let queue_size = counts.queued + counts.processing;
        let rounds = queue_size.div_ceil(pool.size.max(1));
        let available_engines = self.chain.available_engines();
        let service_status = if available_engines.is_empty() {
            ServiceStatus::Offline
        } else {
            ServiceStatus::Online
        };

        QueueSnapshot {
            total: counts.total(),
            queued: counts.queued,
            processing: counts.processing,
            uploading: counts.uploading,
            completed: counts.completed,
            failed: counts.failed,
            upload_failed: counts.upload_failed,
            queue_size,
            workers: pool.size,
            busy_workers: pool.busy,
            estimated_wait_secs: (rounds as f64 * self.average_conversion_secs()).ceil() as u64,
            load: LoadLevel::from_queue_size(queue_size),
            available_engines,
            service_status,
        }
    }

    /// Wait until the job's pool task has finished, then return its status.
    /// Returns immediately for jobs without a running task.
    pub async fn wait(&self, id: &JobId) -> Result<JobView> {
        let rx = self.in_flight.get(id).map(|entry| entry.value().clone());
        if let Some(mut rx) = rx {
            let _ = rx.wait_for(|done| *done).await;
        }
        self.status(id)
    }

    /// Stop the worker pool. Running jobs are aborted and marked failed.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    // -- worker side --------------------------------------------------------

    async fn process(&self, id: &JobId) {
        let job = match self.advance(id, JobStatus::Processing, |_| {}) {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                tracing::debug!(job_id = %id, "Job removed before it started");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Could not start job");
                return;
            }
        };

        let Some(input) = job.input_path.clone() else {
            self.finish_failed(id, JobError::Internal {
                message: "job has no input file".into(),
            });
            return;
        };
        let output = self.artifacts.output_path(id);
        let budget = self.config.conversion.job_timeout(self.chain.len());
        let engine_timeout = self.config.conversion.engine_timeout();

        let on_attempt = |attempt: &EngineAttempt| self.record_attempt(id, attempt);
        let run = self.chain.run(&input, &output, engine_timeout, &on_attempt);
        let converted = match tokio::time::timeout(budget, run).await {
            Ok(Ok(converted)) => converted,
            Ok(Err(e)) => {
                self.finish_chain_error(id, &e);
                return;
            }
            Err(_) => {
                tracing::warn!(job_id = %id, budget_secs = budget.as_secs(), "Job timed out");
                self.artifacts.remove(&output).await;
                self.finish_failed(id, JobError::ConversionTimeout {
                    timeout_secs: budget.as_secs(),
                });
                return;
            }
        };
        self.record_duration(&converted.attempts);

        let recorded = self.store.update(id, |j| {
            j.record_conversion(&converted.engine, output.clone());
            Ok(j.clone())
        });
        let job = match recorded {
            Ok(job) => job,
            Err(e) => {
                self.discard_output(id, &output, &e).await;
                return;
            }
        };

        match job.callback_url.clone() {
            None => self.complete_local(id, &input, &output).await,
            Some(callback) => self.deliver(id, &callback, &output).await,
        }
    }

    /// Completion without a callback: the input goes, the PDF stays for
    /// download.
    async fn complete_local(&self, id: &JobId, input: &Path, output: &Path) {
        if let Err(e) = self.advance(id, JobStatus::Completed, |_| {}) {
            self.discard_output(id, output, &e).await;
            return;
        }
        if self.artifacts.remove(input).await {
            let _ = self.store.update(id, |j| {
                j.input_path = None;
                Ok(())
            });
        }
    }

    async fn deliver(&self, id: &JobId, callback: &str, output: &Path) {
        let job = match self.advance(id, JobStatus::Uploading, |_| {}) {
            Ok(job) => job,
            Err(e) => {
                self.discard_output(id, output, &e).await;
                return;
            }
        };

        let req = DeliveryRequest {
            job_id: &job.id,
            callback_url: callback,
            endpoint_variant: &job.endpoint_variant,
            correlation_token: job.correlation_token.as_deref(),
            original_filename: &job.original_filename,
            upload_name: job.download_name(),
            artifact: output,
        };

        match self.delivery.deliver(&req).await {
            Ok(receipt) => {
                let done = self.advance(id, JobStatus::Completed, |j| {
                    j.delivery_attempts = receipt.attempts;
                });
                match done {
                    Ok(job) => {
                        let paths = job.artifact_paths();
                        if self.artifacts.remove_all(&paths).await == 0 {
                            let _ = self.store.update(id, |j| {
                                j.input_path = None;
                                j.output_path = None;
                                Ok(())
                            });
                        }
                    }
                    Err(e) => self.discard_output(id, output, &e).await,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Delivery failed");
                let attempts = e.attempts();
                let error = e.to_job_error();
                let failed = self.advance(id, JobStatus::UploadFailed, |j| {
                    j.delivery_attempts = attempts;
                    j.error = Some(error);
                });
                if let Err(e) = failed {
                    self.discard_output(id, output, &e).await;
                }
            }
        }
    }

    fn finish_chain_error(&self, id: &JobId, e: &ChainError) {
        tracing::warn!(job_id = %id, error = %e, "Conversion failed");
        self.finish_failed(id, e.to_job_error());
    }

    fn finish_failed(&self, id: &JobId, error: JobError) {
        if let Err(e) = self.advance(id, JobStatus::Failed, |j| j.error = Some(error)) {
            if e.is_not_found() {
                tracing::debug!(job_id = %id, "Job removed while it was processing");
            } else {
                tracing::error!(job_id = %id, error = %e, "Could not record job failure");
            }
        }
    }

    /// Apply a status transition plus extra edits, then publish it.
    fn advance(&self, id: &JobId, next: JobStatus, edit: impl FnOnce(&mut Job)) -> Result<Job> {
        let now = self.clock.now();
        let (from, job) = self.store.update(id, |j| {
            let from = j.status;
            j.transition(next, now)?;
            edit(j);
            Ok((from, j.clone()))
        })?;
        self.publish_transition(id, from, next);
        Ok(job)
    }

    fn publish_transition(&self, id: &JobId, from: JobStatus, to: JobStatus) {
        tracing::info!(job_id = %id, %from, %to, "Job status changed");
        self.events.publish(EventPayload::StatusChanged {
            job_id: id.clone(),
            from,
            to,
        });
    }

    fn record_attempt(&self, id: &JobId, attempt: &EngineAttempt) {
        let _ = self.store.update(id, |j| {
            j.attempts.push(attempt.clone());
            Ok(())
        });
        self.events.publish(EventPayload::EngineAttempted {
            job_id: id.clone(),
            engine: attempt.engine.clone(),
            outcome: attempt.outcome,
        });
    }

    /// The record vanished (cleanup or reaper) while we were working.
    async fn discard_output(&self, id: &JobId, output: &Path, cause: &Error) {
        if cause.is_not_found() {
            tracing::info!(job_id = %id, "Job removed mid-flight; discarding output");
        } else {
            tracing::error!(job_id = %id, error = %cause, "Unexpected job state; discarding output");
        }
        self.artifacts.remove(output).await;
    }

    fn record_duration(&self, attempts: &[EngineAttempt]) {
        let elapsed: u64 = attempts.iter().map(|a| a.elapsed_ms).sum();
        let mut stats = self.stats.lock();
        stats.total += Duration::from_millis(elapsed);
        stats.count = stats.count.saturating_add(1);
    }

    fn average_conversion_secs(&self) -> f64 {
        let stats = self.stats.lock();
        if stats.count == 0 {
            self.config.conversion.estimated_job_secs as f64
        } else {
            stats.total.as_secs_f64() / f64::from(stats.count)
        }
    }

    /// Fail a job whose task ended without reaching a terminal state.
    fn abandon(&self, id: &JobId) {
        let now = self.clock.now();
        let message = "worker stopped before the job finished".to_string();
        let result = self.store.update(id, |j| {
            let from = j.status;
            match from {
                JobStatus::Processing => j.fail(JobError::Internal { message }, now)?,
                JobStatus::Uploading => j.fail_upload(JobError::Internal { message }, now)?,
                _ => return Ok(None),
            }
            Ok(Some((from, j.status)))
        });
        match result {
            Ok(Some((from, to))) => {
                tracing::error!(job_id = %id, %from, %to, "Job task ended abnormally");
                self.publish_transition(id, from, to);
            }
            Ok(None) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::error!(job_id = %id, error = %e, "Could not fail abandoned job"),
        }
    }
}

/// Held by a job's pool task. Whatever way the task ends (finished, panicked,
/// aborted or never started) the job is settled and waiters are released.
struct InFlightGuard {
    service: Arc<JobService>,
    id: JobId,
    done: watch::Sender<bool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.service.abandon(&self.id);
        // Free the id before waking waiters so they can resubmit it at once.
        self.service.in_flight.remove(&self.id);
        let _ = self.done.send(true);
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_callback(url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| Error::Validation(format!("invalid callback_url '{url}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::Validation(format!(
            "callback_url must use http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dr_engine::{ConversionEngine, ConvertOutcome};

    struct Writer;

    #[async_trait]
    impl ConversionEngine for Writer {
        fn name(&self) -> &str {
            "writer"
        }

        async fn probe_availability(&self) -> bool {
            true
        }

        async fn convert(&self, _input: &Path, output: &Path, _timeout: Duration) -> ConvertOutcome {
            match tokio::fs::write(output, b"%PDF-1.4").await {
                Ok(()) => ConvertOutcome::Success,
                Err(e) => ConvertOutcome::Failure(e.to_string()),
            }
        }
    }

    async fn service(dir: &tempfile::TempDir) -> Arc<JobService> {
        let mut config = Config::default();
        config.conversion.artifact_dir = dir.path().to_path_buf();
        config.conversion.max_upload_bytes = 16;
        JobService::builder(config)
            .engines(vec![Arc::new(Writer) as SharedEngine])
            .build()
            .await
            .unwrap()
    }

    fn request(filename: &str, bytes: &'static [u8]) -> SubmitRequest {
        SubmitRequest {
            bytes: Bytes::from_static(bytes),
            filename: filename.into(),
            ..SubmitRequest::default()
        }
    }

    #[tokio::test]
    async fn rejects_bad_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let err = svc.submit(request("notes.txt", b"PK")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidFileType { .. }));

        let err = svc
            .submit(request("big.docx", b"0123456789abcdefXYZ"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { max: 16 }));

        let err = svc.submit(request("empty.docx", b"")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let mut bad_id = request("a.docx", b"PK");
        bad_id.job_id = Some("../escape".into());
        assert!(matches!(svc.submit(bad_id).await, Err(Error::Validation(_))));

        let mut bad_callback = request("a.docx", b"PK");
        bad_callback.callback_url = Some("ftp://example.com".into());
        assert!(matches!(svc.submit(bad_callback).await, Err(Error::Validation(_))));

        let mut bad_endpoint = request("a.docx", b"PK");
        bad_endpoint.endpoint_variant = Some("nowhere".into());
        assert!(matches!(svc.submit(bad_endpoint).await, Err(Error::Validation(_))));

        assert!(svc.store().is_empty());
    }

    #[tokio::test]
    async fn uppercase_extension_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        let view = svc.submit(request("REPORT.DOCX", b"PK")).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(svc.wait(&view.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let mut first = request("a.docx", b"PK");
        first.job_id = Some("TRACK-1".into());
        svc.submit(first.clone()).await.unwrap();

        let err = svc.submit(first).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));
    }

    #[tokio::test]
    async fn completed_job_keeps_only_the_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;

        let view = svc.submit(request("report.docx", b"PK")).await.unwrap();
        let done = svc.wait(&view.id).await.unwrap();
        assert_eq!(done.engine_used.as_deref(), Some("writer"));

        let job = svc.store().get(&view.id).unwrap();
        assert!(job.input_path.is_none());
        assert!(!dir.path().join(format!("{}.docx", view.id)).exists());

        let artifact = svc.artifact(&view.id).await.unwrap();
        assert_eq!(artifact.bytes, b"%PDF-1.4");
        assert_eq!(artifact.download_name, "report.pdf");
    }

    #[test]
    fn load_levels() {
        assert_eq!(LoadLevel::from_queue_size(0), LoadLevel::Idle);
        assert_eq!(LoadLevel::from_queue_size(4), LoadLevel::Light);
        assert_eq!(LoadLevel::from_queue_size(5), LoadLevel::Moderate);
        assert_eq!(LoadLevel::from_queue_size(14), LoadLevel::Moderate);
        assert_eq!(LoadLevel::from_queue_size(15), LoadLevel::Heavy);
    }

    #[tokio::test]
    async fn idle_snapshot_uses_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir).await;
        let snap = svc.queue_snapshot();
        assert_eq!(snap.total, 0);
        assert_eq!(snap.estimated_wait_secs, 0);
        assert_eq!(snap.load, LoadLevel::Idle);
        assert_eq!(snap.workers, 4);
        assert_eq!(snap.service_status, ServiceStatus::Online);
        assert_eq!(snap.available_engines, vec!["writer"]);
    }
}
