//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a [`JobService`] over a temporary
//! artifact directory with scripted [`FakeEngine`]s, a manual clock and a
//! recording sleeper. [`TestHarness::with_server`] also serves the router on
//! a random port for HTTP-level tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dr_core::clock::{ManualClock, RecordingSleeper};
use dr_core::config::Config;
use dr_core::events::EventBus;
use dr_core::{JobId, JobView};
use dr_engine::{ConversionEngine, ConvertOutcome, SharedEngine};
use dr_server::context::AppContext;
use dr_server::router::build_router;
use dr_server::service::{JobService, SubmitRequest};
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// How long tests wait for a job before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Reports success without writing anything.
    Empty,
    /// Never returns.
    Hang,
}

/// Scripted conversion engine that records how it was used.
pub struct FakeEngine {
    name: String,
    available: bool,
    behavior: Behavior,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub peak_running: AtomicUsize,
}

impl FakeEngine {
    pub fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            available: true,
            behavior,
            delay: Duration::ZERO,
            gate: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    pub fn succeed(name: &str) -> Self {
        Self::new(name, Behavior::Succeed)
    }

    pub fn fail(name: &str) -> Self {
        Self::new(name, Behavior::Fail)
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Block every conversion until a permit is added to `gate`.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn probe_availability(&self) -> bool {
        self.available
    }

    async fn convert(&self, _input: &Path, output: &Path, _timeout: Duration) -> ConvertOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        if let Some(ref gate) = self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.behavior {
            Behavior::Succeed => match tokio::fs::write(output, b"%PDF-1.4 fake").await {
                Ok(()) => ConvertOutcome::Success,
                Err(e) => ConvertOutcome::Failure(e.to_string()),
            },
            Behavior::Fail => ConvertOutcome::Failure(format!("{} exited with status 1", self.name)),
            Behavior::Empty => ConvertOutcome::Success,
            Behavior::Hang => std::future::pending().await,
        }
    }
}

pub fn engines(list: &[&Arc<FakeEngine>]) -> Vec<SharedEngine> {
    list.iter().map(|e| (*e).clone() as SharedEngine).collect()
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub service: Arc<JobService>,
    pub clock: Arc<ManualClock>,
    pub sleeper: RecordingSleeper,
    pub events: Arc<EventBus>,
    pub dir: TempDir,
}

impl TestHarness {
    /// Harness with default configuration.
    pub async fn new(engines: Vec<SharedEngine>) -> Self {
        Self::with_config(engines, |_| {}).await
    }

    /// Harness with a configuration tweaked by `configure`. The artifact
    /// directory always points at a fresh temp dir.
    pub async fn with_config(engines: Vec<SharedEngine>, configure: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let mut config = Config::default();
        configure(&mut config);
        config.conversion.artifact_dir = dir.path().join("artifacts");

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sleeper = RecordingSleeper::new();
        let events = Arc::new(EventBus::default());

        let service = JobService::builder(config)
            .engines(engines)
            .clock(clock.clone())
            .sleeper(Arc::new(sleeper.clone()))
            .events(events.clone())
            .engine_grace(Duration::from_millis(50))
            .build()
            .await
            .expect("failed to build job service");

        Self {
            service,
            clock,
            sleeper,
            events,
            dir,
        }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(engines: Vec<SharedEngine>) -> (Self, SocketAddr) {
        let harness = Self::new(engines).await;
        let app = build_router(AppContext::new(harness.service.clone()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (harness, addr)
    }

    pub fn artifact_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("artifacts")
    }

    /// Submit a small fake `.docx`.
    pub async fn submit_docx(&self, job_id: Option<&str>) -> JobView {
        self.submit(request("report.docx", job_id))
            .await
            .expect("submit failed")
    }

    pub async fn submit(&self, req: SubmitRequest) -> dr_core::Result<JobView> {
        self.service.submit(req).await
    }

    /// Wait for the job's worker to finish and return its final view.
    pub async fn wait(&self, id: &JobId) -> JobView {
        tokio::time::timeout(WAIT_LIMIT, self.service.wait(id))
            .await
            .expect("job did not finish in time")
            .expect("job disappeared")
    }
}

pub fn request(filename: &str, job_id: Option<&str>) -> SubmitRequest {
    SubmitRequest {
        bytes: b"PK\x03\x04 fake docx".to_vec().into(),
        filename: filename.to_string(),
        job_id: job_id.map(str::to_string),
        ..SubmitRequest::default()
    }
}
