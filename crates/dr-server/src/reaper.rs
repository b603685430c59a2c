//! Background expiry of old jobs.
//!
//! The [`Reaper`] periodically removes every job older than the configured
//! max age, whatever its status, together with its files. A job stuck in
//! `processing` is therefore cleaned up eventually too. On shutdown it makes
//! one last pass over all remaining jobs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dr_core::clock::Clock;
use dr_core::events::{EventBus, EventPayload};
use dr_core::Job;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::store::JobStore;

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    /// Files that could not be deleted (logged, not retried this pass).
    pub file_failures: usize,
}

pub struct Reaper {
    store: Arc<JobStore>,
    artifacts: ArtifactStore,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    events: Option<Arc<EventBus>>,
}

impl Reaper {
    pub fn new(
        store: Arc<JobStore>,
        artifacts: ArtifactStore,
        clock: Arc<dyn Clock>,
        max_age: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            clock,
            max_age,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Remove every job whose age is strictly greater than the max age.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        let jobs = self.store.list();
        let mut report = SweepReport {
            scanned: jobs.len(),
            ..SweepReport::default()
        };

        for job in jobs.into_iter().filter(|j| j.age(now) > max_age) {
            let Some(removed) = self.store.delete(&job.id) else {
                continue;
            };
            report.removed += 1;
            report.file_failures += self.remove_files(&removed).await;

            tracing::info!(
                job_id = %removed.id,
                status = %removed.status,
                age_secs = removed.age(now).num_seconds(),
                "Expired job removed"
            );
            if let Some(ref events) = self.events {
                events.publish(EventPayload::JobRemoved {
                    job_id: removed.id.clone(),
                    expired: true,
                });
            }
        }

        if report.removed > 0 {
            tracing::info!(
                removed = report.removed,
                scanned = report.scanned,
                file_failures = report.file_failures,
                "Cleanup sweep finished"
            );
        } else {
            tracing::debug!(scanned = report.scanned, "Cleanup sweep found nothing to remove");
        }
        report
    }

    /// Remove every remaining job and its files.
    pub async fn final_cleanup(&self) -> SweepReport {
        let jobs = self.store.list();
        let mut report = SweepReport {
            scanned: jobs.len(),
            ..SweepReport::default()
        };
        for job in jobs {
            if let Some(removed) = self.store.delete(&job.id) {
                report.removed += 1;
                report.file_failures += self.remove_files(&removed).await;
            }
        }
        tracing::info!(
            removed = report.removed,
            file_failures = report.file_failures,
            "Final cleanup finished"
        );
        report
    }

    /// Sweep every `interval` until cancelled, then run [`Self::final_cleanup`].
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            max_age_secs = self.max_age.as_secs(),
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sweep().await;
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.final_cleanup().await;
        tracing::info!("Reaper stopped");
    }

    async fn remove_files(&self, job: &Job) -> usize {
        let mut paths: Vec<PathBuf> = job.artifact_paths();
        // A worker may be writing the output before recording it.
        let output = self.artifacts.output_path(&job.id);
        if !paths.contains(&output) {
            paths.push(output);
        }
        self.artifacts.remove_all(&paths).await
    }
}
