//! In-memory job table.
//!
//! [`JobStore`] is the single source of truth for job status. It is an
//! injected instance (usually behind an `Arc`) rather than a global, so each
//! service and each test gets its own.

use std::collections::HashMap;

use dr_core::{Error, Job, JobId, JobStatus, Result};
use parking_lot::RwLock;
use serde::Serialize;

/// Number of jobs in each status, taken under a single lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub processing: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
    pub upload_failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.queued
            + self.processing
            + self.uploading
            + self.completed
            + self.failed
            + self.upload_failed
    }

    pub fn get(&self, status: JobStatus) -> usize {
        match status {
            JobStatus::Queued => self.queued,
            JobStatus::Processing => self.processing,
            JobStatus::Uploading => self.uploading,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::UploadFailed => self.upload_failed,
        }
    }

    fn bump(&mut self, status: JobStatus) {
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Uploading => &mut self.uploading,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::UploadFailed => &mut self.upload_failed,
        };
        *slot += 1;
    }
}

/// Concurrent map from job id to job record.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fully built job. Fails if the id is taken.
    pub fn create(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.id) {
            return Err(Error::DuplicateId {
                id: job.id.to_string(),
            });
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Snapshot of one job.
    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", id))
    }

    /// Apply `mutator` atomically.
    ///
    /// The mutator works on a copy; the copy replaces the stored record only
    /// if the mutator returns `Ok`, so a rejected transition leaves the job
    /// untouched.
    pub fn update<R>(&self, id: &JobId, mutator: impl FnOnce(&mut Job) -> Result<R>) -> Result<R> {
        let mut jobs = self.jobs.write();
        let current = jobs.get(id).ok_or_else(|| Error::not_found("job", id))?;
        let mut draft = current.clone();
        let value = mutator(&mut draft)?;
        jobs.insert(id.clone(), draft);
        Ok(value)
    }

    /// Remove a job, returning the record if it existed.
    pub fn delete(&self, id: &JobId) -> Option<Job> {
        self.jobs.write().remove(id)
    }

    /// Consistent snapshot of every job.
    pub fn list(&self) -> Vec<Job> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn counts(&self) -> StatusCounts {
        let jobs = self.jobs.read();
        let mut counts = StatusCounts::default();
        for job in jobs.values() {
            counts.bump(job.status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn job(id: &str) -> Job {
        Job::new(JobId::parse(id).unwrap(), "a.docx", "direct", Utc::now())
    }

    #[test]
    fn create_and_get() {
        let store = JobStore::new();
        store.create(job("a")).unwrap();
        let got = store.get(&JobId::parse("a").unwrap()).unwrap();
        assert_eq!(got.status, JobStatus::Queued);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_id_rejected() {
        let store = JobStore::new();
        store.create(job("a")).unwrap();
        let err = store.create(job("a")).unwrap_err();
        assert!(matches!(err, Error::DuplicateId { .. }));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = JobStore::new();
        assert!(store.get(&JobId::parse("nope").unwrap()).unwrap_err().is_not_found());
    }

    #[test]
    fn failed_update_is_not_committed() {
        let store = JobStore::new();
        store.create(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();

        let err = store
            .update(&id, |j| {
                j.original_filename = "changed.docx".into();
                j.transition(JobStatus::Completed, Utc::now())
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.original_filename, "a.docx");
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[test]
    fn delete_reports_whether_removed() {
        let store = JobStore::new();
        store.create(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();
        assert!(store.delete(&id).is_some());
        assert!(store.delete(&id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn counts_by_status() {
        let store = JobStore::new();
        store.create(job("a")).unwrap();
        store.create(job("b")).unwrap();
        store
            .update(&JobId::parse("b").unwrap(), |j| {
                j.transition(JobStatus::Processing, Utc::now())
            })
            .unwrap();

        let counts = store.counts();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.get(JobStatus::Processing), 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(JobStore::new());
        store.create(job("a")).unwrap();
        let id = JobId::parse("a").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store
                            .update(&id, |j| {
                                j.delivery_attempts += 1;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.get(&id).unwrap().delivery_attempts, 2000);
    }
}
