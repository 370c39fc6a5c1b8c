//! Authoritative in-memory table of jobs.
//!
//! Every mutation happens under one write lock and is followed by a
//! [`JobProgressEvent`] so subscribers observe transitions in order.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::InputFormat;
use crate::error::LookupError;
use crate::jobs::model::{Job, JobPhase, JobResult, JobStatus};

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    broadcaster: JobProgressBroadcaster,
}

impl JobRegistry {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            broadcaster,
        }
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| {
            log::warn!("Job registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Applies `f` to a job and broadcasts the result. Returns `None` for
    /// unknown ids and whatever `f` returns otherwise; `f` returning `false`
    /// means the job was left untouched and no event is sent.
    fn mutate<F>(&self, job_id: &str, f: F) -> Option<bool>
    where
        F: FnOnce(&mut Job) -> bool,
    {
        let mut jobs = self.write();
        let job = jobs.get_mut(job_id)?;
        let changed = f(job);
        if changed {
            self.broadcaster.send(JobProgressEvent::from_job(job));
        }
        Some(changed)
    }

    /// Inserts a queued job and returns its 1-based position among queued jobs.
    pub fn insert(&self, mut job: Job) -> usize {
        let mut jobs = self.write();
        let position = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count()
            + 1;
        job.message = format!("Queued for processing (position: {})", position);
        self.broadcaster.send(JobProgressEvent::from_job(&job));
        jobs.insert(job.id.clone(), job);
        position
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.read().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read().contains_key(job_id)
    }

    pub fn status_of(&self, job_id: &str) -> Option<JobStatus> {
        self.read().get(job_id).map(|j| j.status)
    }

    /// `queued -> processing`. Returns the job as it now stands, or `None`
    /// when the id is unknown or the job is not queued.
    pub fn mark_processing(&self, job_id: &str) -> Option<Job> {
        let mut jobs = self.write();
        let job = jobs.get_mut(job_id)?;
        if job.status != JobStatus::Queued {
            return None;
        }
        job.status = JobStatus::Processing;
        job.phase = JobPhase::Validating;
        job.started_at = Some(Utc::now());
        job.message = JobPhase::Validating.to_string();
        self.broadcaster.send(JobProgressEvent::from_job(job));
        Some(job.clone())
    }

    /// Records progress for a processing job. Progress never decreases and
    /// updates to jobs that are not processing are ignored.
    pub fn update_progress(
        &self,
        job_id: &str,
        phase: JobPhase,
        progress: u8,
        message: &str,
    ) -> bool {
        self.mutate(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            let progress = progress.min(100).max(job.progress);
            if progress == job.progress && phase == job.phase && message == job.message {
                return false;
            }
            job.progress = progress;
            job.phase = phase;
            job.message = message.to_string();
            true
        })
        .unwrap_or(false)
    }

    /// Records the format of a source typed after admission, e.g. a download.
    pub fn set_input_format(&self, job_id: &str, format: InputFormat) -> bool {
        self.mutate(job_id, |job| {
            if job.status != JobStatus::Processing || job.input_format == Some(format) {
                return false;
            }
            job.input_format = Some(format);
            true
        })
        .unwrap_or(false)
    }

    pub fn complete(
        &self,
        job_id: &str,
        result: JobResult,
        confidence: Option<f64>,
        message: &str,
    ) -> bool {
        self.mutate(job_id, |job| {
            if job.status != JobStatus::Processing {
                return false;
            }
            job.status = JobStatus::Completed;
            job.phase = JobPhase::Completed;
            job.progress = 100;
            job.message = message.to_string();
            job.confidence = confidence;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            true
        })
        .unwrap_or(false)
    }

    /// Fails a non-terminal job. Terminal jobs are left untouched.
    pub fn fail(&self, job_id: &str, error: &str) -> bool {
        self.mutate(job_id, |job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Failed;
            job.phase = JobPhase::Failed;
            job.message = format!("Conversion failed: {}", error);
            job.error = Some(error.to_string());
            job.completed_at = Some(Utc::now());
            true
        })
        .unwrap_or(false)
    }

    /// Removes a job unless a worker currently owns it.
    pub fn remove(&self, job_id: &str) -> Result<Job, LookupError> {
        let mut jobs = self.write();
        match jobs.get(job_id).map(|j| j.status) {
            None => Err(LookupError::NotFound(job_id.to_string())),
            Some(JobStatus::Processing) => Err(LookupError::Busy {
                job_id: job_id.to_string(),
            }),
            Some(_) => {
                let job = jobs
                    .remove(job_id)
                    .ok_or_else(|| LookupError::NotFound(job_id.to_string()))?;
                self.broadcaster.send(JobProgressEvent::deleted(&job));
                Ok(job)
            }
        }
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.read().values().filter(|j| j.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(JobProgressBroadcaster::default())
    }
}
