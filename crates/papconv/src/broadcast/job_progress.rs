//! Job progress broadcaster for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::jobs::{Job, JobPhase, JobStatus};

/// Snapshot of a job emitted on every registry transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub phase: JobPhase,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Set once the job completed and the engine reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True for the final event of a deleted job.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

impl JobProgressEvent {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            filename: job.filename.clone(),
            status: job.status,
            phase: job.phase,
            progress: job.progress,
            message: job.message.clone(),
            timestamp: Utc::now(),
            confidence: job.confidence,
            error: job.error.clone(),
            deleted: false,
        }
    }

    pub fn deleted(job: &Job) -> Self {
        Self {
            message: "Job deleted".to_string(),
            deleted: true,
            ..Self::from_job(job)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.deleted || self.status.is_terminal()
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionSettings;
    use crate::jobs::JobSource;

    fn job() -> Job {
        Job::new(
            JobSource::Url {
                url: "https://example.com/a.md".to_string(),
            },
            ConversionSettings::default(),
        )
    }

    #[test]
    fn test_subscriber_receives_events() {
        let broadcaster = JobProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();

        let job = job();
        broadcaster.send(JobProgressEvent::from_job(&job));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.status, JobStatus::Queued);
        assert_eq!(event.filename, "a.md");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_send_without_subscribers_is_ignored() {
        let broadcaster = JobProgressBroadcaster::default();
        assert_eq!(broadcaster.receiver_count(), 0);
        broadcaster.send(JobProgressEvent::from_job(&job()));
    }

    #[test]
    fn test_deleted_event_is_terminal() {
        let event = JobProgressEvent::deleted(&job());
        assert!(event.is_terminal());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["deleted"], true);
    }
}
