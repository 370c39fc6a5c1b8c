use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::jobs::{Job, JobRegistry};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs one admitted job to a terminal state. Called on a worker thread.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: Job);
}

/// Cloneable admission handle. Appending never blocks.
#[derive(Clone)]
pub struct JobQueue {
    sender: Sender<String>,
    shutdown: Arc<AtomicBool>,
}

impl JobQueue {
    pub fn enqueue(&self, job_id: &str) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.sender
            .send(job_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Jobs waiting for a free slot.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Fixed set of worker slots fed from one FIFO admission queue.
///
/// A single dispatcher thread owns the order: it waits for a free slot, takes
/// the queue head, moves the job to `processing` in the registry and hands it
/// to that slot's worker. Jobs removed from the registry while queued are
/// skipped.
pub struct WorkerPool {
    queue: JobQueue,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(
        registry: Arc<JobRegistry>,
        handler: Arc<dyn JobHandler>,
        worker_count: usize,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (queue_tx, queue_rx) = unbounded::<String>();
        let (slot_tx, slot_rx) = bounded::<usize>(worker_count);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        let mut hand_offs = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (job_tx, job_rx) = bounded::<Job>(1);
            let worker_registry = Arc::clone(&registry);
            let worker_handler = Arc::clone(&handler);
            let worker_slots = slot_tx.clone();

            let handle = thread::Builder::new()
                .name(format!("papconv-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        worker_slots,
                        worker_registry,
                        worker_handler,
                    );
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            slot_tx
                .send(worker_id)
                .map_err(|_| WorkerError::ChannelClosed)?;
            hand_offs.push(job_tx);
            workers.push(handle);
        }

        let dispatcher_shutdown = Arc::clone(&shutdown);
        let dispatcher = thread::Builder::new()
            .name("papconv-dispatcher".to_string())
            .spawn(move || {
                run_dispatcher(
                    queue_rx,
                    slot_rx,
                    slot_tx,
                    hand_offs,
                    registry,
                    dispatcher_shutdown,
                );
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        info!("Started {} workers", worker_count);

        Ok(Self {
            queue: JobQueue {
                sender: queue_tx,
                shutdown: Arc::clone(&shutdown),
            },
            dispatcher,
            workers,
            shutdown,
        })
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn enqueue(&self, job_id: &str) -> Result<(), WorkerError> {
        self.queue.enqueue(job_id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops admission and dispatch. Jobs already handed to a worker finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        if let Err(e) = self.dispatcher.join() {
            error!("Dispatcher panicked: {:?}", e);
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_dispatcher(
    queue: Receiver<String>,
    free_slots: Receiver<usize>,
    slot_sender: Sender<usize>,
    hand_offs: Vec<Sender<Job>>,
    registry: Arc<JobRegistry>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("Dispatcher started");

    'dispatch: loop {
        let slot = loop {
            if shutdown.load(Ordering::Relaxed) {
                break 'dispatch;
            }
            match free_slots.recv_timeout(POLL_INTERVAL) {
                Ok(slot) => break slot,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break 'dispatch,
            }
        };

        let job_id = loop {
            if shutdown.load(Ordering::Relaxed) {
                break 'dispatch;
            }
            match queue.recv_timeout(POLL_INTERVAL) {
                Ok(job_id) => break job_id,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break 'dispatch,
            }
        };

        let Some(job) = registry.mark_processing(&job_id) else {
            debug!("Skipping job {}: no longer queued", job_id);
            let _ = slot_sender.send(slot);
            continue;
        };

        debug!("Dispatching job {} to worker {}", job_id, slot);
        if hand_offs[slot].send(job).is_err() {
            error!("Worker {} is gone, failing job {}", slot, job_id);
            registry.fail(&job_id, "Worker exited unexpectedly");
        }
    }

    let waiting = queue.len();
    if waiting > 0 {
        warn!("Dispatcher stopped with {} jobs still queued", waiting);
    }
    debug!("Dispatcher stopped");
    // Dropping the hand-off senders lets idle workers exit.
}

fn run_worker(
    worker_id: usize,
    jobs: Receiver<Job>,
    free_slots: Sender<usize>,
    registry: Arc<JobRegistry>,
    handler: Arc<dyn JobHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        match jobs.recv_timeout(POLL_INTERVAL) {
            Ok(job) => {
                let job_id = job.id.clone();
                debug!("Worker {} processing job {}", worker_id, job_id);

                let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(job)));
                if outcome.is_err() {
                    error!(
                        "Worker {} panicked while handling job {}",
                        worker_id,
                        job_id
                    );
                    registry.fail(&job_id, "Worker panicked while converting");
                }

                // The dispatcher may already be gone during shutdown.
                let _ = free_slots.send(worker_id);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} hand-off channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionSettings;
    use crate::config::ExportFormat;
    use crate::jobs::{JobResult, JobSource, JobStatus};
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Sleeps, records the order jobs started in and the peak concurrency.
    struct SleepHandler {
        registry: Arc<JobRegistry>,
        delay: Duration,
        started: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SleepHandler {
        fn new(registry: Arc<JobRegistry>, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                registry,
                delay: Duration::from_millis(delay_ms),
                started: Mutex::new(Vec::new()),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    impl JobHandler for SleepHandler {
        fn handle(&self, job: Job) {
            self.started.lock().unwrap().push(job.filename.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if job.filename.starts_with("panic") {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("boom");
            }

            thread::sleep(self.delay);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.registry.complete(
                &job.id,
                JobResult {
                    formats_available: vec![ExportFormat::Markdown],
                    default_format: ExportFormat::Markdown,
                    page_count: 1,
                    images_count: 0,
                    tables_count: 0,
                    chunks_count: 0,
                    preview: String::new(),
                    warnings: vec![],
                },
                None,
                "done",
            );
        }
    }

    fn submit(registry: &JobRegistry, pool: &WorkerPool, name: &str) -> String {
        let job = Job::new(
            JobSource::File {
                path: PathBuf::from(format!("/tmp/{}", name)),
                original_filename: name.to_string(),
                size: 1,
            },
            ConversionSettings::default(),
        );
        let id = job.id.clone();
        registry.insert(job);
        pool.enqueue(&id).unwrap();
        id
    }

    fn wait_for_terminal(registry: &JobRegistry, ids: &[String]) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if ids
                .iter()
                .all(|id| registry.status_of(id).map(|s| s.is_terminal()).unwrap_or(true))
            {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("jobs did not finish in time");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let registry = Arc::new(JobRegistry::default());
        let handler = SleepHandler::new(Arc::clone(&registry), 0);
        assert!(WorkerPool::new(registry, handler, 0).is_err());
    }

    #[test]
    fn test_pool_shutdown_without_jobs() {
        let registry = Arc::new(JobRegistry::default());
        let handler = SleepHandler::new(Arc::clone(&registry), 0);
        let pool = WorkerPool::new(registry, handler, 2).unwrap();
        assert_eq!(pool.worker_count(), 2);
        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(pool.enqueue("late").is_err());
        pool.wait();
    }

    #[test]
    fn test_fifo_order_and_slot_bound() {
        let registry = Arc::new(JobRegistry::default());
        let handler = SleepHandler::new(Arc::clone(&registry), 50);
        let pool = WorkerPool::new(Arc::clone(&registry), handler.clone(), 2).unwrap();

        let names: Vec<String> = (0..6).map(|i| format!("doc{}.txt", i)).collect();
        let ids: Vec<String> = names.iter().map(|n| submit(&registry, &pool, n)).collect();

        wait_for_terminal(&registry, &ids);
        assert_eq!(*handler.started.lock().unwrap(), names);
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert!(ids
            .iter()
            .all(|id| registry.status_of(id) == Some(JobStatus::Completed)));

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_deleted_queued_job_is_skipped() {
        let registry = Arc::new(JobRegistry::default());
        let handler = SleepHandler::new(Arc::clone(&registry), 100);
        let pool = WorkerPool::new(Arc::clone(&registry), handler.clone(), 1).unwrap();

        let first = submit(&registry, &pool, "first.txt");
        let second = submit(&registry, &pool, "second.txt");
        let third = submit(&registry, &pool, "third.txt");
        registry.remove(&second).unwrap();

        wait_for_terminal(&registry, &[first, third]);
        let started = handler.started.lock().unwrap().clone();
        assert_eq!(started, vec!["first.txt", "third.txt"]);

        pool.shutdown();
        pool.wait();
    }

    #[test]
    fn test_handler_panic_fails_job_and_frees_slot() {
        let registry = Arc::new(JobRegistry::default());
        let handler = SleepHandler::new(Arc::clone(&registry), 0);
        let pool = WorkerPool::new(Arc::clone(&registry), handler, 1).unwrap();

        let bad = submit(&registry, &pool, "panic.txt");
        let good = submit(&registry, &pool, "after.txt");
        wait_for_terminal(&registry, &[bad.clone(), good.clone()]);

        assert_eq!(registry.status_of(&bad), Some(JobStatus::Failed));
        assert_eq!(registry.status_of(&good), Some(JobStatus::Completed));

        pool.shutdown();
        pool.wait();
    }
}
