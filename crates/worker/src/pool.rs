use async_trait::async_trait;
use dispatch_core::{
    errors::{DispatchError, DispatchResult},
    models::{DispatchJob, QueueKind, WorkerStatus},
    traits::{DeviceReserver, JobOutcomeHandler, JobSink, MessageSender},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pacing::PacingPolicy;
use crate::status::WorkerStatusBoard;

pub const NO_DEVICE_REASON: &str = "no available device";

/// Collaborators shared by every worker of a pool
struct WorkerContext {
    queue: QueueKind,
    reserver: Arc<dyn DeviceReserver>,
    sender: Arc<dyn MessageSender>,
    outcome: Arc<dyn JobOutcomeHandler>,
    pacing: PacingPolicy,
    status: Arc<WorkerStatusBoard>,
    /// Jobs submitted and not yet finished, queued or running
    outstanding: AtomicUsize,
}

impl WorkerContext {
    async fn process(self: Arc<Self>, job: DispatchJob) {
        let queue = self.queue.as_str();
        let reservation = match self
            .reserver
            .reserve(job.preferred_device_id.as_deref())
            .await
        {
            Ok(reservation) => reservation,
            Err(e) => {
                let reason = match e {
                    DispatchError::NoDeviceAvailable(_) => NO_DEVICE_REASON.to_string(),
                    other => other.to_string(),
                };
                warn!(job_id = %job.id, queue, "Reservation failed: {}", reason);
                metrics::counter!("dispatch_jobs_failed_total", "queue" => queue, "reason" => "no_device")
                    .increment(1);
                self.report_failure(&job, &reason).await;
                return;
            }
        };

        let device_id = reservation.device_id().to_string();
        self.status.begin(&device_id).await;

        let delay = self.pacing.delay_for(job.pacing);
        if !delay.is_zero() {
            debug!(job_id = %job.id, device_id = %device_id, "Pacing for {:?}", delay);
            tokio::time::sleep(delay).await;
        }

        let started = Instant::now();
        let result = self
            .sender
            .send(&device_id, &job.recipient, &job.payload)
            .await;
        metrics::histogram!("dispatch_send_duration_ms", "queue" => queue)
            .record(started.elapsed().as_millis() as f64);

        if let Err(e) = reservation.release().await {
            warn!(device_id = %device_id, "Failed to release reservation: {}", e);
        }

        match result {
            Ok(()) => {
                metrics::counter!("dispatch_jobs_sent_total", "queue" => queue).increment(1);
                self.status.finish(&device_id, true).await;
                if let Err(e) = self.outcome.on_sent(&job, &device_id).await {
                    error!(job_id = %job.id, device_id = %device_id, "Failed to record sent job: {}", e);
                }
                debug!(job_id = %job.id, device_id = %device_id, queue, "Job sent");
            }
            Err(e) => {
                metrics::counter!("dispatch_jobs_failed_total", "queue" => queue, "reason" => "send")
                    .increment(1);
                self.status.finish(&device_id, false).await;
                warn!(job_id = %job.id, device_id = %device_id, "Send failed: {}", e);
                self.report_failure(&job, &e.to_string()).await;
            }
        }
    }

    async fn report_failure(&self, job: &DispatchJob, reason: &str) {
        if let Err(e) = self.outcome.on_failed(job, reason).await {
            error!(job_id = %job.id, "Failed to record failed job: {}", e);
        }
    }
}

/// Fixed-size worker pool draining one bounded queue
///
/// Each job goes through reserve, pacing delay, send, release and outcome
/// reporting. A failed reservation is reported immediately; there is no
/// synchronous retry. `close` stops intake and `join` waits until the queue
/// is drained.
///
/// `available_slots` counts idle workers. Schedulers claim at most that many
/// records per tick so a claimed record starts processing right away instead
/// of aging in the queue.
pub struct DispatchWorkerPool {
    worker_count: usize,
    ctx: Arc<WorkerContext>,
    tx: Mutex<Option<mpsc::Sender<DispatchJob>>>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

pub struct DispatchWorkerPoolBuilder {
    queue: QueueKind,
    worker_count: usize,
    capacity: usize,
    pacing: PacingPolicy,
    status: Option<Arc<WorkerStatusBoard>>,
}

impl DispatchWorkerPoolBuilder {
    pub fn new(queue: QueueKind) -> Self {
        Self {
            queue,
            worker_count: 10,
            capacity: 1000,
            pacing: PacingPolicy::random(10, 30),
            status: None,
        }
    }

    pub fn workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    /// Share one status board between pools
    pub fn status_board(mut self, status: Arc<WorkerStatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn build(
        self,
        reserver: Arc<dyn DeviceReserver>,
        sender: Arc<dyn MessageSender>,
        outcome: Arc<dyn JobOutcomeHandler>,
    ) -> DispatchWorkerPool {
        let (tx, rx) = mpsc::channel(self.capacity);
        DispatchWorkerPool {
            worker_count: self.worker_count,
            ctx: Arc::new(WorkerContext {
                queue: self.queue,
                reserver,
                sender,
                outcome,
                pacing: self.pacing,
                status: self.status.unwrap_or_default(),
                outstanding: AtomicUsize::new(0),
            }),
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handles: Mutex::new(Vec::new()),
        }
    }
}

impl DispatchWorkerPool {
    pub fn builder(queue: QueueKind) -> DispatchWorkerPoolBuilder {
        DispatchWorkerPoolBuilder::new(queue)
    }

    pub fn queue(&self) -> QueueKind {
        self.ctx.queue
    }

    /// Spawn the workers; calling it again is a no-op
    pub fn start(&self) {
        let Ok(mut handles) = self.handles.lock() else {
            return;
        };
        if !handles.is_empty() {
            return;
        }
        for worker_index in 0..self.worker_count {
            let rx = Arc::clone(&self.rx);
            let ctx = Arc::clone(&self.ctx);
            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_index, rx, ctx).await;
            }));
        }
        info!(
            queue = self.ctx.queue.as_str(),
            workers = self.worker_count,
            "Worker pool started"
        );
    }

    async fn worker_loop(
        worker_index: usize,
        rx: Arc<tokio::sync::Mutex<mpsc::Receiver<DispatchJob>>>,
        ctx: Arc<WorkerContext>,
    ) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else {
                break;
            };
            let job_id = job.id.clone();
            // 在独立任务中处理，发送器 panic 不会结束整个 worker
            if let Err(e) = tokio::spawn(Arc::clone(&ctx).process(job)).await {
                error!(job_id = %job_id, worker_index, "Job processing panicked: {}", e);
            }
            ctx.outstanding.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(queue = ctx.queue.as_str(), worker_index, "Worker exited");
    }

    /// Enqueue a job, waiting for capacity when the queue is full
    pub async fn submit(&self, job: DispatchJob) -> DispatchResult<()> {
        let tx = self
            .tx
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| DispatchError::PoolClosed(self.ctx.queue.to_string()))?;
        self.ctx.outstanding.fetch_add(1, Ordering::AcqRel);
        tx.send(job).await.map_err(|_| {
            self.ctx.outstanding.fetch_sub(1, Ordering::AcqRel);
            DispatchError::PoolClosed(self.ctx.queue.to_string())
        })
    }

    /// Idle workers; zero once the pool is closed
    pub fn available_slots(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.worker_count
            .saturating_sub(self.ctx.outstanding.load(Ordering::Acquire))
    }

    /// Stop accepting jobs; queued jobs are still processed
    pub fn close(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().map(|tx| tx.is_none()).unwrap_or(true)
    }

    /// Wait for every worker to exit. Call after `close`.
    pub async fn join(&self) {
        let handles = match self.handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => return,
        };
        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = self.ctx.queue.as_str(), "Worker task failed: {}", e);
            }
        }
        info!(queue = self.ctx.queue.as_str(), "Worker pool drained");
    }

    pub async fn shutdown(&self) {
        self.close();
        self.join().await;
    }

    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        self.ctx.status.snapshot().await
    }
}

#[async_trait]
impl JobSink for DispatchWorkerPool {
    async fn submit(&self, job: DispatchJob) -> DispatchResult<()> {
        DispatchWorkerPool::submit(self, job).await
    }

    fn available_slots(&self) -> usize {
        DispatchWorkerPool::available_slots(self)
    }
}
