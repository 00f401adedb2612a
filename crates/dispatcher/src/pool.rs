//! WorkerPool - bounded async executor for prediction calls
//!
//! `core_size` workers start immediately and share one bounded MPMC queue.
//! When a submission finds the queue full the pool adds workers up to
//! `max_size`, then the submitter waits for a free slot. Tasks are never
//! dropped once accepted.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use contracts::{CorrelationContext, PredictionClient, PredictionRequest, WorkerPoolConfig};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::{PoolMetrics, PoolSnapshot};

/// Idle time after which a worker above `core_size` retires
pub const IDLE_WORKER_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// One queued prediction call
#[derive(Debug, Clone)]
pub struct PredictionTask {
    pub request: PredictionRequest,
    pub ctx: CorrelationContext,
}

/// How [`WorkerPool::shutdown`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Queue drained and all workers exited
    Drained,
    /// Timeout hit; remaining workers aborted
    TimedOut { aborted: usize },
}

/// Bounded prediction worker pool
pub struct WorkerPool<P> {
    client: Arc<P>,
    tx: Sender<PredictionTask>,
    rx: Receiver<PredictionTask>,
    workers: Mutex<JoinSet<()>>,
    metrics: Arc<PoolMetrics>,
    core_size: usize,
    max_size: usize,
}

impl<P> WorkerPool<P>
where
    P: PredictionClient + Sync + 'static,
{
    /// Create the queue and spawn `core_size` workers
    ///
    /// Must be called inside a tokio runtime.
    #[instrument(
        name = "worker_pool_start",
        skip(client, config),
        fields(
            endpoint = client.endpoint(),
            core = config.core_size,
            max = config.max_size,
            queue = config.queue_capacity
        )
    )]
    pub fn start(client: Arc<P>, config: &WorkerPoolConfig) -> Self {
        let (tx, rx) = async_channel::bounded(config.queue_capacity.max(1));
        let core_size = config.core_size.max(1);
        let pool = Self {
            client,
            tx,
            rx,
            workers: Mutex::new(JoinSet::new()),
            metrics: Arc::new(PoolMetrics::new()),
            core_size,
            max_size: config.max_size.max(core_size),
        };

        for _ in 0..core_size {
            pool.spawn_worker(true);
        }
        info!(workers = pool.metrics.workers(), "worker pool started");
        pool
    }

    /// Enqueue one prediction call
    ///
    /// Returns once the task is queued. Blocks (asynchronously) while the queue
    /// is full and the pool is at `max_size`.
    ///
    /// # Errors
    /// `PoolClosed` after [`shutdown`](Self::shutdown) started
    pub async fn submit(
        &self,
        request: PredictionRequest,
        ctx: CorrelationContext,
    ) -> Result<(), DispatcherError> {
        let task = PredictionTask { request, ctx };
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => return Err(DispatcherError::PoolClosed),
            Err(TrySendError::Full(task)) => {
                self.metrics.inc_blocked();
                observability::record_pool_backpressure();

                if self.metrics.workers() < self.max_size {
                    self.spawn_worker(false);
                }
                debug!(
                    trace_id = %task.ctx.trace_id(),
                    workers = self.metrics.workers(),
                    "queue full, waiting for a slot"
                );
                self.tx
                    .send(task)
                    .await
                    .map_err(|_| DispatcherError::PoolClosed)?;
            }
        }

        self.metrics.inc_submitted();
        self.observe_queue();
        Ok(())
    }

    /// Stop accepting, drain the queue, wait up to `timeout`
    ///
    /// Workers still running after `timeout` are aborted.
    #[instrument(name = "worker_pool_shutdown", skip(self), fields(queued = self.tx.len()))]
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.tx.close();
        let mut workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "prediction worker panicked");
                    }
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!(metrics = ?self.metrics.snapshot(), "worker pool drained");
                ShutdownReport::Drained
            }
            Err(_) => {
                let aborted = workers.len();
                workers.shutdown().await;
                warn!(
                    aborted,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker pool shutdown timed out"
                );
                ShutdownReport::TimedOut { aborted }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn core_size(&self) -> usize {
        self.core_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.observe_queue();
        self.metrics.snapshot()
    }

    fn observe_queue(&self) {
        let len = self.tx.len();
        self.metrics.set_queue_len(len);
        observability::record_pool_queue_depth(len);
    }

    /// Worker tasks still held by the pool, finished or not
    #[cfg(test)]
    fn tracked_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn spawn_worker(&self, core: bool) {
        let Some(count) = self.metrics.try_add_worker(self.max_size) else {
            return;
        };
        observability::record_pool_workers(count);

        let worker = Worker {
            id: count,
            core,
            client: Arc::clone(&self.client),
            rx: self.rx.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        // 回收已退休的扩容 worker
        while let Some(result) = workers.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "prediction worker ended abnormally");
            }
        }
        workers.spawn(worker.run());
        drop(workers);
        if !core {
            info!(workers = count, max = self.max_size, "worker pool grew");
        }
    }
}

struct Worker<P> {
    id: usize,
    core: bool,
    client: Arc<P>,
    rx: Receiver<PredictionTask>,
    metrics: Arc<PoolMetrics>,
}

impl<P> Worker<P>
where
    P: PredictionClient + Sync + 'static,
{
    async fn run(self) {
        debug!(worker = self.id, core = self.core, "prediction worker started");
        while let Some(task) = self.next_task().await {
            let span = task.ctx.span("predict");
            self.execute(task).instrument(span).await;
        }
        self.metrics.remove_worker();
        observability::record_pool_workers(self.metrics.workers());
        debug!(worker = self.id, "prediction worker stopped");
    }

    /// Next task, or `None` when the queue is closed and empty or an extra
    /// worker stayed idle for [`IDLE_WORKER_KEEP_ALIVE`]
    async fn next_task(&self) -> Option<PredictionTask> {
        if self.core {
            return self.rx.recv().await.ok();
        }
        match tokio::time::timeout(IDLE_WORKER_KEEP_ALIVE, self.rx.recv()).await {
            Ok(task) => task.ok(),
            Err(_) => match self.rx.try_recv() {
                Ok(task) => Some(task),
                Err(TryRecvError::Empty | TryRecvError::Closed) => None,
            },
        }
    }

    async fn execute(&self, task: PredictionTask) {
        let sensor_type = task.request.sensor_type.as_str();
        let started = Instant::now();
        let result = self.client.predict(&task.request, &task.ctx).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(()) => {
                self.metrics.inc_completed();
                observability::record_prediction(sensor_type, "ok", latency_ms);
                debug!(sensor_type, latency_ms, "prediction delivered");
            }
            Err(contracts::ContractError::DispatchRejected { status, body }) => {
                self.metrics.inc_rejected();
                observability::record_prediction(sensor_type, "rejected", latency_ms);
                error!(
                    sensor_type,
                    status,
                    body = %body,
                    endpoint = self.client.endpoint(),
                    "prediction rejected"
                );
            }
            Err(e) => {
                self.metrics.inc_failed();
                observability::record_prediction(sensor_type, "failed", latency_ms);
                error!(
                    sensor_type,
                    error = %e,
                    endpoint = self.client.endpoint(),
                    "prediction failed"
                );
            }
        }
    }
}
