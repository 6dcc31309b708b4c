use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AppResult, SchedulerError};

/// Queue capacity used when the caller passes 0: five slots per worker.
const QUEUE_SLOTS_PER_WORKER: usize = 5;

type TaskFn<T> = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, AppResult<T>> + Send>;

/// A unit of submitted work. Owned exclusively by the pool from submission
/// to completion.
struct Task<T> {
    cancel: CancellationToken,
    timeout: Duration,
    job: TaskFn<T>,
    result_tx: Option<oneshot::Sender<AppResult<T>>>,
}

/// Fixed-size pool of tokio workers consuming a single bounded FIFO queue.
///
/// `submit` awaits a bounded send, so a full queue suspends the caller until
/// a worker frees a slot. Per-task deadlines are advisory: on expiry the
/// worker cancels the task's token but never drops the running job future,
/// so a job that ignores its token keeps its worker busy.
pub struct TaskPool<T> {
    workers: usize,
    queue_capacity: usize,
    job_tx: parking_lot::Mutex<Option<mpsc::Sender<Task<T>>>>,
    job_rx: Arc<AsyncMutex<mpsc::Receiver<Task<T>>>>,
    shutdown_token: CancellationToken,
    worker_handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Create the bounded queue without starting any workers. A
    /// `queue_capacity` of 0 defaults to five slots per worker.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let workers = workers.max(1);
        let queue_capacity = if queue_capacity == 0 {
            workers * QUEUE_SLOTS_PER_WORKER
        } else {
            queue_capacity
        };

        let (job_tx, job_rx) = mpsc::channel(queue_capacity);

        Self {
            workers,
            queue_capacity,
            job_tx: parking_lot::Mutex::new(Some(job_tx)),
            job_rx: Arc::new(AsyncMutex::new(job_rx)),
            shutdown_token: CancellationToken::new(),
            worker_handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Launch the worker loops. Exactly one task runs per worker at a time,
    /// so at most `workers` tasks execute simultaneously regardless of how
    /// many are queued. Calling `start` twice is a logged no-op.
    pub fn start(&self) {
        let mut handles = self.worker_handles.lock();
        if !handles.is_empty() {
            warn!("task pool already started, ignoring");
            return;
        }

        for worker_id in 0..self.workers {
            let job_rx = Arc::clone(&self.job_rx);
            let shutdown = self.shutdown_token.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let task = {
                        let mut rx = job_rx.lock().await;
                        rx.recv().await
                    };

                    let Some(task) = task else {
                        debug!(worker_id, "task queue closed, worker exiting");
                        break;
                    };

                    Self::run_task(worker_id, task, &shutdown).await;
                }
            }));
        }

        info!(
            workers = self.workers,
            queue_capacity = self.queue_capacity,
            "task pool started"
        );
    }

    /// Enqueue a job for execution. The send is bounded, so this suspends
    /// when the queue is full - that is the pool's backpressure mechanism.
    ///
    /// With `expect_result` the returned receiver observes exactly one
    /// result; without it the task is fire-and-forget and failures are only
    /// logged by the worker.
    pub async fn submit<F, Fut>(
        &self,
        cancel: CancellationToken,
        timeout: Duration,
        job: F,
        expect_result: bool,
    ) -> AppResult<Option<oneshot::Receiver<AppResult<T>>>>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
    {
        let (result_tx, result_rx) = if expect_result {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let task = Task {
            cancel,
            timeout,
            job: Box::new(move |token| job(token).boxed()),
            result_tx,
        };

        // Clone the sender out of the lock so the send is not held across it.
        let sender = self
            .job_tx
            .lock()
            .clone()
            .ok_or(SchedulerError::Closed)?;

        sender
            .send(task)
            .await
            .map_err(|_| SchedulerError::Closed)?;

        Ok(result_rx)
    }

    async fn run_task(worker_id: usize, task: Task<T>, shutdown: &CancellationToken) {
        // Child of the submitter's token, so ancestor cancellation, the
        // task deadline and pool shutdown all funnel into one token.
        let task_token = task.cancel.child_token();

        let job_fut = (task.job)(task_token.clone());
        tokio::pin!(job_fut);

        let deadline = tokio::time::sleep(task.timeout);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                result = &mut job_fut => break result,
                _ = &mut deadline, if !task_token.is_cancelled() => {
                    debug!(worker_id, "task deadline expired, cancelling token");
                    task_token.cancel();
                }
                _ = shutdown.cancelled(), if !task_token.is_cancelled() => {
                    debug!(worker_id, "pool shutting down, cancelling task token");
                    task_token.cancel();
                }
            }
        };

        match task.result_tx {
            Some(tx) => {
                // The submitter may have dropped the receiver; that loses
                // the result but is not a worker failure.
                let _ = tx.send(result);
            }
            None => {
                if let Err(err) = result {
                    warn!(worker_id, error = %err, "fire-and-forget task failed");
                }
            }
        }
    }

    /// Stop the pool: close intake (subsequent submits fail, queued tasks
    /// still drain), wait up to `grace` for the workers to finish, then
    /// cancel the pool token so cooperative in-flight jobs stop, and join
    /// the workers to completion.
    pub async fn shutdown(&self, grace: Duration) {
        info!("shutting down task pool");

        // Dropping the sender closes the queue once in-flight submits finish.
        self.job_tx.lock().take();

        let handles = std::mem::take(&mut *self.worker_handles.lock());
        if handles.is_empty() {
            return;
        }

        let mut drained = join_all(handles);
        if tokio::time::timeout(grace, &mut drained).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "grace period expired, cancelling in-flight tasks"
            );
            self.shutdown_token.cancel();
            drained.await;
        }

        info!("task pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ReconcileError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn fresh_pool(workers: usize, queue: usize) -> TaskPool<usize> {
        let pool = TaskPool::new(workers, queue);
        pool.start();
        pool
    }

    #[test]
    fn test_queue_capacity_defaults_to_five_per_worker() {
        let pool: TaskPool<()> = TaskPool::new(3, 0);
        assert_eq!(pool.queue_capacity(), 15);

        let pool: TaskPool<()> = TaskPool::new(3, 7);
        assert_eq!(pool.queue_capacity(), 7);
    }

    #[tokio::test]
    async fn test_result_channel_observes_exactly_one_result() {
        let pool = fresh_pool(1, 0);

        let rx = pool
            .submit(
                CancellationToken::new(),
                Duration::from_secs(5),
                |_| async { Ok(42) },
                true,
            )
            .await
            .unwrap()
            .expect("expect_result=true must return a receiver");

        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fire_and_forget_returns_no_receiver() {
        let pool = fresh_pool(1, 0);
        let ran = Arc::new(Notify::new());
        let signal = ran.clone();

        let rx = pool
            .submit(
                CancellationToken::new(),
                Duration::from_secs(5),
                move |_| async move {
                    signal.notify_one();
                    Ok(0)
                },
                false,
            )
            .await
            .unwrap();

        assert!(rx.is_none());
        ran.notified().await;
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_worker_count() {
        let workers = 2;
        let pool = fresh_pool(workers, 0);

        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let mut receivers = Vec::new();
        for _ in 0..8 {
            let running = running.clone();
            let max_running = max_running.clone();
            let rx = pool
                .submit(
                    CancellationToken::new(),
                    Duration::from_secs(5),
                    move |_| async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        max_running.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(0)
                    },
                    true,
                )
                .await
                .unwrap()
                .unwrap();
            receivers.push(rx);
        }

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert!(max_running.load(Ordering::SeqCst) <= workers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_blocks_on_full_queue_until_slot_frees() {
        let pool = Arc::new(TaskPool::<usize>::new(1, 1));
        pool.start();

        let release = Arc::new(Notify::new());

        // Occupy the single worker until released.
        let gate = release.clone();
        pool.submit(
            CancellationToken::new(),
            Duration::from_secs(60),
            move |_| async move {
                gate.notified().await;
                Ok(0)
            },
            false,
        )
        .await
        .unwrap();

        // Fill the single queue slot.
        pool.submit(
            CancellationToken::new(),
            Duration::from_secs(60),
            |_| async { Ok(0) },
            false,
        )
        .await
        .unwrap();

        // The next submit must suspend: queue is full, worker is busy.
        let blocked_pool = pool.clone();
        let blocked = tokio::spawn(async move {
            blocked_pool
                .submit(
                    CancellationToken::new(),
                    Duration::from_secs(60),
                    |_| async { Ok(7) },
                    true,
                )
                .await
                .unwrap()
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "submit should block on a full queue");

        // Free the worker; the queued task runs, a slot opens, the blocked
        // submit completes and its task eventually finishes.
        release.notify_one();
        let rx = blocked.await.unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails_closed() {
        let pool = fresh_pool(1, 0);
        pool.shutdown(Duration::from_secs(1)).await;

        let err = pool
            .submit(
                CancellationToken::new(),
                Duration::from_secs(1),
                |_| async { Ok(0) },
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Scheduler(SchedulerError::Closed)));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_tasks() {
        let pool = fresh_pool(1, 8);
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let completed = completed.clone();
            pool.submit(
                CancellationToken::new(),
                Duration::from_secs(5),
                move |_| async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                },
                false,
            )
            .await
            .unwrap();
        }

        pool.shutdown(Duration::from_secs(5)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_cooperative_stragglers_after_grace() {
        let pool = fresh_pool(1, 0);

        let rx = pool
            .submit(
                CancellationToken::new(),
                Duration::from_secs(3600),
                |token| async move {
                    token.cancelled().await;
                    Err(ReconcileError::Cancelled {
                        number: "straggler".to_string(),
                    }
                    .into())
                },
                true,
            )
            .await
            .unwrap()
            .unwrap();

        pool.shutdown(Duration::from_millis(100)).await;

        let result = rx.await.unwrap();
        assert!(matches!(
            result,
            Err(AppError::Reconcile(ReconcileError::Cancelled { .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_task_token() {
        let pool = fresh_pool(1, 0);

        let rx = pool
            .submit(
                CancellationToken::new(),
                Duration::from_millis(10),
                |token| async move {
                    token.cancelled().await;
                    Err(ReconcileError::Cancelled {
                        number: "slow".to_string(),
                    }
                    .into())
                },
                true,
            )
            .await
            .unwrap()
            .unwrap();

        let result = rx.await.unwrap();
        assert!(matches!(
            result,
            Err(AppError::Reconcile(ReconcileError::Cancelled { .. }))
        ));
    }

    #[tokio::test]
    async fn test_ancestor_cancellation_reaches_task() {
        let pool = fresh_pool(1, 0);
        let parent = CancellationToken::new();

        let rx = pool
            .submit(
                parent.clone(),
                Duration::from_secs(3600),
                |token| async move {
                    token.cancelled().await;
                    Ok(99)
                },
                true,
            )
            .await
            .unwrap()
            .unwrap();

        parent.cancel();
        assert_eq!(rx.await.unwrap().unwrap(), 99);
    }
}
