//! Bounded-concurrency executor for batches produced by
//! [`crate::accumulator::BatchAccumulator`]. Failed batches are retried with
//! exponential backoff and jitter, re-entering the queue ahead of new work
//! but gated by their backoff delay so the pool keeps making progress on
//! other batches while a retry waits.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use rand::Rng;
use tokio::sync::{oneshot, Notify};

pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
pub type BatchHandler<T> = Arc<dyn Fn(T) -> BoxFuture + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

/// Outcome of one batch's full lifetime in the pool, including any retries.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub success: bool,
    pub retry_count: u32,
    pub error: Option<String>,
}

fn backoff_delay(config: &WorkerPoolConfig, attempt: u32) -> Duration {
    let base = config.retry_base_delay.as_secs_f64();
    let exp = base * 2f64.powi(attempt as i32 - 1);
    let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.3);
    let delay = (exp * jitter).min(config.retry_max_delay.as_secs_f64());
    Duration::from_secs_f64(delay.max(0.0))
}

struct Job<T> {
    batch: T,
    attempt: u32,
    result_tx: oneshot::Sender<BatchResult>,
}

struct QueueState<T> {
    queue: VecDeque<Job<T>>,
    active: usize,
    shutting_down: bool,
}

struct PoolInner<T> {
    config: WorkerPoolConfig,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    handler: BatchHandler<T>,
    on_completion: Option<Arc<dyn Fn(&BatchResult) + Send + Sync>>,
    on_queue_change: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

impl<T: Clone + Send + 'static> PoolInner<T> {
    fn report_queue_depth(&self) {
        if let Some(cb) = &self.on_queue_change {
            cb(self.state.lock().unwrap().queue.len());
        }
    }

    fn try_dispatch(self: &Arc<Self>) {
        let mut to_spawn = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            while !guard.shutting_down && guard.active < self.config.concurrency {
                let Some(job) = guard.queue.pop_front() else {
                    break;
                };
                guard.active += 1;
                to_spawn.push(job);
            }
        }
        if !to_spawn.is_empty() {
            self.report_queue_depth();
        }
        for job in to_spawn {
            Self::spawn_job(self.clone(), job);
        }
    }

    fn finish_active(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.active = guard.active.saturating_sub(1);
    }

    fn spawn_job(this: Arc<Self>, job: Job<T>) {
        tokio::spawn(async move {
            let outcome = (this.handler)(job.batch.clone()).await;
            match outcome {
                Ok(()) => {
                    let result = BatchResult {
                        success: true,
                        retry_count: job.attempt,
                        error: None,
                    };
                    this.finish_active();
                    if let Some(cb) = &this.on_completion {
                        cb(&result);
                    }
                    let _ = job.result_tx.send(result);
                    this.notify.notify_waiters();
                    this.try_dispatch();
                }
                Err(err) => {
                    if job.attempt < this.config.max_retries {
                        let next_attempt = job.attempt + 1;
                        let delay = backoff_delay(&this.config, next_attempt);
                        warn!(
                            "worker pool retrying batch (attempt {}/{}) after {:?}: {}",
                            next_attempt, this.config.max_retries, delay, err
                        );
                        this.finish_active();
                        this.notify.notify_waiters();
                        this.try_dispatch();

                        let retry_this = this.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let mut guard = retry_this.state.lock().unwrap();
                            if guard.shutting_down {
                                drop(guard);
                                let _ = job.result_tx.send(BatchResult {
                                    success: false,
                                    retry_count: job.attempt,
                                    error: Some("WorkerPool force shutdown".to_string()),
                                });
                            } else {
                                guard.queue.push_front(Job {
                                    batch: job.batch,
                                    attempt: next_attempt,
                                    result_tx: job.result_tx,
                                });
                                drop(guard);
                            }
                            retry_this.notify.notify_waiters();
                            retry_this.report_queue_depth();
                            retry_this.try_dispatch();
                        });
                    } else {
                        let result = BatchResult {
                            success: false,
                            retry_count: job.attempt,
                            error: Some(err),
                        };
                        this.finish_active();
                        if let Some(cb) = &this.on_completion {
                            cb(&result);
                        }
                        let _ = job.result_tx.send(result);
                        this.notify.notify_waiters();
                        this.try_dispatch();
                    }
                }
            }
        });
    }
}

/// A bounded-concurrency queue of batches, each run through a fixed handler
/// with retry-with-backoff on failure.
pub struct WorkerPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Clone + Send + 'static> WorkerPool<T> {
    pub fn new(config: WorkerPoolConfig, handler: BatchHandler<T>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    active: 0,
                    shutting_down: false,
                }),
                notify: Notify::new(),
                handler,
                on_completion: None,
                on_queue_change: None,
            }),
        }
    }

    #[must_use]
    pub fn with_completion_callback(mut self, cb: impl Fn(&BatchResult) + Send + Sync + 'static) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("callbacks must be attached before the pool is shared")
            .on_completion = Some(Arc::new(cb));
        self
    }

    #[must_use]
    pub fn with_queue_change_callback(mut self, cb: impl Fn(usize) + Send + Sync + 'static) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("callbacks must be attached before the pool is shared")
            .on_queue_change = Some(Arc::new(cb));
        self
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().unwrap().active
    }

    /// Enqueues a batch and returns a future resolving once it succeeds,
    /// exhausts its retries, or the pool is force-shut-down.
    pub async fn submit(&self, batch: T) -> BatchResult {
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.inner.state.lock().unwrap();
            if guard.shutting_down {
                let _ = tx.send(BatchResult {
                    success: false,
                    retry_count: 0,
                    error: Some("WorkerPool is shutting down".to_string()),
                });
            } else {
                guard.queue.push_back(Job {
                    batch,
                    attempt: 0,
                    result_tx: tx,
                });
            }
        }
        self.inner.report_queue_depth();
        self.inner.try_dispatch();
        rx.await.unwrap_or(BatchResult {
            success: false,
            retry_count: 0,
            error: Some("WorkerPool dropped the result channel".to_string()),
        })
    }

    /// Waits until the queue is empty and no handler is running.
    pub async fn drain(&self) {
        loop {
            {
                let guard = self.inner.state.lock().unwrap();
                if guard.queue.is_empty() && guard.active == 0 {
                    return;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Stops accepting new submissions, then waits for in-flight and queued
    /// work to finish normally.
    pub async fn shutdown(&self) {
        self.inner.state.lock().unwrap().shutting_down = true;
        self.drain().await;
    }

    /// Stops accepting new submissions and immediately resolves every
    /// still-queued batch with `success: false`. Never rejects; in-flight
    /// handlers are left to finish on their own.
    pub fn force_shutdown(&self) {
        let drained: Vec<Job<T>> = {
            let mut guard = self.inner.state.lock().unwrap();
            guard.shutting_down = true;
            guard.queue.drain(..).collect()
        };
        self.inner.report_queue_depth();
        for job in drained {
            let result = BatchResult {
                success: false,
                retry_count: job.attempt,
                error: Some("WorkerPool force shutdown".to_string()),
            };
            if let Some(cb) = &self.inner.on_completion {
                cb(&result);
            }
            let _ = job.result_tx.send(result);
        }
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always_ok() -> BatchHandler<u32> {
        Arc::new(|_: u32| Box::pin(async { Ok(()) }))
    }

    #[tokio::test]
    async fn submit_resolves_success_for_working_handler() {
        let pool = WorkerPool::new(WorkerPoolConfig::default(), always_ok());
        let result = pool.submit(1).await;
        assert!(result.success);
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn concurrency_cap_limits_simultaneous_handlers() {
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));
        let c1 = concurrent.clone();
        let m1 = max_seen.clone();
        let handler: BatchHandler<u32> = Arc::new(move |_| {
            let c = c1.clone();
            let m = m1.clone();
            Box::pin(async move {
                let now = c.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                c.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let config = WorkerPoolConfig {
            concurrency: 2,
            ..WorkerPoolConfig::default()
        };
        let pool = WorkerPool::new(config, handler);
        let futures: Vec<_> = (0..6).map(|i| pool.submit(i)).collect();
        for fut in futures {
            fut.await;
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn retries_until_success_within_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let a1 = attempts.clone();
        let handler: BatchHandler<u32> = Arc::new(move |_| {
            let a = a1.clone();
            Box::pin(async move {
                let n = a.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(())
                }
            })
        });
        let config = WorkerPoolConfig {
            concurrency: 1,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
        };
        let pool = WorkerPool::new(config, handler);
        let result = pool.submit(1).await;
        assert!(result.success);
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn exhausting_retries_resolves_failure() {
        let handler: BatchHandler<u32> = Arc::new(|_| Box::pin(async { Err("nope".to_string()) }));
        let config = WorkerPoolConfig {
            concurrency: 1,
            max_retries: 1,
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(5),
        };
        let pool = WorkerPool::new(config, handler);
        let result = pool.submit(1).await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 1);
    }

    #[tokio::test]
    async fn force_shutdown_resolves_queued_batches_with_failure() {
        let handler: BatchHandler<u32> = Arc::new(|_| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
        });
        let config = WorkerPoolConfig {
            concurrency: 1,
            ..WorkerPoolConfig::default()
        };
        let pool = Arc::new(WorkerPool::new(config, handler));
        let blocked = pool.clone();
        let blocked_fut = tokio::spawn(async move { blocked.submit(0).await });
        tokio::task::yield_now().await;

        let queued = pool.clone();
        let queued_fut = tokio::spawn(async move { queued.submit(1).await });
        tokio::task::yield_now().await;

        pool.force_shutdown();
        let queued_result = queued_fut.await.unwrap();
        assert!(!queued_result.success);
        assert_eq!(queued_result.error.as_deref(), Some("WorkerPool force shutdown"));

        blocked_fut.abort();
    }
}
