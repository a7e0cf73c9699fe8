//! Batches discrete items into fixed-size groups before handing them to a
//! downstream handler, so a batch is never emitted until it is full or a
//! flush timeout forces a partial one out.
//!
//! The internal state machine (tracked only for observability, via
//! [`BatchAccumulator::state`]) moves through `Idle -> Buffering -> Timing`
//! on the first `add`, optionally into `Deferring` while the flush timer
//! waits for `minBatchSize` to be reached, then `Emitting` each time a batch
//! is handed off, and `Paused` whenever backpressure is applied.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;

/// Accumulator configuration. `min_batch_size` defaults to half of
/// `batch_size` when left at zero via [`AccumulatorConfig::new`].
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorConfig {
    pub batch_size: usize,
    pub min_batch_size: usize,
    pub flush_timeout: Duration,
    pub max_queue_size: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_millis(5000), 10_000)
    }
}

impl AccumulatorConfig {
    #[must_use]
    pub const fn new(batch_size: usize, flush_timeout: Duration, max_queue_size: usize) -> Self {
        Self {
            batch_size,
            min_batch_size: batch_size / 2,
            flush_timeout,
            max_queue_size,
        }
    }

    #[must_use]
    pub const fn with_min_batch_size(mut self, min_batch_size: usize) -> Self {
        self.min_batch_size = min_batch_size;
        self
    }
}

/// Observability-only snapshot of the accumulator's internal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    Idle,
    Buffering,
    Timing,
    Deferring,
    Emitting,
    Paused,
}

const MAX_DEFERS: u8 = 3;
const DEFER_INTERVAL: Duration = Duration::from_millis(50);

struct Inner<T> {
    buffer: Vec<T>,
    paused: bool,
    defer_count: u8,
    generation: u64,
    state: AccumulatorState,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            paused: false,
            defer_count: 0,
            generation: 0,
            state: AccumulatorState::Idle,
        }
    }
}

type Handler<T> = Arc<dyn Fn(Vec<T>) + Send + Sync>;
type BackpressureCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Groups items into batches of `batch_size`, force-flushing a partial batch
/// once `flush_timeout` elapses and the deferred-flush policy has run out of
/// deferrals.
pub struct BatchAccumulator<T> {
    config: AccumulatorConfig,
    inner: Arc<Mutex<Inner<T>>>,
    handler: Handler<T>,
    on_backpressure: Option<BackpressureCallback>,
}

impl<T: Send + 'static> BatchAccumulator<T> {
    pub fn new(config: AccumulatorConfig, handler: impl Fn(Vec<T>) + Send + Sync + 'static) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner::new())),
            handler: Arc::new(handler),
            on_backpressure: None,
        }
    }

    #[must_use]
    pub fn with_backpressure_callback(mut self, cb: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_backpressure = Some(Arc::new(cb));
        self
    }

    #[must_use]
    pub fn state(&self) -> AccumulatorState {
        self.inner.lock().unwrap().state
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().buffer.len()
    }

    /// Adds a single item. Returns `false` without buffering it when the
    /// accumulator is paused or the buffer is already at `max_queue_size`.
    pub fn add(&self, item: T) -> bool {
        let mut to_emit = None;
        let mut arm = None;
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.paused {
                return false;
            }
            if guard.buffer.len() >= self.config.max_queue_size {
                return false;
            }
            let was_empty = guard.buffer.is_empty();
            guard.buffer.push(item);
            guard.state = AccumulatorState::Buffering;
            if guard.buffer.len() >= self.config.batch_size {
                guard.generation += 1;
                guard.defer_count = 0;
                to_emit = Some(std::mem::take(&mut guard.buffer));
                guard.state = AccumulatorState::Emitting;
            } else if was_empty {
                guard.state = AccumulatorState::Timing;
                arm = Some(guard.generation);
            }
        }
        if let Some(generation) = arm {
            self.arm_timer(generation);
        }
        if let Some(batch) = to_emit {
            (self.handler)(batch);
            self.inner.lock().unwrap().state = AccumulatorState::Idle;
        }
        true
    }

    /// Adds items one at a time, stopping early (without buffering the
    /// remainder) once the buffer reaches `max_queue_size`. Returns the
    /// number of items actually accepted.
    pub fn add_many(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut accepted = 0;
        for item in items {
            if !self.add(item) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Cancels any pending deferral and emits the current buffer as a single
    /// batch, even if it is smaller than `min_batch_size`. No-op if empty.
    pub fn flush(&self) {
        let batch = {
            let mut guard = self.inner.lock().unwrap();
            guard.generation += 1;
            guard.defer_count = 0;
            if guard.buffer.is_empty() {
                None
            } else {
                guard.state = AccumulatorState::Emitting;
                Some(std::mem::take(&mut guard.buffer))
            }
        };
        if let Some(batch) = batch {
            (self.handler)(batch);
        }
        self.inner.lock().unwrap().state = AccumulatorState::Idle;
    }

    /// Equivalent to [`Self::flush`] followed by [`Self::clear`]: guarantees
    /// the buffer and deferral state are reset even if the handler itself
    /// re-enters the accumulator.
    pub fn drain(&self) {
        self.flush();
        self.clear();
    }

    /// Discards any buffered items without emitting them.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.generation += 1;
        guard.defer_count = 0;
        guard.buffer.clear();
        guard.state = AccumulatorState::Idle;
    }

    /// Stops accepting new items. Idempotent; only fires the backpressure
    /// callback on the `false -> true` transition.
    pub fn pause(&self) {
        let became_paused = {
            let mut guard = self.inner.lock().unwrap();
            let was_paused = guard.paused;
            guard.paused = true;
            if !was_paused {
                guard.state = AccumulatorState::Paused;
            }
            !was_paused
        };
        if became_paused {
            if let Some(cb) = &self.on_backpressure {
                cb(true);
            }
        }
    }

    /// Resumes accepting new items. Idempotent; only fires the backpressure
    /// callback on the `true -> false` transition.
    pub fn resume(&self) {
        let became_resumed = {
            let mut guard = self.inner.lock().unwrap();
            let was_paused = guard.paused;
            guard.paused = false;
            if was_paused {
                guard.state = if guard.buffer.is_empty() {
                    AccumulatorState::Idle
                } else {
                    AccumulatorState::Buffering
                };
            }
            was_paused
        };
        if became_resumed {
            if let Some(cb) = &self.on_backpressure {
                cb(false);
            }
        }
    }

    fn arm_timer(&self, generation: u64) {
        let inner = self.inner.clone();
        let handler = self.handler.clone();
        let config = self.config;
        tokio::spawn(async move {
            tokio::time::sleep(config.flush_timeout).await;
            loop {
                let action = {
                    let mut guard = inner.lock().unwrap();
                    if guard.generation != generation || guard.buffer.is_empty() {
                        return;
                    }
                    let below_min = config.min_batch_size > 0 && guard.buffer.len() < config.min_batch_size;
                    if below_min && guard.defer_count < MAX_DEFERS {
                        guard.defer_count += 1;
                        guard.state = AccumulatorState::Deferring;
                        debug!(
                            "accumulator deferring flush ({}/{} below min_batch_size={})",
                            guard.defer_count, MAX_DEFERS, config.min_batch_size
                        );
                        TimerAction::Defer
                    } else {
                        guard.generation += 1;
                        guard.defer_count = 0;
                        guard.state = AccumulatorState::Emitting;
                        TimerAction::Emit(std::mem::take(&mut guard.buffer))
                    }
                };
                match action {
                    TimerAction::Defer => {
                        tokio::time::sleep(DEFER_INTERVAL).await;
                        continue;
                    }
                    TimerAction::Emit(batch) => {
                        (handler)(batch);
                        inner.lock().unwrap().state = AccumulatorState::Idle;
                        return;
                    }
                }
            }
        });
    }
}

enum TimerAction<T> {
    Defer,
    Emit(Vec<T>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn batches_sink() -> (Arc<Mutex<Vec<Vec<u32>>>>, impl Fn(Vec<u32>) + Send + Sync) {
        let store = Arc::new(Mutex::new(Vec::new()));
        let store2 = store.clone();
        (store, move |batch| store2.lock().unwrap().push(batch))
    }

    #[tokio::test]
    async fn batch_size_triggers_exactly_one_emit() {
        let (store, sink) = batches_sink();
        let config = AccumulatorConfig::new(4, Duration::from_secs(10), 100);
        let acc = BatchAccumulator::new(config, sink);
        for i in 0..4 {
            acc.add(i);
        }
        let batches = store.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn add_many_accepts_until_max_queue_size() {
        let (store, sink) = batches_sink();
        let config = AccumulatorConfig::new(1000, Duration::from_secs(10), 3);
        let acc = BatchAccumulator::new(config, sink);
        let accepted = acc.add_many(0..10);
        assert_eq!(accepted, 3);
        assert!(store.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_flush_forces_after_three_defers() {
        let (store, sink) = batches_sink();
        let config = AccumulatorConfig::new(10, Duration::from_millis(100), 100).with_min_batch_size(5);
        let acc = BatchAccumulator::new(config, sink);
        acc.add(1_u32);
        acc.add(2);

        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(store.lock().unwrap().is_empty());

        for _ in 0..3 {
            tokio::time::advance(Duration::from_millis(50)).await;
            tokio::task::yield_now().await;
        }

        let batches = store.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![1, 2]);
    }

    #[tokio::test]
    async fn flush_emits_partial_batch_and_cancels_timer() {
        let (store, sink) = batches_sink();
        let config = AccumulatorConfig::new(10, Duration::from_secs(10), 100);
        let acc = BatchAccumulator::new(config, sink);
        acc.add(1_u32);
        acc.flush();
        assert_eq!(store.lock().unwrap().len(), 1);
        assert_eq!(acc.pending(), 0);
    }

    #[tokio::test]
    async fn clear_discards_without_emitting() {
        let (store, sink) = batches_sink();
        let config = AccumulatorConfig::new(10, Duration::from_secs(10), 100);
        let acc = BatchAccumulator::new(config, sink);
        acc.add(1_u32);
        acc.clear();
        assert!(store.lock().unwrap().is_empty());
        assert_eq!(acc.pending(), 0);
    }

    #[tokio::test]
    async fn pause_rejects_adds_and_resume_allows_again() {
        let (_, sink) = batches_sink();
        let config = AccumulatorConfig::new(10, Duration::from_secs(10), 100);
        let acc = BatchAccumulator::new(config, sink);
        acc.pause();
        assert!(!acc.add(1_u32));
        acc.resume();
        assert!(acc.add(2));
    }

    #[test]
    fn pause_resume_backpressure_callback_fires_once_per_transition() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let config = AccumulatorConfig::new(10, Duration::from_secs(10), 100);
        let acc = BatchAccumulator::new(config, |_: Vec<u32>| {}).with_backpressure_callback(move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        acc.pause();
        acc.pause();
        acc.resume();
        acc.resume();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
