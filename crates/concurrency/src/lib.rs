//! Concurrency primitives shared by the indexing pipeline: a batching
//! accumulator, a retrying bounded-concurrency worker pool, and an
//! OS-thread pool dedicated to tree-sitter chunking.

mod accumulator;
mod chunker_pool;
mod worker_pool;

pub use accumulator::{AccumulatorConfig, AccumulatorState, BatchAccumulator};
pub use chunker_pool::ChunkerWorkerPool;
pub use worker_pool::{BatchHandler, BatchResult, BoxFuture, WorkerPool, WorkerPoolConfig};
