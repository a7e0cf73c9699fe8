//! Fixed pool of OS threads, each owning its own [`Chunker`], consuming
//! file-chunking requests from a shared queue. Kept separate from
//! [`crate::worker_pool::WorkerPool`] because chunking is CPU-bound
//! tree-sitter parsing rather than async I/O, so plain threads plus a
//! blocking channel suit it better than a tokio task pool.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use context_code_chunker::{Chunker, ChunkerConfig, CodeChunk, Result as ChunkResult};

struct Job {
    path: String,
    content: String,
    reply: Sender<ChunkResult<Vec<CodeChunk>>>,
}

/// Dispatches chunking requests across `size` worker threads, each of which
/// builds its own [`Chunker`] once and reuses it (and its cached
/// tree-sitter parsers) for every request it handles.
pub struct ChunkerWorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ChunkerWorkerPool {
    #[must_use]
    pub fn new(size: usize, config: ChunkerConfig) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..size.max(1))
            .map(|_| {
                let job_rx = job_rx.clone();
                let config = config.clone();
                std::thread::spawn(move || Self::run(job_rx, config))
            })
            .collect();

        Self {
            job_tx: Some(job_tx),
            workers,
        }
    }

    fn run(job_rx: Arc<Mutex<Receiver<Job>>>, config: ChunkerConfig) {
        let chunker = Chunker::new(config);
        loop {
            let job = {
                let guard = job_rx.lock().unwrap();
                guard.recv()
            };
            let Ok(job) = job else {
                return;
            };
            let result = chunker.chunk_str(&job.content, Some(job.path.as_str()));
            let _ = job.reply.send(result);
        }
    }

    /// Submits one file for chunking and blocks the caller's thread until a
    /// worker has processed it.
    pub fn chunk(&self, path: impl Into<String>, content: impl Into<String>) -> ChunkResult<Vec<CodeChunk>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job = Job {
            path: path.into(),
            content: content.into(),
            reply: reply_tx,
        };
        self.job_tx
            .as_ref()
            .expect("job_tx only taken during drop")
            .send(job)
            .expect("chunker worker pool threads outlive the pool handle");
        reply_rx.recv().expect("worker replies before exiting")
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ChunkerWorkerPool {
    fn drop(&mut self) {
        // Drop the sender first so worker threads blocked on `recv()` see
        // the channel disconnect and exit, otherwise `join()` below hangs.
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_a_simple_rust_file_across_the_pool() {
        let pool = ChunkerWorkerPool::new(2, ChunkerConfig::default());
        let source = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let chunks = pool.chunk("lib.rs", source).expect("chunking succeeds");
        assert!(!chunks.is_empty());
    }

    #[test]
    fn pool_serves_many_requests_from_few_threads() {
        let pool = ChunkerWorkerPool::new(2, ChunkerConfig::default());
        for i in 0..10 {
            let source = format!("fn f{i}() -> i32 {{\n    {i}\n}}\n");
            let chunks = pool.chunk(format!("f{i}.rs"), source).expect("chunking succeeds");
            assert!(!chunks.is_empty());
        }
    }
}
