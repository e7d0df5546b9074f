//! Background worker pool.
//!
//! Jobs run on a fixed set of std threads. The submitting thread gets a
//! `JobHandle` and blocks on it only when it asks for the result. Each job
//! receives a `CancelToken`; cancellation is cooperative.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Fixed-size pool of worker threads fed from a shared queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(anyhow!("worker pool needs at least one thread"));
        }
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver = receiver.clone();
            let worker = std::thread::Builder::new()
                .name(format!("yolo-labels-worker-{index}"))
                .spawn(move || worker_loop(index, receiver))?;
            workers.push(worker);
        }
        log::debug!("worker pool started with {} threads", threads);
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. The closure receives the job's cancel token.
    pub fn submit<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let cancel = CancelToken::new();
        let job_cancel = cancel.clone();
        let (tx, rx) = bounded(1);
        let wrapped: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| job(&job_cancel)));
            // The handle may be gone already; nobody is waiting then.
            let _ = tx.send(outcome.map_err(|_| ()));
        });
        self.sender
            .as_ref()
            .ok_or_else(|| anyhow!("worker pool is shut down"))?
            .send(wrapped)
            .map_err(|_| anyhow!("worker pool is shut down"))?;
        Ok(JobHandle { rx, cancel })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the queue lets every worker drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(index: usize, receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        job();
    }
    log::trace!("worker {} exiting", index);
}

/// Handle to a queued job. Dropping it cancels the job.
pub struct JobHandle<T> {
    rx: Receiver<std::result::Result<T, ()>>,
    cancel: CancelToken,
}

impl<T> JobHandle<T> {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(anyhow!("background job panicked")),
            Err(_) => Err(anyhow!("background job was dropped before completing")),
        }
    }

    /// Block until the job finishes or `timeout` passes.
    ///
    /// On timeout the job is cancelled and still awaited, so its cleanup has
    /// run by the time this returns the timeout error.
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(())) => Err(anyhow!("background job panicked")),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("background job timed out after {:?}, cancelling", timeout);
                self.cancel.cancel();
                let _ = self.rx.recv();
                Err(anyhow!("background job timed out after {:?}", timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("background job was dropped before completing"))
            }
        }
    }
}

impl<T> Drop for JobHandle<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Instant;

    #[test]
    fn runs_jobs_off_the_calling_thread() {
        let pool = WorkerPool::new(2).unwrap();
        let caller = std::thread::current().id();
        let handle = pool.submit(move |_| std::thread::current().id()).unwrap();
        assert_ne!(handle.wait().unwrap(), caller);
    }

    #[test]
    fn panicking_job_is_reported() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(|_| -> u32 { panic!("boom") }).unwrap();
        assert!(handle.wait().is_err());

        // The worker survives the panic.
        let handle = pool.submit(|_| 7u32).unwrap();
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn timeout_cancels_and_waits_for_cleanup() {
        let pool = WorkerPool::new(1).unwrap();
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        let handle = pool
            .submit(move |cancel| {
                let started = Instant::now();
                while !cancel.is_cancelled() && started.elapsed() < Duration::from_secs(10) {
                    std::thread::sleep(Duration::from_millis(1));
                }
                flag.store(true, Ordering::SeqCst);
            })
            .unwrap();
        let err = handle.wait_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn workers_take_jobs_concurrently() {
        let pool = WorkerPool::new(3).unwrap();
        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|n| {
                let barrier = barrier.clone();
                pool.submit(move |_| {
                    barrier.wait();
                    n * 2
                })
                .unwrap()
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.wait_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(results, vec![0, 2, 4]);
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(WorkerPool::new(0).is_err());
    }
}
