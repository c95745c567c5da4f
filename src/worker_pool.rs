//! Bounded worker pool
//!
//! A fixed number of workers consume submitted jobs from an unbounded FIFO
//! queue. Each job additionally runs inside its own tokio task so a panic in
//! user code cannot take a worker down. Shutdown first stops intake, then
//! drains queued and in-flight jobs up to a deadline; workers still busy at
//! the deadline are aborted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let receiver = std::sync::Arc::new(tokio::sync::Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let receiver = receiver.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { receiver.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!("worker {worker_id} shutting down");
                        break;
                    };
                    if let Err(join_error) = tokio::spawn(job).await {
                        if join_error.is_panic() {
                            error!("worker {worker_id}: job panicked: {join_error}");
                        }
                    }
                }
            }));
        }

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Submit a job for execution. Returns false once shutdown has been
    /// requested; the job is dropped without running.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(tx) => tx.send(Box::pin(job)).is_ok(),
            None => false,
        }
    }

    /// Stop accepting work, then wait up to `wait` for queued and in-flight
    /// jobs to finish. Returns false when the deadline passed and remaining
    /// workers were aborted.
    pub async fn shutdown(&self, wait: Duration) -> bool {
        {
            let mut sender = self.sender.lock().unwrap();
            if sender.take().is_none() {
                return true;
            }
        }

        let workers = {
            let mut guard = self.workers.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        let deadline = tokio::time::Instant::now() + wait;
        let mut finished_cleanly = true;
        for (worker_id, handle) in workers.into_iter().enumerate() {
            let abort = handle.abort_handle();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("worker {worker_id} did not finish within the shutdown window, aborting");
                abort.abort();
                finished_cleanly = false;
            }
        }
        finished_cleanly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_submitted_jobs_run() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..5 {
            let counter = counter.clone();
            assert!(pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded_by_pool_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicI32::new(0));
        let max_running = Arc::new(AtomicI32::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let max_running = max_running.clone();
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert!(max_running.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_submission_order() {
        let pool = WorkerPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            pool.submit(async move {
                order.lock().unwrap().push(i);
            });
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_discarded() {
        let pool = WorkerPool::new(1);
        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(!pool.submit(async {}));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicU32::new(0));

        pool.submit(async {
            panic!("boom");
        });
        let after_panic = counter.clone();
        pool.submit(async move {
            after_panic.fetch_add(1, Ordering::SeqCst);
        });

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_deadline_aborts_long_running_job() {
        let pool = WorkerPool::new(1);
        pool.submit(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pool.shutdown(Duration::from_millis(100)).await);
    }
}
