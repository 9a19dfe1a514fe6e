//! Bounded background task queue
//!
//! Detached work (last-seen stamps, fire-and-forget session bookkeeping)
//! goes through a fixed worker pool with a bounded queue instead of a task
//! per request. Workers recover from panics and log failures; nothing here
//! ever propagates back into the request that queued the work.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use warden_core::Result;

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct Task {
    id: Uuid,
    name: &'static str,
    fut: TaskFuture,
}

pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let task = { rx.lock().await.recv().await };
                        let Some(task) = task else { break };

                        debug!(task = task.name, id = %task.id, "running background task");
                        match AssertUnwindSafe(task.fut).catch_unwind().await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                warn!(task = task.name, id = %task.id, error = %e, "background task failed");
                            }
                            Err(_) => {
                                warn!(task = task.name, id = %task.id, "background task panicked");
                            }
                        }
                    }
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Queues a task without blocking. A full queue drops the task with a
    /// warning; callers use this only for best-effort work.
    pub fn try_dispatch<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let task = Task {
            id: Uuid::now_v7(),
            name,
            fut: Box::pin(fut),
        };
        if let Err(e) = self.tx.try_send(task) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "queue closed",
            };
            warn!(task = name, reason, "dropping background task");
        }
    }

    /// Closes the queue and waits for in-flight tasks to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new(4, 512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_dispatched_tasks_run() {
        let queue = TaskQueue::new(2, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            queue.try_dispatch("count", async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        queue.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let queue = TaskQueue::new(1, 16);
        let counter = Arc::new(AtomicUsize::new(0));

        queue.try_dispatch("panics", async { panic!("boom") });
        let after = Arc::clone(&counter);
        queue.try_dispatch("survives", async move {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        queue.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_tasks() {
        // One worker parked on a slow task, capacity 1: the third dispatch
        // has nowhere to go and is dropped rather than blocking.
        let queue = TaskQueue::new(1, 1);
        let counter = Arc::new(AtomicUsize::new(0));

        let slow = Arc::clone(&counter);
        queue.try_dispatch("slow", async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            slow.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let queued = Arc::clone(&counter);
        queue.try_dispatch("queued", async move {
            queued.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let dropped = Arc::clone(&counter);
        queue.try_dispatch("dropped", async move {
            dropped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        queue.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
