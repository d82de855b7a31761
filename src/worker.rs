use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// An opaque unit of work run by a worker.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One executor with a private FIFO queue.
///
/// Tasks run one at a time, in submission order. A task that panics is
/// logged and the worker carries on with the next one.
pub struct Worker {
    id: usize,
    tx: mpsc::UnboundedSender<Task>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn(id: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(id, rx));
        debug!("Worker {} started", id);
        Self { id, tx, handle }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue a task. Returns false if the worker is no longer running.
    pub fn submit(&self, task: Task) -> bool {
        self.tx.send(task).is_ok()
    }

    /// Close the queue, let the worker finish everything already queued,
    /// then wait for it to exit.
    pub async fn stop(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            error!("Worker {} terminated abnormally: {}", self.id, e);
        }
        debug!("Worker {} stopped", self.id);
    }
}

async fn run(id: usize, mut rx: mpsc::UnboundedReceiver<Task>) {
    // recv only yields None once the queue is closed and empty
    while let Some(task) = rx.recv().await {
        if let Err(e) = tokio::spawn(task).await {
            error!("Worker {} task failed: {}", id, e);
        }
    }
}

/// Fixed set of workers fed in round-robin order.
///
/// The rotation only advances when a task is actually dispatched. Chunks of
/// one tag may land on different workers, so their execution order is not
/// guaranteed, only their dispatch order.
pub struct WorkerPool {
    workers: Vec<Worker>,
    next: usize,
}

impl WorkerPool {
    /// `count` is clamped to at least one worker.
    pub fn new(count: usize) -> Self {
        let workers = (0..count.max(1)).map(Worker::spawn).collect();
        Self { workers, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Hand `task` to the next worker in rotation and return its index.
    pub fn dispatch(&mut self, task: Task) -> usize {
        let index = self.next % self.workers.len();
        self.next = self.next.wrapping_add(1);
        if !self.workers[index].submit(task) {
            error!("Worker {} is not accepting tasks; chunk dropped", index);
        }
        index
    }

    /// Stop every worker. Each one drains its queue before it exits.
    pub async fn stop(self) {
        info!("Stopping {} workers", self.workers.len());
        for worker in self.workers {
            worker.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_task(counter: &Arc<AtomicUsize>) -> Task {
        let counter = Arc::clone(counter);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let mut pool = WorkerPool::new(3);
        let counter = Arc::new(AtomicUsize::new(0));

        let picked: Vec<usize> = (0..7).map(|_| pool.dispatch(counting_task(&counter))).collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);

        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_round_robin_is_balanced() {
        let mut pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        let mut per_worker = [0usize; 4];
        for _ in 0..10 {
            per_worker[pool.dispatch(counting_task(&counter))] += 1;
        }
        assert!(per_worker.iter().all(|&n| n == 2 || n == 3));
        pool.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queued_tasks() {
        let worker = Worker::spawn(0);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            assert!(worker.submit(counting_task(&counter)));
        }
        worker.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_worker() {
        let worker = Worker::spawn(7);
        let counter = Arc::new(AtomicUsize::new(0));

        worker.submit(Box::pin(async {
            let sink_ok = false;
            assert!(sink_ok, "sink exploded");
        }));
        worker.submit(counting_task(&counter));
        worker.stop().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_workers_clamped_to_one() {
        let mut pool = WorkerPool::new(0);
        assert_eq!(pool.len(), 1);
        let counter = Arc::new(AtomicUsize::new(0));
        assert_eq!(pool.dispatch(counting_task(&counter)), 0);
        assert_eq!(pool.dispatch(counting_task(&counter)), 0);
        pool.stop().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
