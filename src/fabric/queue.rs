use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::task::JoinError;
use tracing::{debug, error};

/// Tracks fire-and-forget writes so they can be drained later.
///
/// Every write runs as a detached task: dropping a `drain` future or the
/// queue itself never cancels it. A task stays visible to every drain until
/// it has settled.
#[derive(Default)]
pub struct WriteQueue {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    settled: Notify,
}

#[derive(Default)]
struct QueueState {
    /// Sequence number handed to the next accepted task.
    next_seq: u64,
    /// Sequence numbers of tasks that have not settled yet.
    in_flight: BTreeSet<u64>,
    /// Every task below this sequence number has been reported by a drain.
    reported: u64,
    closed: bool,
}

impl QueueState {
    fn has_in_flight_before(&self, horizon: u64) -> bool {
        self.in_flight.first().is_some_and(|&seq| seq < horizon)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // State stays consistent across a panic: every mutation is a single step.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish(&self, seq: u64) {
        self.lock().in_flight.remove(&seq);
        self.settled.notify_waiters();
    }
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` on the current Tokio runtime and track it.
    ///
    /// Returns `false` (and spawns nothing) once the queue is closed or when
    /// called outside a runtime.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!("queued write submitted outside a Tokio runtime; dropped");
            return false;
        };
        let seq = {
            let mut state = self.shared.lock();
            if state.closed {
                return false;
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.in_flight.insert(seq);
            seq
        };

        let shared = Arc::clone(&self.shared);
        let inner = handle.clone();
        // The inner task isolates panics so the settle bookkeeping always runs.
        handle.spawn(async move {
            log_join(inner.spawn(task).await);
            shared.finish(seq);
        });
        true
    }

    /// Await every task submitted before the call.
    ///
    /// Tasks submitted while this runs are left for the next drain. Returns
    /// how many tasks settled that no earlier drain has reported; concurrent
    /// drains over the same tasks all wait, but only one reports them.
    pub async fn drain(&self) -> usize {
        let horizon = self.shared.lock().next_seq;
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.shared.lock().has_in_flight_before(horizon) {
                break;
            }
            notified.await;
        }

        let settled = {
            let mut state = self.shared.lock();
            let settled = horizon.saturating_sub(state.reported);
            state.reported = state.reported.max(horizon);
            settled as usize
        };
        debug!(settled, "write queue drained");
        settled
    }

    /// Refuse new submissions, then drain everything left, including tasks
    /// a concurrent drain is already waiting on.
    pub async fn close(&self) -> usize {
        self.shared.lock().closed = true;
        self.drain().await
    }

    /// Tasks that have not settled yet.
    pub fn pending(&self) -> usize {
        self.shared.lock().in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

fn log_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(error = %e, "queued write panicked");
        } else {
            error!(error = %e, "queued write was cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn slow_counter(queue: &WriteQueue, done: &Arc<AtomicUsize>, delay_ms: u64) {
        let done = done.clone();
        assert!(queue.submit(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            done.fetch_add(1, Ordering::SeqCst);
        }));
    }

    #[tokio::test]
    async fn idle_drain_returns_zero() {
        let queue = WriteQueue::new();
        assert_eq!(queue.drain().await, 0);
    }

    #[tokio::test]
    async fn drain_awaits_every_tracked_task() {
        let queue = WriteQueue::new();
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..5u64 {
            slow_counter(&queue, &done, 5 * i);
        }
        assert_eq!(queue.drain().await, 5);
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.drain().await, 0);
    }

    #[tokio::test]
    async fn finished_tasks_still_count() {
        let queue = WriteQueue::new();
        queue.submit(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.submit(async {});
        assert_eq!(queue.drain().await, 2);
    }

    #[tokio::test]
    async fn drain_ignores_later_submissions() {
        let queue = Arc::new(WriteQueue::new());
        let done = Arc::new(AtomicUsize::new(0));
        slow_counter(&queue, &done, 30);

        let drainer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        slow_counter(&queue, &done, 500);

        assert_eq!(drainer.await.unwrap(), 1);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.drain().await, 1);
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_task_is_settled_not_propagated() {
        let queue = WriteQueue::new();
        queue.submit(async { panic!("boom") });
        assert_eq!(queue.drain().await, 1);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn dropped_drain_does_not_cancel_tasks() {
        let queue = WriteQueue::new();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            slow_counter(&queue, &done, 50);
        }
        let timed_out = tokio::time::timeout(Duration::from_millis(5), queue.drain()).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.drain().await, 5);
    }

    #[tokio::test]
    async fn concurrent_drains_both_wait_for_the_same_tasks() {
        let queue = Arc::new(WriteQueue::new());
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            slow_counter(&queue, &done, 50);
        }

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);

        let first = first.await.unwrap();
        assert_eq!(first + second, 3);
    }

    #[tokio::test]
    async fn close_waits_for_tasks_a_drain_is_holding() {
        let queue = Arc::new(WriteQueue::new());
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            slow_counter(&queue, &done, 80);
        }

        let drainer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
        drainer.await.unwrap();
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let queue = WriteQueue::new();
        queue.submit(async {});
        assert_eq!(queue.close().await, 1);
        assert!(queue.is_closed());
        assert!(!queue.submit(async {}));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn submit_outside_runtime_is_refused() {
        let queue = WriteQueue::new();
        assert!(!queue.submit(async {}));
    }
}
