use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinError;

use crate::error::{Error, Result};

type Settled = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> Settled + Send>;

struct QueueState {
    pending: VecDeque<Job>,
    running: usize,
}

struct Inner {
    state: Mutex<QueueState>,
    max_concurrent: usize,
    delay: Duration,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start pending jobs while slots are free. Jobs are popped and started
    /// under the lock so start order stays FIFO.
    fn drain(inner: &Arc<Inner>) {
        loop {
            let settled = {
                let mut state = inner.lock_state();
                if state.running >= inner.max_concurrent {
                    return;
                }
                let Some(job) = state.pending.pop_front() else {
                    return;
                };
                state.running += 1;
                log::trace!(
                    "starting queued task ({} running, {} pending)",
                    state.running,
                    state.pending.len()
                );
                job()
            };

            let inner = Arc::clone(inner);
            tokio::spawn(async move {
                settled.await;
                // The slot reopens only after the pacing delay.
                tokio::time::sleep(inner.delay).await;
                inner.lock_state().running -= 1;
                Inner::drain(&inner);
            });
        }
    }
}

/// FIFO scheduler that caps how many fetches are in flight and waits a fixed
/// delay after each one settles before its slot is reused.
///
/// Cloning is cheap and clones share the same queue. `add` must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct FetchQueue {
    inner: Arc<Inner>,
}

impl FetchQueue {
    pub const DEFAULT_MAX_CONCURRENT: usize = 2;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(200);

    /// `max_concurrent` of zero is treated as one.
    pub fn new(max_concurrent: usize, delay_between_starts: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                }),
                max_concurrent: max_concurrent.max(1),
                delay: delay_between_starts,
            }),
        }
    }

    /// Enqueue `task` and return a handle that resolves with its outcome.
    ///
    /// A task that fails or panics only settles its own handle; the queue
    /// keeps going. Completion order is not guaranteed, start order is.
    pub fn add<T, F, Fut>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let running = tokio::spawn(async move { task().await });
            Box::pin(async move {
                let outcome = running.await.unwrap_or_else(|e| Err(join_error(e)));
                if tx.send(outcome).is_err() {
                    log::trace!("queued task settled after its handle was dropped");
                }
            })
        });

        self.inner.lock_state().pending.push_back(job);
        Inner::drain(&self.inner);
        TaskHandle { rx }
    }

    /// Drop every task that has not started yet and return how many were
    /// dropped. Their handles resolve to [`Error::TaskCancelled`]; running
    /// tasks are unaffected.
    pub fn clear(&self) -> usize {
        let dropped: Vec<Job> = self.inner.lock_state().pending.drain(..).collect();
        if !dropped.is_empty() {
            log::debug!("cleared {} pending tasks", dropped.len());
        }
        dropped.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock_state().running
    }
}

impl Default for FetchQueue {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CONCURRENT, Self::DEFAULT_DELAY)
    }
}

fn join_error(e: JoinError) -> Error {
    if e.is_cancelled() {
        return Error::TaskCancelled;
    }
    let payload = e.into_panic();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    Error::TaskPanicked(message)
}

/// Resolves with the outcome of a task submitted to a [`FetchQueue`].
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::TaskCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Counts concurrently active tasks and remembers the peak.
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn timed_task(
        gauge: Arc<Gauge>,
        ms: u64,
        value: usize,
    ) -> impl FnOnce() -> Pin<Box<dyn Future<Output = Result<usize>> + Send>> + Send + 'static {
        move || {
            Box::pin(async move {
                gauge.enter();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                gauge.exit();
                Ok(value)
            })
        }
    }

    #[tokio::test]
    async fn test_caps_concurrency() {
        let queue = FetchQueue::new(2, Duration::from_millis(5));
        let gauge = Arc::new(Gauge::default());

        let handles: Vec<TaskHandle<usize>> = (0..5)
            .map(|i| queue.add(timed_task(Arc::clone(&gauge), 20, i)))
            .collect();
        assert_eq!(queue.running_count(), 2);
        assert_eq!(queue.queue_len(), 3);

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_queue() {
        let queue = FetchQueue::new(2, Duration::from_millis(1));
        let mut handles = Vec::new();
        for i in 0..5usize {
            handles.push(queue.add(move || async move {
                if i == 0 {
                    Err(Error::NotFound("upstream said no".into()))
                } else {
                    Ok(i)
                }
            }));
        }

        let mut ok = 0;
        for (i, h) in handles.into_iter().enumerate() {
            match h.await {
                Ok(v) => {
                    assert_eq!(v, i);
                    ok += 1;
                }
                Err(Error::NotFound(msg)) => assert_eq!(msg, "upstream said no"),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 4);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let queue = FetchQueue::new(1, Duration::ZERO);
        let bad = queue.add(|| async {
            if true {
                panic!("boom");
            }
            Ok::<u8, Error>(0)
        });
        let good = queue.add(|| async { Ok::<u8, Error>(7) });

        match bad.await {
            Err(Error::TaskPanicked(msg)) => assert!(msg.contains("boom")),
            other => panic!("expected panic error, got {other:?}"),
        }
        assert_eq!(good.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_start_order_is_fifo() {
        let queue = FetchQueue::new(1, Duration::ZERO);
        let order = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let order = Arc::clone(&order);
                queue.add(move || async move {
                    order.lock().unwrap().push(i);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok::<(), Error>(())
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_start_order_is_fifo_with_two_slots() {
        let queue = FetchQueue::new(2, Duration::from_millis(1));
        let gauge = Arc::new(Gauge::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        let durations = [25u64, 3, 12, 1, 18, 2, 9, 5, 30, 1, 7, 4];

        let handles: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, &ms)| {
                let order = Arc::clone(&order);
                let gauge = Arc::clone(&gauge);
                queue.add(move || async move {
                    order.lock().unwrap().push(i);
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    gauge.exit();
                    if i % 5 == 4 {
                        return Err(Error::NotFound(format!("task {i}")));
                    }
                    Ok(i)
                })
            })
            .collect();

        let mut settled = 0;
        for (i, h) in handles.into_iter().enumerate() {
            match h.await {
                Ok(v) => assert_eq!(v, i),
                Err(Error::NotFound(msg)) => assert_eq!(msg, format!("task {i}")),
                Err(e) => panic!("unexpected error: {e}"),
            }
            settled += 1;
        }

        assert_eq!(settled, durations.len());
        let expected: Vec<usize> = (0..durations.len()).collect();
        assert_eq!(*order.lock().unwrap(), expected);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delay_after_settlement() {
        let queue = FetchQueue::new(1, Duration::from_millis(30));
        let starts = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let starts = Arc::clone(&starts);
                queue.add(move || async move {
                    starts.lock().unwrap().push(Instant::now());
                    Ok::<(), Error>(())
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }

        let starts = starts.lock().unwrap();
        assert!(starts[1] - starts[0] >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_clear_drops_only_pending() {
        let queue = FetchQueue::new(1, Duration::ZERO);
        let gauge = Arc::new(Gauge::default());

        let first = queue.add(timed_task(Arc::clone(&gauge), 30, 1));
        let rest: Vec<_> = (2..5)
            .map(|i| queue.add(timed_task(Arc::clone(&gauge), 1, i)))
            .collect();
        assert_eq!(queue.queue_len(), 3);

        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.queue_len(), 0);
        assert_eq!(queue.running_count(), 1);

        assert_eq!(first.await.unwrap(), 1);
        for h in rest {
            assert!(matches!(h.await, Err(Error::TaskCancelled)));
        }
        assert_eq!(queue.clear(), 0);
    }

    #[tokio::test]
    async fn test_slot_reopens_after_settlement() {
        let queue = FetchQueue::new(1, Duration::from_millis(1));
        queue.add(|| async { Ok::<(), Error>(()) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.running_count(), 0);
        assert_eq!(queue.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let queue = FetchQueue::new(0, Duration::ZERO);
        let gauge = Arc::new(Gauge::default());
        let handles: Vec<_> = (0..3)
            .map(|i| queue.add(timed_task(Arc::clone(&gauge), 5, i)))
            .collect();
        assert_eq!(queue.running_count(), 1);
        assert_eq!(queue.queue_len(), 2);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_runs_two_at_a_time() {
        let queue = FetchQueue::default();
        let gauge = Arc::new(Gauge::default());
        let handles: Vec<_> = (0..3)
            .map(|i| queue.add(timed_task(Arc::clone(&gauge), 5, i)))
            .collect();
        assert_eq!(queue.running_count(), 2);
        assert_eq!(queue.queue_len(), 1);

        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    }
}
