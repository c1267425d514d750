//! Concurrency-bounded preload worker loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::queue::{Enqueued, PreloadQueue};
use crate::domain::entities::{CacheKey, ImageSource, PreloadTask};
use crate::domain::errors::LoadError;
use crate::infrastructure::pipeline::LoadPipeline;

/// Default number of concurrent preload fetches.
pub const DEFAULT_PRELOAD_CONCURRENCY: usize = 3;

/// Message sent when a preload finishes.
#[derive(Debug, Clone)]
pub struct PreloadEvent {
    /// Key that was preloaded.
    pub key: CacheKey,
    /// Locator that was requested.
    pub locator: String,
    /// Where the image came from, or why it failed.
    pub result: Result<ImageSource, LoadError>,
}

#[derive(Debug)]
enum SchedulerCommand {
    Enqueue(PreloadTask),
    Remove(CacheKey),
    Clear,
}

struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    // Tasks accepted by `enqueue` and not yet dropped, skipped or finished.
    outstanding: watch::Sender<usize>,
}

impl Counters {
    fn release(&self, count: usize) {
        if count > 0 {
            self.outstanding
                .send_modify(|n| *n = n.saturating_sub(count));
        }
    }
}

/// State for the background worker loop.
struct WorkerState {
    pipeline: Arc<LoadPipeline>,
    counters: Arc<Counters>,
    semaphore: Arc<Semaphore>,
    command_rx: mpsc::UnboundedReceiver<SchedulerCommand>,
    events: Option<mpsc::UnboundedSender<PreloadEvent>>,
    shutdown: CancellationToken,
}

/// Runs queued preloads, highest priority first, a bounded number at a time.
pub struct PreloadScheduler {
    command_tx: mpsc::UnboundedSender<SchedulerCommand>,
    counters: Arc<Counters>,
    outstanding_rx: watch::Receiver<usize>,
    shutdown: CancellationToken,
    concurrency: usize,
}

impl PreloadScheduler {
    /// Starts the worker loop. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(
        pipeline: Arc<LoadPipeline>,
        concurrency: usize,
        events: Option<mpsc::UnboundedSender<PreloadEvent>>,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (outstanding, outstanding_rx) = watch::channel(0usize);
        let counters = Arc::new(Counters {
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            outstanding,
        });
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::run_worker_loop(WorkerState {
            pipeline,
            counters: counters.clone(),
            semaphore: Arc::new(Semaphore::new(concurrency)),
            command_rx,
            events,
            shutdown: shutdown.clone(),
        }));

        Self {
            command_tx,
            counters,
            outstanding_rx,
            shutdown,
            concurrency,
        }
    }

    async fn run_worker_loop(mut state: WorkerState) {
        let mut queue = PreloadQueue::new();

        loop {
            tokio::select! {
                biased;
                () = state.shutdown.cancelled() => break,
                cmd = state.command_rx.recv() => {
                    match cmd {
                        Some(SchedulerCommand::Enqueue(task)) => {
                            let key = task.key.clone();
                            let priority = task.priority;
                            match queue.push(task) {
                                Enqueued::New => trace!(key = %key, %priority, "Queued preload"),
                                Enqueued::Upgraded => {
                                    trace!(key = %key, %priority, "Upgraded queued preload");
                                    state.counters.release(1);
                                }
                                Enqueued::Unchanged => state.counters.release(1),
                            }
                        }
                        Some(SchedulerCommand::Remove(key)) => {
                            if queue.remove(&key).is_some() {
                                debug!(key = %key, "Removed queued preload");
                                state.counters.release(1);
                            }
                        }
                        Some(SchedulerCommand::Clear) => {
                            let dropped = queue.len();
                            queue.clear();
                            state.counters.release(dropped);
                            if dropped > 0 {
                                debug!(count = dropped, "Cleared preload queue");
                            }
                        }
                        None => break,
                    }
                }
                Ok(permit) = state.semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                    if let Some(task) = queue.pop() {
                        Self::start_worker(&state, task, permit);
                    }
                }
            }
            state.counters.queued.store(queue.len(), Ordering::Relaxed);
        }

        state.counters.queued.store(0, Ordering::Relaxed);
        state.counters.release(queue.len());
        debug!("Preload scheduler stopped");
    }

    fn start_worker(state: &WorkerState, task: PreloadTask, permit: OwnedSemaphorePermit) {
        let pipeline = state.pipeline.clone();
        let counters = state.counters.clone();
        let events = state.events.clone();
        let cancel = state.shutdown.child_token();
        counters.active.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            if pipeline.is_cached(&task.key) || pipeline.is_in_flight(&task.key) {
                trace!(key = %task.key, "Preload already satisfied");
            } else {
                let result = pipeline
                    .load_keyed(&task.key, &task.locator, &task.options, &cancel)
                    .await
                    .map(|image| image.source);
                if let Err(e) = &result {
                    debug!(key = %task.key, error = %e, "Preload failed");
                }
                if let Some(events) = &events {
                    let event = PreloadEvent {
                        key: task.key.clone(),
                        locator: task.locator.clone(),
                        result,
                    };
                    if events.send(event).is_err() {
                        trace!("Preload event receiver dropped");
                    }
                }
            }

            counters.active.fetch_sub(1, Ordering::Relaxed);
            counters.release(1);
            drop(permit);
        });
    }

    /// Queues a preload, or upgrades the queued one for the same key.
    pub fn enqueue(&self, task: PreloadTask) {
        self.counters.outstanding.send_modify(|n| *n += 1);
        if let Err(e) = self.command_tx.send(SchedulerCommand::Enqueue(task)) {
            self.counters.release(1);
            error!("Failed to send preload request: {}", e);
        }
    }

    /// Drops a queued preload. Running fetches are not affected.
    pub fn remove(&self, key: &CacheKey) {
        if let Err(e) = self.command_tx.send(SchedulerCommand::Remove(key.clone())) {
            error!("Failed to send preload removal: {}", e);
        }
    }

    /// Drops every queued preload.
    pub fn clear(&self) {
        if let Err(e) = self.command_tx.send(SchedulerCommand::Clear) {
            error!("Failed to send preload clear: {}", e);
        }
    }

    /// Waits until nothing is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding_rx.clone();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Number of queued tasks.
    pub fn queue_depth(&self) -> usize {
        self.counters.queued.load(Ordering::Relaxed)
    }

    /// Number of running workers.
    pub fn active_workers(&self) -> usize {
        self.counters.active.load(Ordering::Relaxed)
    }

    /// Maximum number of running workers.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl Drop for PreloadScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PreloadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadScheduler")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::entities::{PreloadPriority, TransformOptions};
    use crate::domain::ports::mocks::MockFetcher;
    use crate::infrastructure::cache::{CacheManager, EvictionPolicy, MemoryTier};
    use crate::infrastructure::retry::{RetryHandler, RetryPolicy};

    fn pipeline(fetcher: &Arc<MockFetcher>) -> Arc<LoadPipeline> {
        let memory = MemoryTier::new(1_000_000, 100, EvictionPolicy::default()).unwrap();
        Arc::new(LoadPipeline::new(
            CacheManager::memory_only(memory),
            RetryHandler::new(fetcher.clone(), RetryPolicy::default()),
            Vec::new(),
            None,
        ))
    }

    fn task(name: &str, priority: PreloadPriority) -> PreloadTask {
        let locator = format!("https://example.com/{name}.png");
        let options = TransformOptions::new();
        let key = CacheKey::derive(&locator, &options).unwrap();
        PreloadTask::new(locator, options, key, priority)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let fetcher = Arc::new(MockFetcher::new().with_latency(Duration::from_millis(100)));
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 2, None);

        for i in 0..6 {
            scheduler.enqueue(task(&format!("img{i}"), PreloadPriority::Normal));
        }
        scheduler.wait_idle().await;

        let times = fetcher.call_times();
        assert_eq!(times.len(), 6);
        for window in times.chunks(2) {
            assert_eq!(times.iter().filter(|t| **t == window[0]).count(), 2);
        }
        assert_eq!(scheduler.active_workers(), 0);
        assert_eq!(scheduler.queue_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_highest_priority_runs_first() {
        let fetcher = Arc::new(MockFetcher::new().with_latency(Duration::from_millis(10)));
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 1, None);

        scheduler.enqueue(task("low", PreloadPriority::Low));
        scheduler.enqueue(task("normal", PreloadPriority::Normal));
        scheduler.enqueue(task("high", PreloadPriority::High));
        scheduler.enqueue(task("immediate", PreloadPriority::Immediate));
        scheduler.wait_idle().await;

        assert_eq!(
            fetcher.called_locators(),
            vec![
                "https://example.com/immediate.png",
                "https://example.com/high.png",
                "https://example.com/normal.png",
                "https://example.com/low.png",
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_requests_fetch_once() {
        let fetcher = Arc::new(MockFetcher::new());
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 3, None);

        scheduler.enqueue(task("a", PreloadPriority::Low));
        scheduler.enqueue(task("a", PreloadPriority::High));
        scheduler.enqueue(task("a", PreloadPriority::Normal));
        scheduler.wait_idle().await;

        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cached_keys_are_skipped() {
        let fetcher = Arc::new(MockFetcher::new());
        let pipeline = pipeline(&fetcher);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = PreloadScheduler::spawn(pipeline.clone(), 3, Some(tx));

        pipeline
            .load(
                "https://example.com/a.png",
                &TransformOptions::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        scheduler.enqueue(task("a", PreloadPriority::Normal));
        scheduler.wait_idle().await;

        assert_eq!(fetcher.call_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_task_never_runs() {
        let fetcher = Arc::new(MockFetcher::new().with_latency(Duration::from_millis(50)));
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 1, None);

        scheduler.enqueue(task("a", PreloadPriority::Normal));
        scheduler.enqueue(task("b", PreloadPriority::Normal));
        scheduler.remove(&task("b", PreloadPriority::Normal).key);
        scheduler.wait_idle().await;

        assert_eq!(fetcher.calls_for("https://example.com/a.png"), 1);
        assert_eq!(fetcher.calls_for("https://example.com/b.png"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_drops_queued_tasks() {
        let fetcher = Arc::new(MockFetcher::new().with_latency(Duration::from_millis(50)));
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 1, None);

        for name in ["a", "b", "c"] {
            scheduler.enqueue(task(name, PreloadPriority::Normal));
        }
        scheduler.clear();
        scheduler.wait_idle().await;

        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_events_report_outcome() {
        let fetcher = Arc::new(MockFetcher::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 2, Some(tx));

        scheduler.enqueue(task("a", PreloadPriority::High));
        let event = rx.recv().await.unwrap();

        assert_eq!(event.locator, "https://example.com/a.png");
        assert_eq!(event.result, Ok(ImageSource::Network));
        scheduler.wait_idle().await;
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_nothing_queued() {
        let fetcher = Arc::new(MockFetcher::new());
        let scheduler = PreloadScheduler::spawn(pipeline(&fetcher), 1, None);
        tokio_test::assert_ready!(tokio_test::task::spawn(scheduler.wait_idle()).poll());
    }
}
