//! Per-key retry state machine with single-flight fetches.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::RetryPolicy;
use crate::domain::entities::CacheKey;
use crate::domain::errors::LoadError;
use crate::domain::ports::{FetchedImage, Fetcher};

type Flight = Shared<BoxFuture<'static, Result<FetchedImage, LoadError>>>;

struct InFlight {
    id: u64,
    future: Flight,
    cancel: CancellationToken,
}

/// Retry bookkeeping for a key with a fetch in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryState {
    /// Failed attempts so far.
    pub attempt_count: u32,
    /// Delay before the next attempt, while backing off.
    pub next_delay: Option<Duration>,
}

struct RetryShared {
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    in_flight: Mutex<HashMap<CacheKey, InFlight>>,
    states: Mutex<HashMap<CacheKey, RetryState>>,
    failed: Mutex<HashSet<CacheKey>>,
    next_id: AtomicU64,
}

impl RetryShared {
    fn record_state(&self, key: &CacheKey, state: RetryState) {
        self.states.lock().insert(key.clone(), state);
    }

    fn finish(&self, key: &CacheKey, id: u64, result: &Result<FetchedImage, LoadError>) {
        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.get(key).is_some_and(|f| f.id == id) {
                in_flight.remove(key);
            }
        }
        self.states.lock().remove(key);

        match result {
            Ok(_) => {
                self.failed.lock().remove(key);
            }
            Err(LoadError::PermanentFetch { attempts, .. }) => {
                self.failed.lock().insert(key.clone());
                warn!(key = %key, attempts, "Marked key as permanently failed");
            }
            Err(LoadError::Cancelled) => {
                debug!(key = %key, "Fetch cancelled, retry state discarded");
            }
            Err(_) => {}
        }
    }
}

/// Runs fetches through bounded retries.
///
/// Concurrent requests for one key share a single fetch. Keys that exhaust
/// their attempts fail fast until `reset`.
#[derive(Clone)]
pub struct RetryHandler {
    shared: Arc<RetryShared>,
}

impl RetryHandler {
    /// Creates a handler over a fetcher.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self {
            shared: Arc::new(RetryShared {
                fetcher,
                policy,
                in_flight: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                failed: Mutex::new(HashSet::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Fetches `locator` for `key`, retrying transient failures.
    ///
    /// If a fetch for `key` is already running, waits for its outcome instead
    /// of starting another. `cancel` aborts the fetch when this call started
    /// it; otherwise it only abandons this caller's wait.
    ///
    /// # Errors
    /// - `PermanentFetch` once attempts are exhausted, and immediately for
    ///   keys already marked failed.
    /// - `InvalidLocator` without retrying.
    /// - `Cancelled` when the fetch or this wait is cancelled.
    pub async fn execute(
        &self,
        key: &CacheKey,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<FetchedImage, LoadError> {
        self.execute_shared(key, locator, cancel)
            .await
            .map(|(image, _)| image)
    }

    /// Like [`RetryHandler::execute`], also reporting whether this call
    /// started the fetch (`true`) or joined one already running.
    ///
    /// # Errors
    /// See [`RetryHandler::execute`].
    pub async fn execute_shared(
        &self,
        key: &CacheKey,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<(FetchedImage, bool), LoadError> {
        if self.is_permanently_failed(key) {
            debug!(key = %key, "Skipping fetch for permanently failed key");
            return Err(LoadError::permanent(locator, self.shared.policy.max_attempts));
        }
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled);
        }

        let (flight, owner) = self.join_or_start(key, locator, cancel);
        let result = if owner {
            flight.await
        } else {
            debug!(key = %key, "Joining in-flight fetch");
            tokio::select! {
                result = flight => result,
                () = cancel.cancelled() => Err(LoadError::Cancelled),
            }
        };
        result.map(|image| (image, owner))
    }

    fn join_or_start(
        &self,
        key: &CacheKey,
        locator: &str,
        cancel: &CancellationToken,
    ) -> (Flight, bool) {
        let mut in_flight = self.shared.in_flight.lock();
        if let Some(existing) = in_flight.get(key)
            && !existing.cancel.is_cancelled()
        {
            return (existing.future.clone(), false);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let future = Self::start_flight(
            Arc::downgrade(&self.shared),
            self.shared.fetcher.clone(),
            self.shared.policy,
            id,
            key.clone(),
            locator.to_string(),
            cancel.clone(),
        );
        in_flight.insert(
            key.clone(),
            InFlight {
                id,
                future: future.clone(),
                cancel: cancel.clone(),
            },
        );
        (future, true)
    }

    fn start_flight(
        shared: Weak<RetryShared>,
        fetcher: Arc<dyn Fetcher>,
        policy: RetryPolicy,
        id: u64,
        key: CacheKey,
        locator: String,
        cancel: CancellationToken,
    ) -> Flight {
        async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(LoadError::Cancelled),
                result = run_attempts(fetcher.as_ref(), policy, &shared, &key, &locator) => result,
            };
            if let Some(shared) = shared.upgrade() {
                shared.finish(&key, id, &result);
            }
            result
        }
        .boxed()
        .shared()
    }

    /// Clears failure state so the key can be fetched again.
    pub fn reset(&self, key: &CacheKey) {
        let was_failed = self.shared.failed.lock().remove(key);
        self.shared.states.lock().remove(key);
        if was_failed {
            info!(key = %key, "Reset permanently failed key");
        }
    }

    /// Returns true if the key exhausted its attempts.
    pub fn is_permanently_failed(&self, key: &CacheKey) -> bool {
        self.shared.failed.lock().contains(key)
    }

    /// Returns the retry bookkeeping of a running fetch.
    pub fn retry_state(&self, key: &CacheKey) -> Option<RetryState> {
        self.shared.states.lock().get(key).copied()
    }

    /// Returns true if a live fetch for the key is running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.shared
            .in_flight
            .lock()
            .get(key)
            .is_some_and(|f| !f.cancel.is_cancelled())
    }

    /// Number of live fetches.
    pub fn in_flight_count(&self) -> usize {
        self.shared
            .in_flight
            .lock()
            .values()
            .filter(|f| !f.cancel.is_cancelled())
            .count()
    }

    /// Number of keys marked permanently failed.
    pub fn failed_count(&self) -> usize {
        self.shared.failed.lock().len()
    }

    /// Policy in use.
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.shared.policy
    }
}

impl std::fmt::Debug for RetryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandler")
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}

async fn run_attempts(
    fetcher: &dyn Fetcher,
    policy: RetryPolicy,
    shared: &Weak<RetryShared>,
    key: &CacheKey,
    locator: &str,
) -> Result<FetchedImage, LoadError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        match fetcher.fetch(locator).await {
            Ok(image) => {
                if failures > 0 {
                    info!(key = %key, failures, "Fetch succeeded after retries");
                }
                return Ok(image);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                failures += 1;
                if failures >= max_attempts {
                    warn!(key = %key, locator = %locator, error = %e, "Retries exhausted");
                    return Err(LoadError::permanent(locator, failures));
                }

                let delay = policy.delay_for(failures);
                if let Some(shared) = shared.upgrade() {
                    shared.record_state(
                        key,
                        RetryState {
                            attempt_count: failures,
                            next_delay: Some(delay),
                        },
                    );
                }
                warn!(
                    key = %key,
                    attempt = failures,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Fetch failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
