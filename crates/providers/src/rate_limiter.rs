//! Per-provider admission control with two nested windows.
//!
//! Each provider gets a short-term (burst) and a long-term (sustained)
//! semaphore. A request needs one permit from each. Permits are not returned
//! when the request finishes: each one is handed to the [`ReleaseScheduler`]
//! at acquisition time and comes back once its window has elapsed.

use paperflow_config::{ProviderLimits, RateLimitConfig};
use paperflow_core::AiProvider;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const IDLE_AFTER: Duration = Duration::from_secs(30);
const LAST_MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("No rate limiter configured for provider {0}")]
    UnknownProvider(AiProvider),

    #[error("Requested {requested} permits from {provider}, capacity is {capacity}")]
    ExceedsCapacity {
        provider: AiProvider,
        requested: u32,
        capacity: u32,
    },

    #[error("Rate limiter for {0} is shut down")]
    Closed(AiProvider),
}

// ── Release scheduler ───────────────────────────────────────────────────────

/// One-shot timers that hand permits back after their window.
///
/// Cloned handles share one shutdown signal. After [`shutdown`](Self::shutdown)
/// every pending release fires immediately, so no timer task outlives it.
#[derive(Clone)]
pub struct ReleaseScheduler {
    shutdown: Arc<watch::Sender<bool>>,
    pending: Arc<AtomicUsize>,
}

impl ReleaseScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown: Arc::new(shutdown),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Drop `permit` after `delay`. Must be called within a Tokio runtime.
    pub fn schedule(&self, delay: Duration, permit: OwnedSemaphorePermit) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            drop(permit);
            return;
        }
        let pending = self.pending.clone();
        pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => {}
            }
            drop(permit);
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Releases still waiting for their window to elapse.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Default for ReleaseScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Per-provider limiter ────────────────────────────────────────────────────

struct Gates {
    short: Arc<Semaphore>,
    long: Arc<Semaphore>,
}

impl Gates {
    fn new(limits: ProviderLimits) -> Self {
        Self {
            short: Arc::new(Semaphore::new(limits.short_term_limit as usize)),
            long: Arc::new(Semaphore::new(limits.long_term_limit as usize)),
        }
    }

    fn close(&self) {
        self.short.close();
        self.long.close();
    }
}

/// Decrements the waiting count when an acquisition finishes or is dropped.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Monitoring view of one provider's limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSnapshot {
    pub provider: AiProvider,
    pub short_term_available: usize,
    pub short_term_limit: u32,
    pub long_term_available: usize,
    pub long_term_limit: u32,
    pub queue_length: usize,
    pub requests_last_minute: u32,
    pub load_percentage: f64,
    pub high_load: bool,
    pub idle: bool,
}

/// Dual-window limiter for one provider.
pub struct ProviderRateLimiter {
    provider: AiProvider,
    /// Initial capacities, restored by [`reset`](Self::reset).
    limits: ProviderLimits,
    short_window: Duration,
    long_window: Duration,
    gates: RwLock<Gates>,
    waiting: AtomicUsize,
    history: Mutex<VecDeque<(Instant, u32)>>,
    closed: AtomicBool,
    scheduler: ReleaseScheduler,
}

impl ProviderRateLimiter {
    pub fn new(
        provider: AiProvider,
        limits: ProviderLimits,
        short_window: Duration,
        long_window: Duration,
        scheduler: ReleaseScheduler,
    ) -> Self {
        Self {
            provider,
            limits,
            short_window,
            long_window,
            gates: RwLock::new(Gates::new(limits)),
            waiting: AtomicUsize::new(0),
            history: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            scheduler,
        }
    }

    pub fn provider(&self) -> AiProvider {
        self.provider
    }

    pub fn limits(&self) -> ProviderLimits {
        self.limits
    }

    fn gates(&self) -> (Arc<Semaphore>, Arc<Semaphore>) {
        let gates = self.gates.read().unwrap_or_else(|e| e.into_inner());
        (gates.short.clone(), gates.long.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Take one permit from both windows without waiting.
    ///
    /// If only one window has room, the permit taken from it is returned
    /// before reporting failure. Must be called within a Tokio runtime.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_many(1)
    }

    pub fn try_acquire_many(&self, permits: u32) -> bool {
        if self.is_closed() {
            return false;
        }
        let (short, long) = self.gates();
        let Ok(short_permit) = short.try_acquire_many_owned(permits) else {
            return false;
        };
        let Ok(long_permit) = long.try_acquire_many_owned(permits) else {
            drop(short_permit);
            return false;
        };
        self.admit(short_permit, long_permit, permits);
        true
    }

    /// Wait until one permit is available in both windows.
    pub async fn acquire(&self) -> Result<(), RateLimitError> {
        self.acquire_many(1).await
    }

    /// Wait for `permits` permits in both windows, short-term first.
    ///
    /// A short-term permit held while waiting on the long-term window is
    /// returned if the wait is abandoned.
    pub async fn acquire_many(&self, permits: u32) -> Result<(), RateLimitError> {
        let capacity = self.limits.short_term_limit.min(self.limits.long_term_limit);
        if permits > capacity {
            return Err(RateLimitError::ExceedsCapacity {
                provider: self.provider,
                requested: permits,
                capacity,
            });
        }

        let _waiting = WaitingGuard::enter(&self.waiting);
        loop {
            if self.is_closed() {
                return Err(RateLimitError::Closed(self.provider));
            }
            let (short, long) = self.gates();
            // A closed semaphore means a reset swapped the gates; retry on the new ones.
            let Ok(short_permit) = short.acquire_many_owned(permits).await else {
                continue;
            };
            let Ok(long_permit) = long.acquire_many_owned(permits).await else {
                drop(short_permit);
                continue;
            };
            self.admit(short_permit, long_permit, permits);
            return Ok(());
        }
    }

    fn admit(&self, short: OwnedSemaphorePermit, long: OwnedSemaphorePermit, permits: u32) {
        let now = Instant::now();
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_back((now, permits));
            self.prune(&mut history, now);
        }
        self.scheduler.schedule(self.short_window, short);
        self.scheduler.schedule(self.long_window, long);
        debug!(provider = %self.provider, permits, "Rate limit permits acquired");
    }

    fn prune(&self, history: &mut VecDeque<(Instant, u32)>, now: Instant) {
        let horizon = self.long_window.max(LAST_MINUTE);
        while let Some((at, _)) = history.front() {
            if now.saturating_duration_since(*at) > horizon {
                history.pop_front();
            } else {
                break;
            }
        }
    }

    fn requests_since(&self, window: Duration) -> u32 {
        let now = Instant::now();
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut history, now);
        history
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= window)
            .map(|(_, n)| n)
            .sum()
    }

    // ── Monitoring ────────────────────────────────────────────────────

    /// Permits a request could take right now (the tighter of both windows).
    pub fn available_permits(&self) -> usize {
        let (short, long) = self.gates();
        short.available_permits().min(long.available_permits())
    }

    /// Callers currently blocked in [`acquire`](Self::acquire).
    pub fn queue_length(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn requests_in_last_minute(&self) -> u32 {
        self.requests_since(LAST_MINUTE)
    }

    pub fn is_high_load(&self) -> bool {
        self.available_permits() <= 1 || self.queue_length() > 0
    }

    pub fn is_idle(&self) -> bool {
        self.requests_since(IDLE_AFTER) == 0
    }

    /// Share of the long-term window currently in use, 0-100.
    pub fn load_percentage(&self) -> f64 {
        let (_, long) = self.gates();
        let limit = self.limits.long_term_limit as f64;
        if limit == 0.0 {
            return 100.0;
        }
        let used = limit - long.available_permits() as f64;
        (used / limit * 100.0).clamp(0.0, 100.0)
    }

    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let (short, long) = self.gates();
        RateLimiterSnapshot {
            provider: self.provider,
            short_term_available: short.available_permits(),
            short_term_limit: self.limits.short_term_limit,
            long_term_available: long.available_permits(),
            long_term_limit: self.limits.long_term_limit,
            queue_length: self.queue_length(),
            requests_last_minute: self.requests_in_last_minute(),
            load_percentage: self.load_percentage(),
            high_load: self.is_high_load(),
            idle: self.is_idle(),
        }
    }

    // ── Administration ────────────────────────────────────────────────

    /// Restore both windows to their initial capacity and clear history.
    ///
    /// Permits still held by pending releases go back to the retired gates.
    pub fn reset(&self) {
        let retired = {
            let mut gates = self.gates.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *gates, Gates::new(self.limits))
        };
        retired.close();
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clear();
        info!(
            provider = %self.provider,
            short_term = self.limits.short_term_limit,
            long_term = self.limits.long_term_limit,
            "Rate limiter reset"
        );
    }

    /// Refuse all further acquisitions and wake any waiters.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.gates.read().unwrap_or_else(|e| e.into_inner()).close();
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// One [`ProviderRateLimiter`] per provider, sharing one release scheduler.
pub struct RateLimiter {
    limiters: HashMap<AiProvider, Arc<ProviderRateLimiter>>,
    scheduler: ReleaseScheduler,
}

impl RateLimiter {
    /// Build limiters for every known provider from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        let scheduler = ReleaseScheduler::new();
        let limiters = AiProvider::ALL
            .into_iter()
            .map(|provider| {
                let limiter = ProviderRateLimiter::new(
                    provider,
                    config.limits_for(provider),
                    config.short_window(),
                    config.long_window(),
                    scheduler.clone(),
                );
                (provider, Arc::new(limiter))
            })
            .collect();
        Self {
            limiters,
            scheduler,
        }
    }

    /// Build limiters for an explicit set of providers.
    pub fn with_limits(
        limits: impl IntoIterator<Item = (AiProvider, ProviderLimits)>,
        short_window: Duration,
        long_window: Duration,
    ) -> Self {
        let scheduler = ReleaseScheduler::new();
        let limiters = limits
            .into_iter()
            .map(|(provider, limits)| {
                let limiter =
                    ProviderRateLimiter::new(provider, limits, short_window, long_window, scheduler.clone());
                (provider, Arc::new(limiter))
            })
            .collect();
        Self {
            limiters,
            scheduler,
        }
    }

    pub fn limiter(&self, provider: AiProvider) -> Result<&Arc<ProviderRateLimiter>, RateLimitError> {
        self.limiters
            .get(&provider)
            .ok_or(RateLimitError::UnknownProvider(provider))
    }

    pub fn try_acquire(&self, provider: AiProvider) -> bool {
        self.limiter(provider).is_ok_and(|l| l.try_acquire())
    }

    pub async fn acquire(&self, provider: AiProvider) -> Result<(), RateLimitError> {
        self.limiter(provider)?.acquire().await
    }

    /// Admission for one outbound request.
    ///
    /// Resolves at once when both windows have room; otherwise waits for the
    /// blocking acquisition without tying up a worker thread.
    pub async fn acquire_permit(&self, provider: AiProvider) -> Result<(), RateLimitError> {
        let limiter = self.limiter(provider)?;
        if limiter.try_acquire() {
            return Ok(());
        }
        debug!(
            provider = %provider,
            queue_length = limiter.queue_length() + 1,
            "Rate limit reached, waiting for permit"
        );
        limiter.acquire().await
    }

    /// Snapshots ordered by provider.
    pub fn snapshots(&self) -> Vec<RateLimiterSnapshot> {
        let mut snapshots: Vec<RateLimiterSnapshot> =
            self.limiters.values().map(|l| l.snapshot()).collect();
        snapshots.sort_by_key(|s| s.provider);
        snapshots
    }

    pub fn reset(&self, provider: AiProvider) -> Result<(), RateLimitError> {
        self.limiter(provider)?.reset();
        Ok(())
    }

    pub fn reset_all(&self) {
        for limiter in self.limiters.values() {
            limiter.reset();
        }
    }

    pub fn pending_releases(&self) -> usize {
        self.scheduler.pending()
    }

    /// Close every limiter and fire all pending releases now.
    pub fn shutdown(&self) {
        if self.scheduler.is_shut_down() {
            return;
        }
        for limiter in self.limiters.values() {
            limiter.close();
        }
        self.scheduler.shutdown();
        warn!(pending = self.scheduler.pending(), "Rate limiter shut down");
    }
}
