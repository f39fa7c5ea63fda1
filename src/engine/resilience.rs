// ── Astro Engine: Resilience Layer ─────────────────────────────────────────
//
// One wrapper for every call to an external collaborator.
//
// Features:
//   • Per-attempt deadline (tokio timeout) — a hang is a failure
//   • Exponential backoff with ±25% jitter (base 1s, max 30s, 3 retries)
//   • Non-transient errors are not retried
//   • Circuit breaker: 5 consecutive failed calls → fail fast for 60s,
//     then one half-open trial
//   • Declared fallback value for every call; results are tagged Live/Fallback
//   • Last-known-good cache for collaborators whose stale answer beats none

use crate::atoms::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_BREAKER_COOLDOWN_SECS, DEFAULT_BREAKER_THRESHOLD,
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_MAX_RETRIES, MAX_RETRY_DELAY_MS,
};
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

// ── Policy ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub base_delay: Duration,
    /// Cap on a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }
}

// ── Backoff delay ──────────────────────────────────────────────────────────

/// Exponential backoff for 0-based `attempt`, capped, with ±25% jitter.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(16)));
    let capped_ms = exp_ms.min(policy.max_delay.as_millis() as u64);
    Duration::from_millis(apply_jitter(capped_ms))
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms;
    }
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    (base_ms as i64 + offset).max(0) as u64
}

// ── Circuit Breaker ────────────────────────────────────────────────────────

/// A circuit breaker that trips after N consecutive failed calls,
/// then rejects calls for a cooldown period before allowing a trial.
///
/// States:
///   Closed   — normal operation, calls pass through
///   Open     — rejecting calls (cooldown active)
///   HalfOpen — cooldown expired, trial calls allowed; a failure re-trips
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    /// When the circuit was last tripped open.
    tripped_at: Mutex<Option<Instant>>,
    /// Start of the half-open trial in flight, if any. A trial older than the
    /// cooldown (its caller went away) no longer blocks a new one.
    trial_started: Mutex<Option<Instant>>,
    threshold: u32,
    cooldown: Duration,
    /// Calls rejected while open (for status reporting).
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            tripped_at: Mutex::new(None),
            trial_started: Mutex::new(None),
            threshold: threshold.max(1),
            cooldown,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BreakerState {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            return BreakerState::Closed;
        }
        match *self.tripped_at.lock() {
            Some(at) if at.elapsed() < self.cooldown => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    /// Returns `Ok(())` if a call may go through, `Err` while open. Once the
    /// cooldown ends exactly one caller is admitted as the trial; the rest
    /// fail fast until it reports back.
    pub fn check(&self, name: &str) -> EngineResult<()> {
        match self.state() {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(self.reject(name, "cooling down")),
            BreakerState::HalfOpen => {
                let mut trial = self.trial_started.lock();
                match *trial {
                    Some(at) if at.elapsed() < self.cooldown => Err(self.reject(name, "trial in flight")),
                    _ => {
                        *trial = Some(Instant::now());
                        info!("[resilience] {} circuit half-open — admitting one trial", name);
                        Ok(())
                    }
                }
            }
        }
    }

    fn reject(&self, name: &str, why: &str) -> EngineError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        EngineError::CircuitOpen(format!(
            "{}: {} consecutive failures, {}",
            name,
            self.consecutive_failures.load(Ordering::Relaxed),
            why
        ))
    }

    /// Record a successful call — resets the failure counter.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.tripped_at.lock() = None;
        *self.trial_started.lock() = None;
    }

    /// Record a failed call. Reaching the threshold (or failing a half-open
    /// trial) trips the circuit open.
    pub fn record_failure(&self, name: &str) {
        let prev = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.trial_started.lock() = None;
        if prev + 1 >= self.threshold {
            *self.tripped_at.lock() = Some(Instant::now());
            warn!(
                "[resilience] {} circuit tripped after {} consecutive failures — cooling down {}s",
                name,
                prev + 1,
                self.cooldown.as_secs()
            );
        }
    }

    pub fn rejected_calls(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

// ── Guarded results ────────────────────────────────────────────────────────

/// Where a guarded value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Live,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Guarded<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Guarded<T> {
    pub fn live(value: T) -> Self {
        Self { value, source: Source::Live }
    }

    pub fn fallback(value: T) -> Self {
        Self { value, source: Source::Fallback }
    }

    pub fn is_degraded(&self) -> bool {
        self.source == Source::Fallback
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        Guarded { value: f(self.value), source: self.source }
    }
}

// ── Guard ──────────────────────────────────────────────────────────────────

/// Timeout + retry + circuit breaker for one collaborator.
pub struct Guard {
    name: String,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl Guard {
    pub fn new(name: impl Into<String>, policy: RetryPolicy, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            policy,
            breaker: CircuitBreaker::new(threshold, cooldown),
        }
    }

    /// Guard with the default policy (3 retries, 5-failure breaker, 60s cooldown).
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(
            name,
            RetryPolicy::default(),
            DEFAULT_BREAKER_THRESHOLD,
            Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op` with timeout and retries. The breaker counts one failure per
    /// exhausted call, not per attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.breaker.check(&self.name)?;

        let mut last_error = EngineError::Other(format!("{}: no attempt made", self.name));
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(&self.policy, attempt - 1);
                warn!(
                    "[resilience] {} retry {}/{} after {}ms",
                    self.name,
                    attempt,
                    self.policy.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.policy.timeout, op()).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        info!("[resilience] {} recovered on attempt {}", self.name, attempt + 1);
                    }
                    self.breaker.record_success();
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    let transient = e.is_transient();
                    warn!("[resilience] {} attempt {} failed: {}", self.name, attempt + 1, e);
                    last_error = e;
                    if !transient {
                        break;
                    }
                }
                Err(_) => {
                    warn!(
                        "[resilience] {} attempt {} timed out after {}ms",
                        self.name,
                        attempt + 1,
                        self.policy.timeout.as_millis()
                    );
                    last_error = EngineError::Timeout(self.name.clone());
                }
            }
        }

        self.breaker.record_failure(&self.name);
        Err(last_error)
    }

    /// Run `op`; on exhaustion or an open circuit substitute `fallback()`.
    /// Never returns an error.
    pub async fn call<T, F, Fut, D>(&self, op: F, fallback: D) -> Guarded<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
        D: FnOnce() -> T,
    {
        match self.run(op).await {
            Ok(value) => Guarded::live(value),
            Err(e) => {
                warn!("[resilience] {} degraded to fallback: {}", self.name, e);
                Guarded::fallback(fallback())
            }
        }
    }
}

// ── Last-known-good cache ──────────────────────────────────────────────────

/// Remembers the last live answer per key so a fallback can reuse it.
pub struct LastKnown<K, V> {
    entries: Mutex<HashMap<K, V>>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V: Clone> LastKnown<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn remember(&self, key: K, value: V) {
        let mut map = self.entries.lock();
        if map.len() >= self.capacity && !map.contains_key(&key) {
            // Arbitrary eviction is fine: this is a best-effort cache.
            if let Some(evict) = map.keys().next().cloned() {
                map.remove(&evict);
            }
        }
        map.insert(key, value);
    }

    pub fn recall(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(200),
            max_retries: 2,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn jitter_stays_in_range() {
        for base in [100u64, 1000, 5000, 30_000] {
            for _ in 0..50 {
                let result = apply_jitter(base);
                assert!(result >= base * 3 / 4 && result <= base * 5 / 4, "jitter({}) = {}", base, result);
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            ..RetryPolicy::default()
        };
        let d0 = backoff_delay(&policy, 0).as_millis() as u64;
        let d2 = backoff_delay(&policy, 2).as_millis() as u64;
        let d9 = backoff_delay(&policy, 9).as_millis() as u64;
        assert!((750..=1250).contains(&d0));
        assert!((3000..=5000).contains(&d2));
        assert!(d9 <= 37_500);
    }

    #[test]
    fn circuit_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(cb.check("t").is_ok());
        cb.record_failure("t");
        cb.record_failure("t");
        assert!(cb.check("t").is_ok());
        cb.record_failure("t");
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.check("t").is_err());
        assert_eq!(cb.rejected_calls(), 1);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn circuit_breaker_resets_on_success() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure("t");
        cb.record_failure("t");
        cb.record_success();
        cb.record_failure("t");
        cb.record_failure("t");
        assert!(cb.check("t").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure("t");
        assert_eq!(cb.state(), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        // A failed trial re-trips immediately.
        cb.record_failure("t");
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_trial() {
        let policy = RetryPolicy { max_retries: 0, timeout: Duration::from_secs(5), ..fast_policy() };
        let guard = Guard::new("calc", policy, 1, Duration::from_secs(60));
        guard.breaker().record_failure("calc");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(guard.breaker().state(), BreakerState::HalfOpen);

        let calls = Arc::new(AtomicUsize::new(0));
        let attempts = (0..5).map(|_| {
            let c = calls.clone();
            guard.call(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Err::<u8, _>(EngineError::collaborator("calc", "503", true))
                    }
                },
                || 0,
            )
        });
        let results = futures::future::join_all(attempts).await;

        assert!(results.iter().all(Guarded::is_degraded));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(guard.breaker().rejected_calls(), 4);
        // The failed trial re-opened the circuit.
        assert_eq!(guard.breaker().state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes_the_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure("t");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cb.check("t").is_ok());
        assert!(cb.check("t").is_err());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.check("t").is_ok());
        assert!(cb.check("t").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn run_retries_transient_errors_then_succeeds() {
        let guard = Guard::new("calc", fast_policy(), 5, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let out = guard
            .run(|| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(EngineError::collaborator("calc", "503", true))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn run_does_not_retry_permanent_errors() {
        let guard = Guard::new("calc", fast_policy(), 5, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let out: EngineResult<()> = guard
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::collaborator("calc", "400", false))
                }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_time_out() {
        let guard = Guard::new("geo", fast_policy(), 5, Duration::from_secs(60));
        let out = guard
            .call(
                || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok("late".to_string())
                },
                || "fallback".to_string(),
            )
            .await;
        assert_eq!(out.value, "fallback");
        assert!(out.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_fails_fast_without_invoking() {
        let guard = Guard::new("gen", fast_policy(), 2, Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let c = calls.clone();
            let out = guard
                .call(
                    move || {
                        let c = c.clone();
                        async move {
                            c.fetch_add(1, Ordering::SeqCst);
                            Err::<u8, _>(EngineError::collaborator("gen", "502", true))
                        }
                    },
                    || 0,
                )
                .await;
            assert!(out.is_degraded());
        }
        let before = calls.load(Ordering::SeqCst);
        assert_eq!(before, 6); // 2 calls × (1 + 2 retries)

        let c = calls.clone();
        let out = guard
            .call(
                move || {
                    let c = c.clone();
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Ok::<u8, EngineError>(1)
                    }
                },
                || 0,
            )
            .await;
        assert_eq!(out, Guarded::fallback(0));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn last_known_is_bounded() {
        let cache: LastKnown<String, u32> = LastKnown::new(2);
        cache.remember("a".into(), 1);
        cache.remember("b".into(), 2);
        cache.remember("c".into(), 3);
        assert_eq!(cache.recall(&"c".to_string()), Some(3));
        assert_eq!(cache.entries.lock().len(), 2);
        cache.remember("c".into(), 4);
        assert_eq!(cache.recall(&"c".to_string()), Some(4));
    }
}
