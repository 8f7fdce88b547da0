//! Per-provider circuit breaker.
//!
//! - **Closed**: calls go through; failures are counted.
//! - **Open**: calls fail fast with [`SourceErrorKind::CircuitOpen`](crate::SourceErrorKind)
//!   until the recovery timeout has elapsed since the last failure.
//! - **HalfOpen**: one probe at a time is let through; `success_threshold`
//!   probe successes close the circuit, any probe failure re-opens it.
//!
//! Breakers are created lazily per provider by a [`BreakerStore`] owned by
//! each domain registry and live for the life of that registry.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::{Domain, ProviderId, SourceError};

/// Runtime circuit state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            half_open_successes: 0,
            probe_in_flight: false,
        }
    }
}

/// Point-in-time view of a breaker, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_successes: u32,
}

/// Thread-safe circuit breaker for one (domain, provider) pair.
pub struct CircuitBreaker {
    provider: ProviderId,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<CircuitInner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(provider: ProviderId, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(provider, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        provider: ProviderId,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            config,
            clock,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn recovery_elapsed(&self, inner: &CircuitInner) -> bool {
        inner
            .last_failure
            .map(|at| self.clock.now().saturating_duration_since(at) >= self.config.recovery_timeout)
            .unwrap_or(true)
    }

    /// Runs `op` through the breaker.
    ///
    /// Fails with a circuit-open error without polling `op` when the breaker
    /// refuses the call. Otherwise the outcome of `op` is recorded and
    /// returned unchanged.
    pub async fn call<T, Fut>(&self, op: Fut) -> Result<T, SourceError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        if !self.allow_request() {
            return Err(SourceError::circuit_open(self.provider));
        }

        let mut guard = CallGuard {
            breaker: self,
            settled: false,
        };
        let result = op.await;
        guard.settled = true;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Admits or refuses one call, moving Open to HalfOpen once the recovery
    /// window has passed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
            CircuitState::Open => {
                if !self.recovery_elapsed(&inner) {
                    return false;
                }
                info!(
                    provider = %self.provider,
                    "circuit breaker transitioning from open to half_open"
                );
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                inner.probe_in_flight = true;
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
            inner.half_open_successes = inner.half_open_successes.saturating_add(1);
            debug!(
                provider = %self.provider,
                successes = inner.half_open_successes,
                threshold = self.config.success_threshold,
                "half_open probe succeeded"
            );
            if inner.half_open_successes >= self.config.success_threshold {
                info!(provider = %self.provider, "circuit breaker closed after recovery");
                inner.state = CircuitState::Closed;
                inner.half_open_successes = 0;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(self.clock.now());

        let reopen = inner.state == CircuitState::HalfOpen;
        inner.probe_in_flight = false;

        if reopen || inner.failure_count >= self.config.failure_threshold {
            if inner.state != CircuitState::Open {
                info!(
                    provider = %self.provider,
                    failures = inner.failure_count,
                    from = %inner.state,
                    "circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
            inner.half_open_successes = 0;
        }
    }

    fn release_probe(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// True while calls would be refused outright: open and still inside the
    /// recovery window.
    pub fn is_blocking(&self) -> bool {
        let inner = self.lock();
        inner.state == CircuitState::Open && !self.recovery_elapsed(&inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_successes: inner.half_open_successes,
        }
    }

    /// Administrative reset back to a fresh closed circuit.
    pub fn reset(&self) {
        *self.lock() = CircuitInner::default();
        info!(provider = %self.provider, "circuit breaker reset");
    }
}

/// Frees a half-open probe slot when a call is dropped before settling.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_probe();
        }
    }
}

/// Lazily populated breakers for one domain, keyed by provider.
///
/// The map lock only guards lookup; each breaker serialises its own state.
pub struct BreakerStore {
    domain: Domain,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl BreakerStore {
    pub fn new(domain: Domain, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            domain,
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub const fn domain(&self) -> Domain {
        self.domain
    }

    pub fn get(&self, provider: ProviderId) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(breakers.entry(provider).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(
                provider,
                self.config,
                Arc::clone(&self.clock),
            ))
        }))
    }

    /// Current state of a provider's breaker without creating one.
    pub fn snapshot(&self, provider: ProviderId) -> Option<BreakerSnapshot> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers.get(&provider).map(|breaker| breaker.snapshot())
    }

    pub fn reset(&self, provider: ProviderId) {
        if let Some(snapshot) = self.snapshot(provider) {
            debug!(domain = %self.domain, provider = %provider, state = %snapshot.state, "resetting breaker");
            self.get(provider).reset();
        }
    }
}
