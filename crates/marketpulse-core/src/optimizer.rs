//! Sliding-window provider performance tracking and dynamic ranking.
//!
//! The optimizer sits beside the circuit breakers: breakers decide whether a
//! provider may be called at all, the optimizer decides in which order the
//! remaining providers are tried and may veto chronically bad ones.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::provider::ProviderDescriptor;
use crate::{ProviderId, SourceError};

/// Tuning for metric retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptimizerConfig {
    /// Number of response-time samples kept per provider.
    pub history_window: usize,
    /// Idle time after which a sweep decays `recent_failures` by one.
    pub decay_after: Duration,
    /// Idle time after which a sweep drops a provider's metrics entirely.
    pub evict_after: Duration,
    /// A success newer than this earns the recency bonus.
    pub recent_success_window: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            history_window: 10,
            decay_after: Duration::from_secs(5 * 60),
            evict_after: Duration::from_secs(30 * 60),
            recent_success_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct ProviderMetrics {
    total_requests: u64,
    recent_failures: u64,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    last_activity: Instant,
    response_times_ms: VecDeque<f64>,
    success_rate: f64,
    average_response_ms: Option<f64>,
}

impl ProviderMetrics {
    fn new(now: Instant) -> Self {
        Self {
            total_requests: 0,
            recent_failures: 0,
            consecutive_failures: 0,
            last_success: None,
            last_activity: now,
            response_times_ms: VecDeque::new(),
            success_rate: 1.0,
            average_response_ms: None,
        }
    }

    fn recompute(&mut self) {
        self.success_rate = if self.total_requests == 0 {
            1.0
        } else {
            let failures = self.recent_failures.min(self.total_requests);
            (self.total_requests - failures) as f64 / self.total_requests as f64
        };
        self.average_response_ms = if self.response_times_ms.is_empty() {
            None
        } else {
            let sum: f64 = self.response_times_ms.iter().sum();
            Some(sum / self.response_times_ms.len() as f64)
        };
    }

    fn snapshot(&self, now: Instant) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests,
            recent_failures: self.recent_failures,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate,
            average_response_ms: self.average_response_ms,
            since_last_success: self
                .last_success
                .map(|at| now.saturating_duration_since(at)),
            samples: self.response_times_ms.len(),
        }
    }
}

/// Read-only view of one provider's metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub recent_failures: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    /// Mean of the retained samples; `None` until a success was timed.
    pub average_response_ms: Option<f64>,
    pub since_last_success: Option<Duration>,
    pub samples: usize,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            total_requests: 0,
            recent_failures: 0,
            consecutive_failures: 0,
            success_rate: 1.0,
            average_response_ms: None,
            since_last_success: None,
            samples: 0,
        }
    }
}

/// Dynamic priority for a provider. Lower is better, never negative.
pub fn score(static_priority: u32, metrics: &MetricsSnapshot, config: &OptimizerConfig) -> f64 {
    let mut priority = f64::from(static_priority);

    priority -= 2.0 * (metrics.success_rate - 0.5);

    if let Some(average) = metrics.average_response_ms {
        if average < 1_000.0 {
            priority -= 1.0;
        }
        if average > 5_000.0 {
            priority += 2.0;
        }
    }

    priority += 0.5 * f64::from(metrics.consecutive_failures);

    if metrics
        .since_last_success
        .is_some_and(|since| since < config.recent_success_window)
    {
        priority -= 0.5;
    }

    priority.max(0.0)
}

/// Whether the metrics are bad enough, and plentiful enough, to skip a provider.
pub fn is_vetoed(metrics: &MetricsSnapshot) -> bool {
    if metrics.total_requests < 5 {
        return false;
    }

    let stuck_failing = metrics.consecutive_failures >= 10;
    let mostly_failing = metrics.total_requests > 20 && metrics.success_rate < 0.1;
    let too_slow = metrics
        .average_response_ms
        .is_some_and(|average| average > 30_000.0)
        && metrics.total_requests > 10;

    stuck_failing || mostly_failing || too_slow
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub decayed: usize,
    pub evicted: usize,
}

/// Per-provider metrics recorder and ranker for one domain.
pub struct PerformanceOptimizer {
    config: OptimizerConfig,
    clock: Arc<dyn Clock>,
    metrics: Mutex<HashMap<ProviderId, Arc<Mutex<ProviderMetrics>>>>,
}

impl Default for PerformanceOptimizer {
    fn default() -> Self {
        Self::new(OptimizerConfig::default(), Arc::new(SystemClock))
    }
}

fn lock_metrics(entry: &Mutex<ProviderMetrics>) -> MutexGuard<'_, ProviderMetrics> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PerformanceOptimizer {
    pub fn new(config: OptimizerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            metrics: Mutex::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<ProviderId, Arc<Mutex<ProviderMetrics>>>> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, provider: ProviderId) -> Arc<Mutex<ProviderMetrics>> {
        let now = self.clock.now();
        let mut map = self.lock_map();
        Arc::clone(
            map.entry(provider)
                .or_insert_with(|| Arc::new(Mutex::new(ProviderMetrics::new(now)))),
        )
    }

    /// Times `op` and records its outcome. The result is passed through.
    pub async fn record_request<T, Fut>(&self, provider: ProviderId, op: Fut) -> Result<T, SourceError>
    where
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let started = self.clock.now();
        let result = op.await;
        let elapsed = self.clock.now().saturating_duration_since(started);

        match &result {
            Ok(_) => self.record_success(provider, elapsed),
            Err(_) => self.record_failure(provider),
        }
        result
    }

    pub fn record_success(&self, provider: ProviderId, elapsed: Duration) {
        let now = self.clock.now();
        let entry = self.entry(provider);
        let mut metrics = lock_metrics(&entry);

        metrics.total_requests = metrics.total_requests.saturating_add(1);
        metrics.consecutive_failures = 0;
        metrics.last_success = Some(now);
        metrics.last_activity = now;
        metrics
            .response_times_ms
            .push_back(elapsed.as_micros() as f64 / 1_000.0);
        while metrics.response_times_ms.len() > self.config.history_window {
            metrics.response_times_ms.pop_front();
        }
        metrics.recompute();
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let now = self.clock.now();
        let entry = self.entry(provider);
        let mut metrics = lock_metrics(&entry);

        metrics.total_requests = metrics.total_requests.saturating_add(1);
        metrics.recent_failures = metrics.recent_failures.saturating_add(1);
        metrics.consecutive_failures = metrics.consecutive_failures.saturating_add(1);
        metrics.last_activity = now;
        metrics.recompute();
    }

    pub fn snapshot(&self, provider: ProviderId) -> Option<MetricsSnapshot> {
        let entry = self.lock_map().get(&provider).cloned()?;
        let now = self.clock.now();
        let metrics = lock_metrics(&entry);
        Some(metrics.snapshot(now))
    }

    pub fn dynamic_priority(&self, descriptor: &ProviderDescriptor) -> f64 {
        let metrics = self.snapshot(descriptor.id).unwrap_or_default();
        score(descriptor.static_priority, &metrics, &self.config)
    }

    /// Stable ascending sort by dynamic priority. Scores are computed once,
    /// so concurrent metric updates cannot reorder a walk already planned.
    pub fn order_by_dynamic_priority(
        &self,
        descriptors: &[ProviderDescriptor],
    ) -> Vec<ProviderDescriptor> {
        let mut scored = descriptors
            .iter()
            .map(|descriptor| (self.dynamic_priority(descriptor), *descriptor))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.0.total_cmp(&right.0));
        scored.into_iter().map(|(_, descriptor)| descriptor).collect()
    }

    pub fn should_skip(&self, provider: ProviderId) -> bool {
        self.snapshot(provider).is_some_and(|metrics| is_vetoed(&metrics))
    }

    /// Decays failures of idle providers and forgets long-silent ones.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut map = self.lock_map();

        map.retain(|provider, entry| {
            let mut metrics = lock_metrics(entry);
            let idle = now.saturating_duration_since(metrics.last_activity);

            if idle >= self.config.evict_after {
                debug!(provider = %provider, idle_secs = idle.as_secs(), "evicting provider metrics");
                report.evicted += 1;
                return false;
            }

            if idle >= self.config.decay_after && metrics.recent_failures > 0 {
                metrics.recent_failures -= 1;
                metrics.recompute();
                report.decayed += 1;
            }
            true
        });

        report
    }
}
