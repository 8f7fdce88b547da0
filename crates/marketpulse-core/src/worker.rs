//! Background refresh worker.
//!
//! While running, each domain with a registry gets its own fixed-interval
//! tick. A tick fetches a snapshot through the registry, retrying with
//! exponential backoff, then writes the result through to the cache and the
//! fallback store before notifying subscribers. The worker is the only writer
//! of fresh snapshot data.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::{snapshot_key, symbol_key, CacheConfig, CachedValue, MarketCache};
use crate::clock::{Sleeper, TokioSleeper};
use crate::config::WorkerConfig;
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::store::SnapshotStore;
use crate::{Domain, MarketRecord, RegistryError, Symbol};

/// Callback invoked with every fresh batch.
pub type UpdateCallback = Arc<dyn Fn(&[MarketRecord], Domain) + Send + Sync>;

type SubscriberList = Mutex<Vec<(u64, UpdateCallback)>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`RefreshWorker::on_update`].
///
/// Dropping the handle keeps the subscription alive for the worker's
/// lifetime; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<SubscriberList>,
}

impl Subscription {
    /// Removes the callback. Returns false if it was already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(subscribers) = self.subscribers.upgrade() else {
            return false;
        };
        let mut subscribers = lock(&subscribers);
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != self.id);
        subscribers.len() != before
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub is_running: bool,
    pub config: WorkerConfig,
    pub subscriber_count: usize,
}

struct WorkerInner {
    registries: Vec<Arc<ProviderRegistry>>,
    cache: MarketCache,
    cache_config: CacheConfig,
    store: Option<Arc<dyn SnapshotStore>>,
    sleeper: Arc<dyn Sleeper>,
    config: RwLock<WorkerConfig>,
    subscribers: Arc<SubscriberList>,
    next_subscriber: AtomicU64,
    /// Bumped by every stop; a run ends once the epoch moves past its own.
    stop_epoch: watch::Sender<u64>,
}

/// Builder for [`RefreshWorker`].
pub struct RefreshWorkerBuilder {
    config: WorkerConfig,
    cache: MarketCache,
    cache_config: CacheConfig,
    registries: Vec<Arc<ProviderRegistry>>,
    store: Option<Arc<dyn SnapshotStore>>,
    sleeper: Arc<dyn Sleeper>,
}

impl RefreshWorkerBuilder {
    /// Registers the registry serving `registry.domain()`, replacing any
    /// earlier one for that domain.
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registries
            .retain(|known| known.domain() != registry.domain());
        self.registries.push(registry);
        self
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the sleeper used for retry backoff.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> RefreshWorker {
        let (stop_epoch, _) = watch::channel(0);
        let mut registries = self.registries;
        registries.sort_by_key(|registry| registry.domain() != Domain::Crypto);

        RefreshWorker {
            inner: Arc::new(WorkerInner {
                registries,
                cache: self.cache,
                cache_config: self.cache_config,
                store: self.store,
                sleeper: self.sleeper,
                config: RwLock::new(self.config),
                subscribers: Arc::new(Mutex::new(Vec::new())),
                next_subscriber: AtomicU64::new(1),
                stop_epoch,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

pub struct RefreshWorker {
    inner: Arc<WorkerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshWorker {
    pub fn builder(
        config: WorkerConfig,
        cache: MarketCache,
        cache_config: CacheConfig,
    ) -> RefreshWorkerBuilder {
        RefreshWorkerBuilder {
            config,
            cache,
            cache_config,
            registries: Vec::new(),
            store: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn cache(&self) -> &MarketCache {
        &self.inner.cache
    }

    pub fn registry(&self, domain: Domain) -> Option<&Arc<ProviderRegistry>> {
        self.inner.registry(domain)
    }

    pub fn is_running(&self) -> bool {
        !lock(&self.tasks).is_empty()
    }

    /// Starts the per-domain ticks and the metrics sweep. Calling it while
    /// already running does nothing and returns false.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            debug!("refresh worker already running");
            return false;
        }

        for registry in &self.inner.registries {
            let domain = registry.domain();
            let inner = Arc::clone(&self.inner);
            let stop = self.inner.stop_signal();
            debug!(domain = %domain, "scheduling refresh task");
            tasks.push(tokio::spawn(run_domain(inner, domain, stop)));
        }
        tasks.push(tokio::spawn(run_sweep(
            Arc::clone(&self.inner),
            self.inner.stop_signal(),
        )));

        let config = self.config();
        info!(
            crypto_interval_ms = config.crypto_interval.as_millis() as u64,
            stock_interval_ms = config.stock_interval.as_millis() as u64,
            domains = self.inner.registries.len(),
            "refresh worker started"
        );
        true
    }

    /// Stops scheduling ticks and waits for running tasks to finish. An
    /// in-flight fetch completes; a pending retry backoff is cut short.
    ///
    /// A `start` racing with the wait spawns a fresh run that this stop
    /// leaves alone.
    pub async fn stop(&self) {
        let tasks = {
            let mut tasks = lock(&self.tasks);
            if tasks.is_empty() {
                return;
            }
            self.inner.raise_stop();
            std::mem::take(&mut *tasks)
        };

        for task in tasks {
            if let Err(error) = task.await {
                warn!(error = %error, "refresh task ended abnormally");
            }
        }
        info!("refresh worker stopped");
    }

    pub fn config(&self) -> WorkerConfig {
        self.inner.config()
    }

    pub fn get_status(&self) -> WorkerStatus {
        WorkerStatus {
            is_running: self.is_running(),
            config: self.config(),
            subscriber_count: lock(&self.inner.subscribers).len(),
        }
    }

    /// Replaces the tracked symbols of `domain` from the next tick on.
    pub fn set_symbols(&self, domain: Domain, symbols: Vec<Symbol>) {
        let mut config = self
            .inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        debug!(domain = %domain, count = symbols.len(), "tracked symbols replaced");
        match domain {
            Domain::Crypto => config.crypto_symbols = symbols,
            Domain::Stock => config.stock_symbols = symbols,
        }
    }

    /// Registers `callback` for every fresh batch of either domain.
    pub fn on_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&[MarketRecord], Domain) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscribers).push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.inner.subscribers),
        }
    }

    /// Runs one tick for `domain` immediately, outside the schedule.
    pub async fn refresh_now(&self, domain: Domain) -> Result<Vec<MarketRecord>, RegistryError> {
        let mut stop = self.inner.stop_signal();
        self.inner.refresh(domain, &mut stop).await
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        if !lock(&self.tasks).is_empty() {
            self.inner.raise_stop();
        }
    }
}

impl WorkerInner {
    fn stop_signal(&self) -> StopSignal {
        let receiver = self.stop_epoch.subscribe();
        let epoch = *receiver.borrow();
        StopSignal { receiver, epoch }
    }

    fn raise_stop(&self) {
        self.stop_epoch
            .send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    fn registry(&self, domain: Domain) -> Option<&Arc<ProviderRegistry>> {
        self.registries
            .iter()
            .find(|registry| registry.domain() == domain)
    }

    fn config(&self) -> WorkerConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn refresh(
        &self,
        domain: Domain,
        stop: &mut StopSignal,
    ) -> Result<Vec<MarketRecord>, RegistryError> {
        let Some(registry) = self.registry(domain) else {
            return Err(RegistryError::NoEligibleProviders { domain });
        };
        let config = self.config();
        let symbols = config.symbols(domain);
        if symbols.is_empty() {
            debug!(domain = %domain, "no tracked symbols; skipping tick");
            return Ok(Vec::new());
        }

        let policy = RetryPolicy::new(config.retry_attempts, config.retry_backoff)
            .with_jitter(config.retry_jitter);
        let records = self.fetch_with_retry(registry, symbols, policy, stop).await?;
        self.publish(domain, symbols, &records).await;
        Ok(records)
    }

    async fn fetch_with_retry(
        &self,
        registry: &ProviderRegistry,
        symbols: &[Symbol],
        policy: RetryPolicy,
        stop: &mut StopSignal,
    ) -> Result<Vec<MarketRecord>, RegistryError> {
        let domain = registry.domain();
        let mut attempt = 1;

        loop {
            let error = match registry.fetch_snapshot(symbols).await {
                Ok(records) => {
                    debug!(domain = %domain, attempt, records = records.len(), "snapshot refreshed");
                    return Ok(records);
                }
                Err(error) => error,
            };

            let Some(delay) = policy.next_delay(attempt) else {
                warn!(
                    domain = %domain,
                    attempts = attempt,
                    error = %error,
                    "snapshot refresh failed; serving stale data"
                );
                return Err(error);
            };

            warn!(
                domain = %domain,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "snapshot refresh failed; retrying"
            );
            if !self.pause(delay, stop).await {
                debug!(domain = %domain, "retry cancelled by shutdown");
                return Err(error);
            }
            attempt += 1;
        }
    }

    /// Sleeps for `delay`. Returns false when shutdown interrupted the wait.
    async fn pause(&self, delay: Duration, stop: &mut StopSignal) -> bool {
        if stop.is_raised() {
            return false;
        }
        tokio::select! {
            _ = self.sleeper.sleep(delay) => true,
            _ = stop.raised() => false,
        }
    }

    async fn publish(&self, domain: Domain, symbols: &[Symbol], records: &[MarketRecord]) {
        let ttl = self.cache_config.snapshot_ttl(domain);
        self.cache
            .set(
                snapshot_key(domain, symbols),
                CachedValue::Snapshot(records.to_vec()),
                ttl,
            )
            .await;
        for record in records {
            self.cache
                .set(
                    symbol_key(domain, &record.symbol),
                    CachedValue::Record(record.clone()),
                    ttl,
                )
                .await;
        }

        if let Some(store) = &self.store {
            for record in records {
                if let Err(error) = store.persist_record(record).await {
                    warn!(
                        domain = %domain,
                        symbol = %record.symbol,
                        error = %error,
                        "failed to persist snapshot record"
                    );
                }
            }
        }

        self.notify(domain, records);
    }

    fn notify(&self, domain: Domain, records: &[MarketRecord]) {
        let subscribers = lock(&self.subscribers)
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect::<Vec<_>>();

        for (id, callback) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(records, domain))).is_err() {
                error!(domain = %domain, subscriber = id, "subscriber panicked; continuing");
            }
        }
    }
}

/// Stop signal for one run, captured at the epoch the run started in.
struct StopSignal {
    receiver: watch::Receiver<u64>,
    epoch: u64,
}

impl StopSignal {
    fn is_raised(&self) -> bool {
        *self.receiver.borrow() != self.epoch
    }

    async fn raised(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() != self.epoch {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

async fn run_domain(inner: Arc<WorkerInner>, domain: Domain, mut stop: StopSignal) {
    let period = inner.config().interval(domain).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.raised() => break,
        }

        debug!(domain = %domain, "refresh tick");
        // Failures are logged inside; stale data stays in place.
        let _ = inner.refresh(domain, &mut stop).await;

        if stop.is_raised() {
            break;
        }
    }
    debug!(domain = %domain, "refresh task exited");
}

async fn run_sweep(inner: Arc<WorkerInner>, mut stop: StopSignal) {
    let period = inner.config().sweep_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.raised() => break,
        }

        for registry in &inner.registries {
            let report = registry.sweep();
            if report.decayed > 0 || report.evicted > 0 {
                debug!(
                    domain = %registry.domain(),
                    decayed = report.decayed,
                    evicted = report.evicted,
                    "provider metrics swept"
                );
            }
        }
        let purged = inner.cache.purge_expired().await;
        if purged > 0 {
            debug!(purged, "expired cache entries purged");
        }
    }
}
