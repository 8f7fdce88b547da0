use std::io::{self, Stdout};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use marketpulse_core::{
    CoreConfig, Domain, HttpClient, MemorySnapshotStore, RefreshWorker, SnapshotStore, Symbol,
    TtlCache, WarehouseSnapshotStore,
};
use serde_json::json;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::output::NdjsonStreamWriter;

/// Runs the worker until Ctrl-C, printing one NDJSON line per update batch.
pub async fn run(args: &RunArgs, mut config: CoreConfig) -> Result<(), CliError> {
    if !args.crypto.is_empty() {
        config.worker.crypto_symbols = Symbol::parse_many(&args.crypto)?;
    }
    if !args.stock.is_empty() {
        config.worker.stock_symbols = Symbol::parse_many(&args.stock)?;
    }

    let store: Arc<dyn SnapshotStore> = if args.memory_store {
        Arc::new(MemorySnapshotStore::new())
    } else {
        Arc::new(WarehouseSnapshotStore::new(super::open_warehouse(&config)?))
    };

    let http: Arc<dyn HttpClient> = super::http_client();
    let mut builder = RefreshWorker::builder(
        config.worker.clone(),
        TtlCache::new(config.cache.capacity),
        config.cache,
    )
    .store(store);
    for domain in Domain::ALL {
        builder = builder.registry(Arc::new(super::registry(domain, &config, &http)));
    }
    let worker = builder.build();

    let writer = Arc::new(Mutex::new(NdjsonStreamWriter::new(io::stdout())));
    let updates = Arc::new(AtomicU64::new(0));
    writer
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .emit_start(json!({
            "crypto": config.worker.crypto_symbols,
            "stock": config.worker.stock_symbols,
        }))?;

    let subscription = worker.on_update({
        let writer: Arc<Mutex<NdjsonStreamWriter<Stdout>>> = Arc::clone(&writer);
        let updates = Arc::clone(&updates);
        move |records, domain| {
            updates.fetch_add(1, Ordering::Relaxed);
            let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(error) = writer.emit_update(domain, records) {
                warn!(domain = %domain, error = %error, "failed to write update");
            }
        }
    });

    worker.start();
    tokio::signal::ctrl_c().await?;
    info!("interrupt received; stopping");
    worker.stop().await;
    subscription.unsubscribe();

    let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    writer.emit_end(json!({ "updates": updates.load(Ordering::Relaxed) }))
}
