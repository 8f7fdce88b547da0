use std::sync::Arc;

use marketpulse_core::{
    CoreConfig, Domain, MarketReader, SnapshotRead, Symbol, TtlCache, WarehouseSnapshotStore,
};
use serde::Serialize;

use crate::cli::SymbolsArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct ReadResponse {
    domain: Domain,
    #[serde(flatten)]
    read: SnapshotRead,
}

/// Serves stored snapshots only; a one-shot process has no warm cache.
pub async fn run(args: &SymbolsArgs, config: &CoreConfig, pretty: bool) -> Result<(), CliError> {
    let domain = Domain::from(args.domain);
    let symbols = Symbol::parse_many(&args.symbols)?;

    let warehouse = super::open_warehouse(config)?;
    let reader = MarketReader::new(TtlCache::new(config.cache.capacity), config.cache)
        .with_store(Arc::new(WarehouseSnapshotStore::new(warehouse)));
    let read = reader.read_snapshot(domain, &symbols).await?;

    output::render(&ReadResponse { domain, read }, pretty)
}
