use marketpulse_core::{CoreConfig, Domain, MarketRecord, Symbol};
use serde::Serialize;

use crate::cli::SymbolsArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SnapshotResponse {
    domain: Domain,
    records: Vec<MarketRecord>,
}

pub async fn run(args: &SymbolsArgs, config: &CoreConfig, pretty: bool) -> Result<(), CliError> {
    let domain = Domain::from(args.domain);
    let symbols = Symbol::parse_many(&args.symbols)?;

    let registry = super::registry(domain, config, &super::http_client());
    let records = registry.fetch_snapshot(&symbols).await?;

    output::render(&SnapshotResponse { domain, records }, pretty)
}
