use marketpulse_core::{CoreConfig, Domain, HistoryRange, SeriesPoint, Symbol};
use serde::Serialize;
use tracing::info;

use crate::cli::HistoryArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct HistoryResponse {
    domain: Domain,
    symbol: Symbol,
    range: HistoryRange,
    points: Vec<SeriesPoint>,
}

pub async fn run(args: &HistoryArgs, config: &CoreConfig, pretty: bool) -> Result<(), CliError> {
    let domain = Domain::from(args.domain);
    let symbol = Symbol::parse(&args.symbol)?;
    let range = args.range.parse::<HistoryRange>()?;

    let registry = super::registry(domain, config, &super::http_client());
    let points = registry.fetch_history(&symbol, range).await;
    if points.is_empty() {
        info!(domain = %domain, symbol = %symbol, range = %range, "no provider returned history");
    }

    output::render(
        &HistoryResponse {
            domain,
            symbol,
            range,
            points,
        },
        pretty,
    )
}
