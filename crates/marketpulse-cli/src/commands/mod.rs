mod history;
mod read;
mod run;
mod snapshot;
mod sources;

use std::sync::Arc;

use marketpulse_core::{
    CoreConfig, Domain, HttpClient, ProviderRegistry, ReqwestHttpClient, Warehouse,
    WarehouseConfig,
};
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub async fn run(cli: &Cli) -> Result<(), CliError> {
    let config = CoreConfig::from_env()?;

    match &cli.command {
        Command::Run(args) => run::run(args, config).await,
        Command::Snapshot(args) => snapshot::run(args, &config, cli.pretty).await,
        Command::History(args) => history::run(args, &config, cli.pretty).await,
        Command::Sources(args) => sources::run(args, &config, cli.pretty),
        Command::Read(args) => read::run(args, &config, cli.pretty).await,
    }
}

/// Registry over the built-in providers of `domain`, sharing one HTTP client.
fn registry(domain: Domain, config: &CoreConfig, http: &Arc<dyn HttpClient>) -> ProviderRegistry {
    ProviderRegistry::with_built_ins(domain, config, Arc::clone(http))
}

fn http_client() -> Arc<dyn HttpClient> {
    Arc::new(ReqwestHttpClient::new())
}

/// Opens the configured warehouse, or the default one under the data home.
fn open_warehouse(config: &CoreConfig) -> Result<Warehouse, CliError> {
    let warehouse_config = match &config.warehouse_path {
        Some(path) => WarehouseConfig::at(path.clone()),
        None => WarehouseConfig::default(),
    };
    debug!(path = %warehouse_config.db_path.display(), "opening warehouse");
    Ok(Warehouse::open(warehouse_config)?)
}
