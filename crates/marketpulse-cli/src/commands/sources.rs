use marketpulse_core::{CoreConfig, Domain, ProviderStatus};
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
struct SourcesResponse {
    domain: Domain,
    sources: Vec<ProviderStatus>,
}

pub fn run(args: &SourcesArgs, config: &CoreConfig, pretty: bool) -> Result<(), CliError> {
    let domain = Domain::from(args.domain);
    let registry = super::registry(domain, config, &super::http_client());

    output::render(
        &SourcesResponse {
            domain,
            sources: registry.provider_status(),
        },
        pretty,
    )
}
