//! Relay gateway server entrypoint.

mod bootstrap_helpers;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_config::GatewayCli;
use relay_dispatch::{CredentialSelector, PassthroughSessionFactory};
use relay_gateway::{run_gateway_server, GatewayState, GatewayStores};
use relay_scheduler::{
    start_refresh_scheduler, CredentialRefresher, HttpCredentialAuthorizer, RefreshSchedule,
    RefreshSchedulerHandle,
};
use tracing::{info, warn};

use bootstrap_helpers::{init_tracing, log_startup_banner, passthrough_config};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = GatewayCli::parse();
    run_gateway(cli).await
}

async fn run_gateway(cli: GatewayCli) -> Result<()> {
    let defaults = cli
        .initial_settings()
        .context("invalid startup settings")?;
    let stores = GatewayStores::open(defaults, &cli.data_dir)?;
    log_startup_banner(&cli, &stores);

    let factory = Arc::new(PassthroughSessionFactory::new(
        passthrough_config(&cli),
        Arc::clone(&stores.refresh_records),
    ));
    let mut scheduler = start_scheduler(&cli, &stores)?;
    let state = Arc::new(GatewayState::new(
        stores,
        factory,
        CredentialSelector::new(cli.limit_cooldown_seconds),
        cli.normalized_api_prefix(),
    ));

    let serve_result = run_gateway_server(&cli.bind, state).await;
    if let Some(handle) = scheduler.as_mut() {
        handle.shutdown().await;
    }
    serve_result
}

fn start_scheduler(
    cli: &GatewayCli,
    stores: &GatewayStores,
) -> Result<Option<RefreshSchedulerHandle>> {
    let Some(refresh_url) = cli
        .refresh_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    else {
        warn!("no refresh url configured, credential refresh jobs are disabled");
        return Ok(None);
    };
    let schedule = RefreshSchedule::parse(&cli.refresh_cron, &cli.refresh_timezone)?;
    let authorizer = HttpCredentialAuthorizer::new(refresh_url, cli.upstream_connect_timeout_ms)?;
    let refresher = Arc::new(CredentialRefresher::new(
        Arc::clone(&stores.pool),
        Arc::clone(&stores.refresh_records),
        Arc::new(authorizer),
        cli.refresh_max_age_seconds,
    ));
    let handle = start_refresh_scheduler(Arc::clone(&stores.config), refresher, schedule)?;
    info!(refresh_url, "credential refresh jobs registered");
    Ok(Some(handle))
}
