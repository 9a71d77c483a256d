use relay_config::GatewayCli;
use relay_dispatch::PassthroughConfig;
use relay_gateway::GatewayStores;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn passthrough_config(cli: &GatewayCli) -> PassthroughConfig {
    PassthroughConfig {
        requirements_path: cli
            .requirements_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_string),
        connect_timeout_ms: cli.upstream_connect_timeout_ms,
    }
}

/// Logs the effective startup configuration. Secrets never appear.
pub(crate) fn log_startup_banner(cli: &GatewayCli, stores: &GatewayStores) {
    let settings = stores.config.snapshot();
    info!(
        bind = %cli.bind,
        api_prefix = cli.normalized_api_prefix().as_deref().unwrap_or("None"),
        data_dir = %cli.data_dir.display(),
        "relay gateway starting"
    );
    info!(
        upstream_base_urls = ?settings.upstream_base_urls,
        proxy_urls = ?settings.proxy_urls,
        retry_times = settings.retry_times,
        enable_limit = settings.enable_limit,
        scheduled_refresh = settings.scheduled_refresh,
        auth_key_configured = settings.auth_key_override().is_some(),
        user_agents = settings.user_agents.len(),
        history_disabled = settings.history_disabled,
        "effective settings"
    );
    info!(
        accounts = stores.pool.rows().len(),
        available_tokens = stores.pool.available().len(),
        errored_tokens = stores.pool.errored().len(),
        client_keys = stores.registry.keys().len(),
        refresh_records = stores.refresh_records.len(),
        limit_cooldown_seconds = cli.limit_cooldown_seconds,
        refresh_cron = %cli.refresh_cron,
        refresh_timezone = %cli.refresh_timezone,
        "stores loaded"
    );
}
