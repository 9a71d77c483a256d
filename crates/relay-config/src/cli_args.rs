use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::settings::{is_truthy_str, parse_list_literal, split_comma_list, GatewaySettings};
use crate::ConfigError;

const API_PREFIX_UNSET_LITERAL: &str = "None";

fn parse_truthy_flag(value: &str) -> Result<bool, String> {
    Ok(is_truthy_str(value.trim()))
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "relay-gateway",
    about = "OpenAI-compatible gateway over a rotating pool of upstream credentials",
    version
)]
/// Startup configuration surface. Mutable fields seed the config store.
pub struct GatewayCli {
    #[arg(
        long,
        env = "RELAY_BIND",
        default_value = "0.0.0.0:5005",
        help = "Socket address the HTTP server binds to"
    )]
    pub bind: String,

    #[arg(
        long = "api-prefix",
        env = "API_PREFIX",
        help = "Path prefix of the admin surface (admin lives at /<prefix>/admin)"
    )]
    pub api_prefix: Option<String>,

    #[arg(
        long = "data-dir",
        env = "RELAY_DATA_DIR",
        default_value = "data",
        help = "Directory holding accounts.csv, users.csv, error tokens and record maps"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long = "chatgpt-base-url",
        env = "CHATGPT_BASE_URL",
        default_value = "https://chatgpt.com",
        help = "Comma separated upstream base URLs rotated per session"
    )]
    pub chatgpt_base_url: String,

    #[arg(
        long = "auth-key",
        env = "AUTH_KEY",
        help = "Override client key admitted in addition to the users table"
    )]
    pub auth_key: Option<String>,

    #[arg(
        long = "proxy-url",
        env = "PROXY_URL",
        default_value = "",
        help = "Comma separated outbound proxy URLs rotated per session"
    )]
    pub proxy_url: String,

    #[arg(
        long = "retry-times",
        env = "RETRY_TIMES",
        default_value_t = 3,
        help = "Dispatch attempts per request (0 and 1 both mean a single attempt)"
    )]
    pub retry_times: u32,

    #[arg(
        long = "enable-limit",
        env = "ENABLE_LIMIT",
        default_value = "true",
        value_parser = parse_truthy_flag,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Skip credentials that were rate limited until their cooldown expires"
    )]
    pub enable_limit: bool,

    #[arg(
        long = "scheduled-refresh",
        env = "SCHEDULED_REFRESH",
        default_value = "false",
        value_parser = parse_truthy_flag,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Enable the startup soft refresh and periodic forced credential refresh"
    )]
    pub scheduled_refresh: bool,

    #[arg(
        long = "user-agents",
        env = "USER_AGENTS",
        default_value = "[]",
        help = "List literal of outbound user agents, e.g. ['ua-1', 'ua-2']"
    )]
    pub user_agents: String,

    #[arg(
        long = "history-disabled",
        env = "HISTORY_DISABLED",
        default_value = "true",
        value_parser = parse_truthy_flag,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Ask the upstream not to persist conversation history"
    )]
    pub history_disabled: bool,

    #[arg(
        long = "refresh-url",
        env = "RELAY_REFRESH_URL",
        help = "Token refresh endpoint used by the refresh scheduler"
    )]
    pub refresh_url: Option<String>,

    #[arg(
        long = "refresh-cron",
        env = "RELAY_REFRESH_CRON",
        default_value = "0 0 3 */4 * *",
        help = "Cron expression (with seconds) of the periodic forced refresh"
    )]
    pub refresh_cron: String,

    #[arg(
        long = "refresh-timezone",
        env = "RELAY_REFRESH_TIMEZONE",
        default_value = "UTC",
        help = "IANA timezone the refresh cron expression is evaluated in"
    )]
    pub refresh_timezone: String,

    #[arg(
        long = "refresh-max-age-seconds",
        env = "RELAY_REFRESH_MAX_AGE_SECONDS",
        default_value_t = 432_000,
        value_parser = parse_positive_u64,
        help = "Age after which the soft refresh considers a credential due"
    )]
    pub refresh_max_age_seconds: u64,

    #[arg(
        long = "requirements-path",
        env = "RELAY_REQUIREMENTS_PATH",
        help = "Optional upstream path queried for per-request requirements before sending"
    )]
    pub requirements_path: Option<String>,

    #[arg(
        long = "limit-cooldown-seconds",
        env = "RELAY_LIMIT_COOLDOWN_SECONDS",
        default_value_t = 600,
        value_parser = parse_positive_u64,
        help = "Cooldown applied to a rate limited credential when --enable-limit is on"
    )]
    pub limit_cooldown_seconds: u64,

    #[arg(
        long = "upstream-connect-timeout-ms",
        env = "RELAY_UPSTREAM_CONNECT_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64,
        help = "Connect timeout for upstream sessions"
    )]
    pub upstream_connect_timeout_ms: u64,
}

impl GatewayCli {
    /// Admin prefix with surrounding slashes removed; `None` or blank means
    /// the admin surface is mounted at `/admin`.
    pub fn normalized_api_prefix(&self) -> Option<String> {
        self.api_prefix
            .as_deref()
            .map(|raw| raw.trim().trim_matches('/'))
            .filter(|raw| !raw.is_empty() && *raw != API_PREFIX_UNSET_LITERAL)
            .map(str::to_string)
    }

    /// Builds the startup settings record from flags and environment.
    pub fn initial_settings(&self) -> Result<GatewaySettings, ConfigError> {
        Ok(GatewaySettings {
            upstream_base_urls: split_comma_list(&self.chatgpt_base_url),
            proxy_urls: split_comma_list(&self.proxy_url),
            retry_times: self.retry_times,
            enable_limit: self.enable_limit,
            scheduled_refresh: self.scheduled_refresh,
            auth_key: self
                .auth_key
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            user_agents: parse_list_literal(&self.user_agents)?,
            history_disabled: self.history_disabled,
        })
    }
}
