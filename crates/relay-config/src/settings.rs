//! Live gateway settings record, partial updates, and the textual parsers
//! shared by the CLI, the admin surface, and the persisted overlay.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const TRUTHY_LITERALS: [&str; 5] = ["true", "1", "t", "y", "yes"];
const CLEAR_AUTH_KEY_LITERAL: &str = "None";

/// The single live configuration record read by dispatch and scheduling.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub upstream_base_urls: Vec<String>,
    pub proxy_urls: Vec<String>,
    pub retry_times: u32,
    pub enable_limit: bool,
    pub scheduled_refresh: bool,
    pub auth_key: Option<String>,
    pub user_agents: Vec<String>,
    pub history_disabled: bool,
}

impl GatewaySettings {
    /// Number of dispatch attempts; zero and one both mean a single attempt.
    pub fn max_attempts(&self) -> usize {
        usize::try_from(self.retry_times.max(1)).unwrap_or(usize::MAX)
    }

    /// Returns the override key when one is configured and non-empty.
    pub fn auth_key_override(&self) -> Option<&str> {
        self.auth_key
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            upstream_base_urls: vec!["https://chatgpt.com".to_string()],
            proxy_urls: Vec::new(),
            retry_times: 3,
            enable_limit: true,
            scheduled_refresh: false,
            auth_key: None,
            user_agents: Vec::new(),
            history_disabled: true,
        }
    }
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("upstream_base_urls", &self.upstream_base_urls)
            .field("proxy_urls", &self.proxy_urls)
            .field("retry_times", &self.retry_times)
            .field("enable_limit", &self.enable_limit)
            .field("scheduled_refresh", &self.scheduled_refresh)
            .field(
                "auth_key",
                &self.auth_key_override().map(|_| "[REDACTED]"),
            )
            .field("user_agents", &self.user_agents)
            .field("history_disabled", &self.history_disabled)
            .finish()
    }
}

/// A loosely typed option value as submitted by forms, JSON, or the overlay file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Partial configuration update. Absent fields keep their current value and
/// unknown keys are ignored during deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chatgpt_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_times: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_limit: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_refresh: Option<ConfigValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_disabled: Option<ConfigValue>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies the supplied fields onto `settings`, leaving the rest untouched.
    pub fn apply_to(&self, settings: &mut GatewaySettings) -> Result<(), ConfigError> {
        if let Some(raw) = &self.chatgpt_base_url {
            settings.upstream_base_urls = split_comma_list(raw);
        }
        if let Some(raw) = &self.proxy_url {
            settings.proxy_urls = split_comma_list(raw);
        }
        if let Some(value) = &self.retry_times {
            settings.retry_times = parse_retry_times(value)?;
        }
        if let Some(value) = &self.enable_limit {
            settings.enable_limit = is_truthy(value);
        }
        if let Some(value) = &self.scheduled_refresh {
            settings.scheduled_refresh = is_truthy(value);
        }
        if let Some(raw) = &self.auth_key {
            settings.auth_key = if raw == CLEAR_AUTH_KEY_LITERAL {
                None
            } else {
                Some(raw.clone())
            };
        }
        if let Some(raw) = &self.user_agents {
            settings.user_agents = parse_list_literal(raw)?;
        }
        if let Some(value) = &self.history_disabled {
            settings.history_disabled = is_truthy(value);
        }
        Ok(())
    }

    /// Overlays `newer` onto `self`; fields present in `newer` win.
    pub fn merge(&mut self, newer: ConfigUpdate) {
        fn take<T>(slot: &mut Option<T>, newer: Option<T>) {
            if newer.is_some() {
                *slot = newer;
            }
        }
        take(&mut self.chatgpt_base_url, newer.chatgpt_base_url);
        take(&mut self.proxy_url, newer.proxy_url);
        take(&mut self.retry_times, newer.retry_times);
        take(&mut self.enable_limit, newer.enable_limit);
        take(&mut self.scheduled_refresh, newer.scheduled_refresh);
        take(&mut self.auth_key, newer.auth_key);
        take(&mut self.user_agents, newer.user_agents);
        take(&mut self.history_disabled, newer.history_disabled);
    }
}

/// Truthy parsing: booleans as-is, integers equal to 1, and strings in the
/// literal set (case-insensitive).
pub fn is_truthy(value: &ConfigValue) -> bool {
    match value {
        ConfigValue::Bool(flag) => *flag,
        ConfigValue::Integer(number) => *number == 1,
        ConfigValue::Text(text) => is_truthy_str(text),
    }
}

pub fn is_truthy_str(raw: &str) -> bool {
    let lowered = raw.to_ascii_lowercase();
    TRUTHY_LITERALS.contains(&lowered.as_str())
}

/// Splits a comma separated list, trimming entries and dropping empties.
pub fn split_comma_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_retry_times(value: &ConfigValue) -> Result<u32, ConfigError> {
    match value {
        ConfigValue::Bool(flag) => Ok(u32::from(*flag)),
        ConfigValue::Integer(number) => u32::try_from(*number)
            .map_err(|_| ConfigError::InvalidRetryTimes(number.to_string())),
        ConfigValue::Text(text) => text
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidRetryTimes(text.clone())),
    }
}

/// Parses a bracketed list of quoted strings such as `['a', "b"]`.
///
/// Both quote styles and backslash escapes are accepted, so JSON arrays of
/// strings parse as well. A blank input is an empty list.
pub fn parse_list_literal(raw: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let invalid = |reason: &str| ConfigError::InvalidListLiteral {
        raw: trimmed.to_string(),
        reason: reason.to_string(),
    };
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| invalid("expected a bracketed list"))?;

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.peek().is_some_and(|ch| ch.is_whitespace()) {
            chars.next();
        }
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return Err(invalid("list items must be quoted strings"));
        }
        let mut item = String::new();
        let mut closed = false;
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some('n') => item.push('\n'),
                    Some('t') => item.push('\t'),
                    Some(other) => item.push(other),
                    None => return Err(invalid("dangling escape")),
                },
                _ if ch == quote => {
                    closed = true;
                    break;
                }
                _ => item.push(ch),
            }
        }
        if !closed {
            return Err(invalid("unterminated string"));
        }
        items.push(item);

        while chars.peek().is_some_and(|ch| ch.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return Err(invalid("expected ',' between items")),
        }
    }
    Ok(items)
}
