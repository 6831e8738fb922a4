//! Environment variable overrides for configuration.
//!
//! Secrets can be kept out of the config file:
//! - `WEESLACK_RELAY_HOST`, `WEESLACK_RELAY_PORT`, `WEESLACK_RELAY_PASSWORD`
//! - `WEESLACK_SLACK_BOT_TOKEN`, `WEESLACK_SLACK_USER_TOKEN`, `WEESLACK_SLACK_APP_TOKEN`

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "WEESLACK";

/// Default config file name.
const DEFAULT_CONFIG_PATH: &str = "weeslack.conf";

fn var(name: &str) -> Option<String> {
    env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Some(host) = var("RELAY_HOST") {
        config.relay.host = host;
    }
    if let Some(port) = var("RELAY_PORT").and_then(|p| p.parse().ok()) {
        config.relay.port = port;
    }
    if let Some(password) = var("RELAY_PASSWORD") {
        config.relay.password = password;
    }

    if let Some(token) = var("SLACK_BOT_TOKEN") {
        config.slack.bot_token = token;
    }
    if let Some(token) = var("SLACK_USER_TOKEN") {
        config.slack.user_token = token;
    }
    if let Some(token) = var("SLACK_APP_TOKEN") {
        config.slack.app_token = token;
    }

    config
}

/// Get the config file path from `WEESLACK_CONFIG` or use the default.
pub fn get_config_path() -> String {
    var("CONFIG").unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}
