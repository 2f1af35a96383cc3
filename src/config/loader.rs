//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{BotError, Result};

/// Environment variable holding the API token
pub const TOKEN_ENV_VAR: &str = "DERIV_TOKEN";

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. `DERIV_TOKEN` for the credential
/// 2. Environment variables (prefixed with APP_, sections split by `__`)
/// 3. Configuration file (TOML format)
/// 4. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    let mut app: AppConfig = config
        .try_deserialize()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    apply_token_override(&mut app, std::env::var(TOKEN_ENV_VAR).ok());
    Ok(app)
}

/// Load configuration from environment variables only
pub fn load_from_env() -> Result<AppConfig> {
    load_config(None)
}

fn apply_token_override(config: &mut AppConfig, token: Option<String>) {
    if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
        config.broker.api_token = Some(token.trim().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_override_wins() {
        let mut config = AppConfig::default();
        config.broker.api_token = Some("from-file".to_string());
        apply_token_override(&mut config, Some(" from-env ".to_string()));
        assert_eq!(config.broker.api_token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_blank_token_ignored() {
        let mut config = AppConfig::default();
        config.broker.api_token = Some("from-file".to_string());
        apply_token_override(&mut config, Some("   ".to_string()));
        assert_eq!(config.broker.api_token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Some("does-not-exist.toml")).unwrap();
        assert_eq!(config.trading.max_trades_per_day, 100);
    }
}
