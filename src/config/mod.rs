//! Typed configuration.
//!
//! Environment variables load once at startup and fail fast when required
//! vars are missing; sensitive values are wrapped in
//! `secrecy::SecretString` to prevent log leaks. The account roster comes
//! from a TOML file.

pub mod secrets;

use std::path::Path;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::source::Credentials;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub task_api_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            task_api_url: required_var("TASK_API_URL")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Top-level TOML wrapper for the account roster.
#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default, rename = "account")]
    accounts: Vec<Credentials>,
}

/// Load the worker account roster from a TOML file of `[[account]]`
/// entries with `username` and `password` keys.
pub fn load_accounts(path: &Path) -> Result<Vec<Credentials>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read accounts file {}: {e}", path.display())))?;
    let parsed: AccountsFile = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("bad accounts file {}: {e}", path.display())))?;
    if parsed.accounts.is_empty() {
        return Err(Error::Config(format!(
            "accounts file {} defines no accounts",
            path.display()
        )));
    }
    Ok(parsed.accounts)
}
