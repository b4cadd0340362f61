//! Configuration loading and default template generation.
//!
//! This module provides:
//!
//! - [`Config`]: server settings, storage backend and the chain table.
//! - [`load_config`]: reads a TOML file, resolving `$VAR` / `${VAR}`
//!   references in string values.
//! - [`generate_default_config`]: produces a commented TOML template.
//!
//! # Configuration File Format
//!
//! ```toml
//! port = 3000
//! host = "0.0.0.0"
//! api_root = "/api"
//!
//! [storage]
//! fixtures = "fixtures.json"
//!
//! [chains.BTC.networks.main]
//! rpc_url = "http://127.0.0.1:8332"
//! rpc_user = "$BTC_RPC_USER"
//! rpc_password = "${BTC_RPC_PASSWORD}"
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chain::ChainsConfig;
use crate::error::Error;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_API_ROOT: &str = "/api";
const DEFAULT_STREAM_BUFFER: usize = 32;

/// Storage backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file seeding the in-memory store. Relative paths resolve against
    /// the config file's directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixtures: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    host: IpAddr,
    #[serde(default = "default_port")]
    port: u16,
    /// Path prefix every route is mounted under.
    #[serde(default = "default_api_root")]
    api_root: String,
    /// Records a streamed listing may buffer ahead of a slow client.
    #[serde(default = "default_stream_buffer")]
    stream_buffer: usize,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    chains: ChainsConfig,
}

fn default_host() -> IpAddr {
    std::env::var("HOST")
        .ok()
        .and_then(|h| h.parse().ok())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn default_api_root() -> String {
    DEFAULT_API_ROOT.to_owned()
}

const fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

impl Config {
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    #[must_use]
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    #[must_use]
    pub const fn stream_buffer(&self) -> usize {
        self.stream_buffer
    }

    #[must_use]
    pub const fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    #[must_use]
    pub const fn chains(&self) -> &ChainsConfig {
        &self.chains
    }
}

/// Resolve an environment-variable reference (`$VAR` or `${VAR}`), returning
/// the literal string unchanged if it does not match either pattern.
fn resolve_env(value: &str) -> Result<String, Error> {
    let var_name = if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        name
    } else if let Some(name) = value
        .strip_prefix('$')
        .filter(|n| !n.is_empty() && n.chars().all(|c| c.is_alphanumeric() || c == '_'))
    {
        name
    } else {
        return Ok(value.to_owned());
    };
    std::env::var(var_name)
        .map_err(|_| Error::config(format!("env var '{var_name}' not found (referenced as '{value}')")))
}

/// Replaces every env reference in the string values of a TOML tree.
fn resolve_env_refs(value: &mut toml::Value) -> Result<(), Error> {
    match value {
        toml::Value::String(s) => *s = resolve_env(s)?,
        toml::Value::Array(items) => {
            for item in items {
                resolve_env_refs(item)?;
            }
        }
        toml::Value::Table(table) => {
            for (_, item) in table.iter_mut() {
                resolve_env_refs(item)?;
            }
        }
        toml::Value::Integer(_)
        | toml::Value::Float(_)
        | toml::Value::Boolean(_)
        | toml::Value::Datetime(_) => {}
    }
    Ok(())
}

/// Load configuration from a TOML file at the given path.
///
/// Values not present in the file fall back to environment variables
/// (`PORT`, `HOST`) and then to hardcoded defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be resolved, read, or parsed, or if
/// it references an unset environment variable.
pub fn load_config(path: &Path) -> Result<Config, Error> {
    let config_path = path.canonicalize().map_err(|e| {
        Error::config_with(format!("failed to resolve config path '{}'", path.display()), e)
    })?;
    let content = std::fs::read_to_string(&config_path).map_err(|e| {
        Error::config_with(format!("failed to read config file '{}'", config_path.display()), e)
    })?;
    let mut doc: toml::Value = toml::from_str(&content).map_err(|e| {
        Error::config_with(format!("failed to parse TOML config '{}'", config_path.display()), e)
    })?;
    resolve_env_refs(&mut doc)?;
    let mut config: Config = doc.try_into().map_err(|e| {
        Error::config_with(format!("invalid config '{}'", config_path.display()), e)
    })?;

    if let Some(dir) = config_path.parent()
        && let Some(fixtures) = config.storage.fixtures.as_mut()
        && fixtures.is_relative()
    {
        *fixtures = dir.join(&*fixtures);
    }
    Ok(config)
}

/// Generate a default TOML configuration template.
#[must_use]
pub fn generate_default_config() -> String {
    String::from(
        r#"# chainstate configuration

# Server bind address and port.
# Can also be set via HOST / PORT environment variables.
host = "0.0.0.0"
port = 3000

# Path prefix of every route.
api_root = "/api"

# Records a streamed listing may buffer ahead of a slow client.
stream_buffer = 32

# ── Storage ─────────────────────────────────────────────────────────
# JSON file seeding the in-memory store (transactions, blocks, coins,
# wallets, walletAddresses). Relative to this file.

[storage]
# fixtures = "fixtures.json"

# ── Chains ──────────────────────────────────────────────────────────
# Key: chain ticker. `family` (btc, bch, bsv, doge, ltc) defaults to the
# ticker. One [chains.<TICKER>.networks.<name>] table per node.
# Values support environment variable references: "$VAR" or "${VAR}"

[chains.BTC.networks.main]
rpc_url = "http://127.0.0.1:8332"
# rpc_user = "$BTC_RPC_USER"
# rpc_password = "$BTC_RPC_PASSWORD"
timeout_secs = 30

[chains.BSV.networks.main]
rpc_url = "http://127.0.0.1:18332"
# rpc_user = "$BSV_RPC_USER"
# rpc_password = "$BSV_RPC_PASSWORD"
"#,
    )
}
