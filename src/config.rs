use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sort::StrategyConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub store: StoreConfig,
    pub reconcile: ReconcileConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bare hostname (https is assumed) or full URL of the CouchDB server
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub database: String,
    pub find_page_size: usize,
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            username: String::new(),
            password: String::new(),
            database: String::new(),
            find_page_size: 1000,
            timeout_ms: 30000,
        }
    }
}

impl StoreConfig {
    /// True when every connection setting is present
    pub fn is_configured(&self) -> bool {
        [&self.hostname, &self.username, &self.password, &self.database]
            .iter()
            .all(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// How long a webhook waits for its edit to show up in the change feed
    pub update_timeout_ms: u64,
    /// Remote calls per second, shared by every request
    pub qps_rate_limit: f64,
    /// Sort criteria, most significant first
    pub sort: Vec<StrategyConfig>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            update_timeout_ms: 5000,
            qps_rate_limit: 1.0,
            sort: Vec::new(),
        }
    }
}

impl ReconcileConfig {
    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Tokens accepted as bearer credentials on the webhook routes
    pub access_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            access_tokens: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind
            .parse()
            .context(format!("Invalid bind address {}", self.bind))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            store: StoreConfig::default(),
            reconcile: ReconcileConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply the deployment environment variables on top of the file config.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ACCESS_TOKENS_LIST") {
            self.server.access_tokens =
                serde_json::from_str(&raw).context("ACCESS_TOKENS_LIST must be a JSON list of strings")?;
        }
        if let Some(username) = lookup("COUCHDB_USERNAME") {
            self.store.username = username;
        }
        if let Some(password) = lookup("COUCHDB_PASSWORD") {
            self.store.password = password;
        }
        if let Some(hostname) = lookup("COUCHDB_HOSTNAME") {
            self.store.hostname = hostname;
        }
        if let Some(database) = lookup("COUCHDB_DATABASE") {
            self.store.database = database;
        }
        if let Some(raw) = lookup("SORT_LIST") {
            self.reconcile.sort = parse_sort_list(&raw)?;
        }
        if let Some(raw) = lookup("UPDATE_TIMEOUT_MILLISECONDS") {
            self.reconcile.update_timeout_ms = raw
                .trim()
                .parse()
                .context(format!("UPDATE_TIMEOUT_MILLISECONDS is not a number: {}", raw))?;
        }
        if let Some(raw) = lookup("QPS_RATE_LIMIT") {
            self.reconcile.qps_rate_limit = raw
                .trim()
                .parse()
                .context(format!("QPS_RATE_LIMIT is not a number: {}", raw))?;
        }
        if let Some(raw) = lookup("PORT") {
            let port: u16 = raw.trim().parse().context(format!("PORT is not a port number: {}", raw))?;
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        Ok(self)
    }

    /// Copy safe to print: secrets replaced by asterisks
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.store.password.is_empty() {
            config.store.password = "********".to_string();
        }
        config.server.access_tokens = config
            .server
            .access_tokens
            .iter()
            .map(|_| "********".to_string())
            .collect();
        config
    }
}

/// Parse a `SORT_LIST` value: a JSON list of `[name, options]` pairs
pub fn parse_sort_list(raw: &str) -> Result<Vec<StrategyConfig>> {
    let entries: Vec<Value> = serde_json::from_str(raw).context("SORT_LIST must be a JSON list")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let (name, options) = match entry {
                Value::Array(mut pair) if (1..=2).contains(&pair.len()) => {
                    let options = if pair.len() == 2 { pair.pop().unwrap_or(Value::Null) } else { Value::Null };
                    match pair.pop() {
                        Some(Value::String(name)) => (name, options),
                        _ => return Err(eyre!("SORT_LIST entry {} must start with a strategy name", index)),
                    }
                }
                Value::String(name) => (name, Value::Null),
                other => return Err(eyre!("SORT_LIST entry {} is not a [name, options] pair: {}", index, other)),
            };
            StrategyConfig::from_pair(&name, options).context(format!("SORT_LIST entry {} ({})", index, name))
        })
        .collect()
}
