use crate::errors::{FacilitatorError, Result};
use config::{Environment, File, FileFormat};
use security::rate_limiter::{RateLimit, RateLimiterConfig};
use security::secrets_manager::{usable_token, SecretReference, DEFAULT_CONNECT_HOST};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const OP_TOKEN_ENV: &str = "OP_SERVICE_ACCOUNT_TOKEN";
pub const TRON_GRID_API_KEY_ENV: &str = "TRON_GRID_API_KEY";

/// Vault reference holding the database password
pub const DATABASE_PASSWORD_REF: &str = "database_password";
/// Vault reference holding the shared TronGrid token
pub const TRONGRID_API_KEY_REF: &str = "trongrid_api_key";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub facilitator: FacilitatorSection,
    /// `token`, `connect_host` and named `vault/item/field` references
    #[serde(default)]
    pub onepassword: BTreeMap<String, Option<String>>,
    pub server: ServerConfig,
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,

    #[serde(skip)]
    pub env: EnvOverrides,
}

/// Process environment values that take precedence over the document
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub op_token: Option<String>,
    pub trongrid_api_key: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            op_token: non_empty(OP_TOKEN_ENV),
            trongrid_api_key: non_empty(TRON_GRID_API_KEY_ENV),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    /// Seconds
    #[serde(default = "default_max_life_time")]
    pub max_life_time: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            password: None,
            ssl_mode: default_ssl_mode(),
            max_open_conns: default_max_open_conns(),
            max_idle_conns: default_max_idle_conns(),
            max_life_time: default_max_life_time(),
        }
    }
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_open_conns() -> u32 {
    25
}

fn default_max_idle_conns() -> u32 {
    15
}

fn default_max_life_time() -> u64 {
    600
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FacilitatorSection {
    #[serde(default)]
    pub networks: BTreeMap<String, Option<NetworkConfig>>,
    #[serde(default)]
    pub trongrid_api_key: Option<String>,
    #[serde(default)]
    pub engine_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NetworkConfig {
    #[serde(default)]
    pub fee_to_address: String,
    #[serde(default)]
    pub base_fee: Option<BaseFeeSetting>,
    #[serde(default)]
    pub private_key: Option<String>,
}

/// Either `{SYMBOL: amount}` or a legacy single USDT amount
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum BaseFeeSetting {
    PerToken(BTreeMap<String, FeeAmount>),
    Single(FeeAmount),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum FeeAmount {
    Number(u64),
    Text(String),
}

impl FeeAmount {
    fn value(&self) -> std::result::Result<u64, String> {
        match self {
            FeeAmount::Number(n) => Ok(*n),
            FeeAmount::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("'{}' is not a whole amount", s)),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitSection {
    /// Seconds
    pub api_key_refresh_interval: u64,
    pub authenticated: String,
    pub anonymous: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub backup_count: u32,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
}

/// Vault reference name for a network's signing key: `tron:nile` -> `tron_nile_private_key`
pub fn private_key_reference_name(network_id: &str) -> String {
    format!("{}_private_key", network_id.replace(':', "_"))
}

/// Explicit path, then `CONFIG_PATH`, then the conventional locations
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    let preferred = Path::new("config").join("facilitator.config.yaml");
    if preferred.exists() {
        preferred
    } else {
        PathBuf::from("facilitator.config.yaml")
    }
}

fn builder() -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8001)?
        .set_default("server.workers", 1)?
        .set_default("rate_limit.api_key_refresh_interval", 60)?
        .set_default("rate_limit.authenticated", "1000/minute")?
        .set_default("rate_limit.anonymous", "1/minute")?
        .set_default("logging.level", "INFO")?
        .set_default("logging.backup_count", 30)
}

impl Config {
    /// Load from the resolved path with `FACILITATOR__*` environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit);
        if !path.exists() {
            return Err(FacilitatorError::Configuration(format!(
                "Configuration file not found at {}. Place facilitator.config.yaml in the working \
                 directory or config/, or set {}.",
                path.display(),
                CONFIG_PATH_ENV
            )));
        }
        info!("Configuration file found at {}", path.display());

        let source = File::from(path.as_path()).format(FileFormat::Yaml);

        let mut config: Config = builder()?
            .add_source(source)
            .add_source(Environment::with_prefix("FACILITATOR").separator("__"))
            .build()?
            .try_deserialize()?;

        config.env = EnvOverrides::from_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document without touching the process environment
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = builder()?
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn with_env_overrides(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    /// Check every required field and report all problems at once
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.database.url.trim().is_empty() {
            errors.push("database.url is required and must be non-empty".to_string());
        }

        if self.facilitator.networks.is_empty() {
            errors.push("facilitator.networks is required and must be a non-empty mapping".to_string());
        }

        let vault_ready = self.vault_token().is_some();

        for (network_id, network) in &self.facilitator.networks {
            let network = match network {
                Some(network) => network,
                None => {
                    errors.push(format!(
                        "facilitator.networks.{}.fee_to_address is required",
                        network_id
                    ));
                    continue;
                }
            };

            if network.fee_to_address.trim().is_empty() {
                errors.push(format!(
                    "facilitator.networks.{}.fee_to_address is required",
                    network_id
                ));
            }

            if let Err(e) = self.base_fee(network_id) {
                errors.push(e.to_string());
            }

            let has_direct_key = network
                .private_key
                .as_deref()
                .map(|k| !k.trim().is_empty())
                .unwrap_or(false);
            if has_direct_key {
                continue;
            }

            let ref_name = private_key_reference_name(network_id);
            if !vault_ready {
                errors.push(format!(
                    "Private key for network '{}' is missing. Set \
                     facilitator.networks.{}.private_key, or a valid onepassword.token with \
                     onepassword.{}",
                    network_id, network_id, ref_name
                ));
            } else if self.secret_reference(&ref_name).is_none() {
                errors.push(format!(
                    "onepassword.{} must be a 'vault/item/field' reference for network '{}'",
                    ref_name, network_id
                ));
            }
        }

        if let Err(e) = self.rate_limiter_config() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FacilitatorError::Configuration(format!(
                "Configuration validation failed. {}",
                errors.join("; ")
            )))
        }
    }

    pub fn network_ids(&self) -> impl Iterator<Item = &str> {
        self.facilitator.networks.keys().map(String::as_str)
    }

    pub fn network(&self, network_id: &str) -> Option<&NetworkConfig> {
        self.facilitator.networks.get(network_id)?.as_ref()
    }

    pub fn fee_to_address(&self, network_id: &str) -> Option<&str> {
        self.network(network_id)
            .map(|n| n.fee_to_address.trim())
            .filter(|a| !a.is_empty())
    }

    /// Token symbol to amount in smallest units
    pub fn base_fee(&self, network_id: &str) -> Result<BTreeMap<String, u64>> {
        let setting = match self.network(network_id).and_then(|n| n.base_fee.as_ref()) {
            Some(setting) => setting,
            None => return Ok(BTreeMap::new()),
        };

        let invalid = |e: String| {
            FacilitatorError::Configuration(format!(
                "facilitator.networks.{}.base_fee: {}",
                network_id, e
            ))
        };

        match setting {
            BaseFeeSetting::PerToken(fees) => fees
                .iter()
                .map(|(symbol, amount)| -> Result<(String, u64)> {
                    Ok((symbol.clone(), amount.value().map_err(invalid)?))
                })
                .collect(),
            BaseFeeSetting::Single(amount) => {
                let mut fees = BTreeMap::new();
                fees.insert("USDT".to_string(), amount.value().map_err(invalid)?);
                Ok(fees)
            }
        }
    }

    /// Raw vault token, env override first
    pub fn onepassword_token(&self) -> Option<&str> {
        self.env
            .op_token
            .as_deref()
            .or_else(|| self.onepassword_value("token"))
    }

    /// Vault token unless absent or a template placeholder
    pub fn vault_token(&self) -> Option<&str> {
        usable_token(self.onepassword_token())
    }

    pub fn onepassword_connect_host(&self) -> &str {
        self.onepassword_value("connect_host")
            .unwrap_or(DEFAULT_CONNECT_HOST)
    }

    pub fn secret_reference(&self, name: &str) -> Option<SecretReference> {
        self.onepassword_value(name).and_then(SecretReference::parse)
    }

    fn onepassword_value(&self, name: &str) -> Option<&str> {
        self.onepassword
            .get(name)
            .and_then(|v| v.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn rate_limiter_config(&self) -> Result<RateLimiterConfig> {
        let parse = |key: &str, raw: &str| {
            raw.parse::<RateLimit>().map_err(|e| {
                FacilitatorError::Configuration(format!("rate_limit.{} '{}': {}", key, raw, e))
            })
        };

        Ok(RateLimiterConfig {
            authenticated: parse("authenticated", &self.rate_limit.authenticated)?,
            anonymous: parse("anonymous", &self.rate_limit.anonymous)?,
        })
    }

    pub fn api_key_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit.api_key_refresh_interval.max(1))
    }

    pub fn monitoring_port(&self) -> u16 {
        self.monitoring.port.unwrap_or(self.server.port)
    }

    pub fn monitoring_endpoint(&self) -> &str {
        self.monitoring.endpoint.as_deref().unwrap_or("/metrics")
    }

    pub fn engine_url(&self) -> Result<&str> {
        self.facilitator
            .engine_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                FacilitatorError::Configuration(
                    "facilitator.engine_url is required to reach the settlement engine".to_string(),
                )
            })
    }
}
