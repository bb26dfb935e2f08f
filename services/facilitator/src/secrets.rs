//! Credential resolution.
//!
//! Every secret goes through the same chain: a direct value from the config
//! document first, then (for vault-backed values) a process-lifetime cache,
//! then the remote vault. Direct values are returned as-is and never cached.

use crate::config::{private_key_reference_name, Config, DATABASE_PASSWORD_REF, TRONGRID_API_KEY_REF};
use crate::errors::{FacilitatorError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use security::secrets_manager::{SecretReference, SecretsBackend, SecretsManager};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens shared by every network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedToken {
    /// TronGrid API key used by TRON nodes
    TronGrid,
}

impl SharedToken {
    fn reference_name(&self) -> &'static str {
        match self {
            SharedToken::TronGrid => TRONGRID_API_KEY_REF,
        }
    }
}

fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct SecretResolver {
    config: Arc<Config>,
    vault: SecretsManager,
    network_keys: DashMap<String, SecretString>,
    database_password: RwLock<Option<SecretString>>,
    trongrid_api_key: RwLock<Option<SecretString>>,
}

impl SecretResolver {
    pub fn new(config: Arc<Config>, backend: Arc<dyn SecretsBackend>) -> Self {
        let vault = SecretsManager::new(backend, config.onepassword_token());
        Self {
            config,
            vault,
            network_keys: DashMap::new(),
            database_password: RwLock::new(None),
            trongrid_api_key: RwLock::new(None),
        }
    }

    /// Resolver backed by 1Password Connect at `onepassword.connect_host`
    pub fn from_config(config: Arc<Config>) -> Self {
        let vault = SecretsManager::one_password(
            config.onepassword_connect_host(),
            config.onepassword_token(),
        );
        Self {
            config,
            vault,
            network_keys: DashMap::new(),
            database_password: RwLock::new(None),
            trongrid_api_key: RwLock::new(None),
        }
    }

    /// Signing key for `network_id`
    pub async fn resolve_private_key(&self, network_id: &str) -> Result<SecretString> {
        let direct = self
            .config
            .network(network_id)
            .and_then(|n| non_empty(n.private_key.as_deref()));
        if let Some(key) = direct {
            return Ok(SecretString::from(key.to_string()));
        }

        if let Some(cached) = self.network_keys.get(network_id) {
            return Ok(copy_secret(cached.value()));
        }

        let ref_name = private_key_reference_name(network_id);
        let reference = match (self.vault.is_configured(), self.config.secret_reference(&ref_name)) {
            (true, Some(reference)) => reference,
            _ => {
                return Err(FacilitatorError::Configuration(format!(
                    "Private key for network '{}' is not configured. Set \
                     facilitator.networks.{}.private_key, or provide a valid onepassword.token \
                     and onepassword.{}",
                    network_id, network_id, ref_name
                )))
            }
        };

        let key = self.fetch(&reference).await?;
        info!(network = %network_id, "Private key loaded from vault");

        // Two first-time resolutions may both fetch; they store equal values.
        self.network_keys
            .insert(network_id.to_string(), copy_secret(&key));
        Ok(key)
    }

    /// `database.password`, else the vault reference; `None` when neither is set
    pub async fn resolve_database_password(&self) -> Result<Option<SecretString>> {
        if let Some(password) = non_empty(self.config.database.password.as_deref()) {
            return Ok(Some(SecretString::from(password.to_string())));
        }

        if let Some(cached) = self.database_password.read().as_ref() {
            return Ok(Some(copy_secret(cached)));
        }

        let reference = match self.config.secret_reference(DATABASE_PASSWORD_REF) {
            Some(reference) if self.vault.is_configured() => reference,
            _ => return Ok(None),
        };

        let password = self.fetch(&reference).await?;
        *self.database_password.write() = Some(copy_secret(&password));
        Ok(Some(password))
    }

    /// Environment override, then the config document, then the vault.
    /// Vault failures are logged and treated as absent.
    pub async fn resolve_shared_token(&self, token: SharedToken) -> Option<SecretString> {
        let (env_value, direct, cache) = match token {
            SharedToken::TronGrid => (
                self.config.env.trongrid_api_key.as_deref(),
                self.config.facilitator.trongrid_api_key.as_deref(),
                &self.trongrid_api_key,
            ),
        };

        if let Some(value) = non_empty(env_value).or_else(|| non_empty(direct)) {
            return Some(SecretString::from(value.to_string()));
        }

        if let Some(cached) = cache.read().as_ref() {
            return Some(copy_secret(cached));
        }

        let reference = self.config.secret_reference(token.reference_name())?;
        if !self.vault.is_configured() {
            return None;
        }

        match self.fetch(&reference).await {
            Ok(value) => {
                *cache.write() = Some(copy_secret(&value));
                Some(value)
            }
            Err(e) => {
                warn!("Failed to load {:?} token from vault: {}", token, e);
                None
            }
        }
    }

    /// `database.url` with the resolved password injected
    pub async fn database_url(&self) -> Result<String> {
        let raw = self.config.database.url.trim();
        if raw.is_empty() {
            return Err(FacilitatorError::Configuration(
                "database.url is required".to_string(),
            ));
        }

        match self.resolve_database_password().await? {
            Some(password) => inject_password(raw, password.expose_secret()),
            None => Ok(raw.to_string()),
        }
    }

    async fn fetch(&self, reference: &SecretReference) -> Result<SecretString> {
        debug!("Resolving {} from vault", reference.uri());
        let value = self.vault.resolve(reference).await.map_err(|e| {
            FacilitatorError::SecretResolution(format!("{}: {}", reference.uri(), e))
        })?;

        if value.expose_secret().trim().is_empty() {
            return Err(FacilitatorError::SecretResolution(format!(
                "{} resolved to an empty value",
                reference.uri()
            )));
        }
        Ok(value)
    }
}

impl fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretResolver")
            .field("vault", &self.vault)
            .field("cached_networks", &self.network_keys.len())
            .finish()
    }
}

/// Put `password` (percent-encoded) into the userinfo of `url`
pub fn inject_password(url: &str, password: &str) -> Result<String> {
    let mut parsed = Url::parse(url)
        .map_err(|e| FacilitatorError::Configuration(format!("database.url is invalid: {}", e)))?;
    parsed.set_password(Some(password)).map_err(|_| {
        FacilitatorError::Configuration("database.url cannot carry a password".to_string())
    })?;
    Ok(parsed.to_string())
}

/// Database URL safe for logs
pub fn redact_database_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "<unparseable database url>".to_string(),
    }
}
