//! Secrets Management
//!
//! Remote-vault access for credentials the facilitator must not keep in its
//! configuration file:
//! - Per-network signing keys
//! - Database password
//! - Shared blockchain API tokens
//!
//! Secrets are addressed by a `vault/item/field` reference and fetched with a
//! service-account token. Tokens copied verbatim from the configuration
//! template are recognised as placeholders and treated as absent.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Token values shipped in the configuration template
pub const PLACEHOLDER_TOKENS: &[&str] = &["your-op-token", "your-service-account-token"];

/// Default 1Password Connect endpoint
pub const DEFAULT_CONNECT_HOST: &str = "http://localhost:8080";

/// Secrets manager errors
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Vault, item or field does not exist
    #[error("Secret not found: {0}")]
    NotFound(String),

    /// Token rejected by the vault
    #[error("Vault rejected the access token")]
    Unauthorized,

    /// Unexpected vault response
    #[error("Backend error: {0}")]
    Backend(String),

    /// Missing token or reference
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result alias for vault operations
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Returns the trimmed token unless it is empty or a template placeholder
pub fn usable_token(token: Option<&str>) -> Option<&str> {
    let token = token?.trim();
    if token.is_empty() || PLACEHOLDER_TOKENS.contains(&token) {
        None
    } else {
        Some(token)
    }
}

/// Address of a single secret value: `vault/item/field`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    /// Vault name
    pub vault: String,
    /// Item title
    pub item: String,
    /// Field label
    pub field: String,
}

impl SecretReference {
    /// Parse `vault/item/field`. Anything other than three non-empty parts is absent.
    pub fn parse(raw: &str) -> Option<Self> {
        let parts: Vec<&str> = raw.trim().split('/').map(str::trim).collect();
        match parts.as_slice() {
            [vault, item, field]
                if !vault.is_empty() && !item.is_empty() && !field.is_empty() =>
            {
                Some(Self {
                    vault: vault.to_string(),
                    item: item.to_string(),
                    field: field.to_string(),
                })
            }
            _ => None,
        }
    }

    /// `op://vault/item/field`
    pub fn uri(&self) -> String {
        format!("op://{}/{}/{}", self.vault, self.item, self.field)
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vault, self.item, self.field)
    }
}

/// Secret storage backend
#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Fetch the value addressed by `reference`
    async fn resolve(&self, token: &str, reference: &SecretReference) -> Result<SecretString>;
}

#[derive(Debug, Deserialize)]
struct ConnectVault {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectItemSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectField {
    #[serde(default)]
    id: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectItem {
    #[serde(default)]
    fields: Vec<ConnectField>,
}

/// 1Password Connect REST backend
#[derive(Debug, Clone)]
pub struct OnePasswordConnect {
    client: reqwest::Client,
    host: String,
}

impl OnePasswordConnect {
    /// Backend talking to the Connect server at `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        token: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", self.host, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await?;

        match response.status().as_u16() {
            200..=299 => Ok(response.json::<T>().await?),
            401 | 403 => Err(SecretsError::Unauthorized),
            404 => Err(SecretsError::NotFound(path.to_string())),
            status => Err(SecretsError::Backend(format!(
                "unexpected status {} for {}",
                status, path
            ))),
        }
    }
}

#[async_trait]
impl SecretsBackend for OnePasswordConnect {
    async fn resolve(&self, token: &str, reference: &SecretReference) -> Result<SecretString> {
        debug!("Fetching secret {} from 1Password Connect", reference.uri());

        let vaults: Vec<ConnectVault> = self
            .get(
                token,
                "/v1/vaults",
                &[("filter", format!("name eq \"{}\"", reference.vault))],
            )
            .await?;
        let vault = vaults
            .into_iter()
            .next()
            .ok_or_else(|| SecretsError::NotFound(format!("vault {}", reference.vault)))?;

        let items: Vec<ConnectItemSummary> = self
            .get(
                token,
                &format!("/v1/vaults/{}/items", vault.id),
                &[("filter", format!("title eq \"{}\"", reference.item))],
            )
            .await?;
        let item = items
            .into_iter()
            .next()
            .ok_or_else(|| SecretsError::NotFound(format!("item {}", reference.item)))?;

        let item: ConnectItem = self
            .get(
                token,
                &format!("/v1/vaults/{}/items/{}", vault.id, item.id),
                &[],
            )
            .await?;

        item.fields
            .into_iter()
            .find(|f| f.label.as_deref() == Some(reference.field.as_str()) || f.id == reference.field)
            .and_then(|f| f.value)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.trim().to_string()))
            .ok_or_else(|| SecretsError::NotFound(reference.uri()))
    }
}

/// Vault client bound to a service-account token
pub struct SecretsManager {
    backend: Arc<dyn SecretsBackend>,
    token: Option<SecretString>,
}

impl SecretsManager {
    /// Manager over `backend`. Placeholder or empty tokens are dropped.
    pub fn new(backend: Arc<dyn SecretsBackend>, token: Option<&str>) -> Self {
        Self {
            backend,
            token: usable_token(token).map(|t| SecretString::from(t.to_string())),
        }
    }

    /// 1Password Connect at `host`
    pub fn one_password(host: &str, token: Option<&str>) -> Self {
        Self::new(Arc::new(OnePasswordConnect::new(host)), token)
    }

    /// Whether a usable token is present
    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Fetch a secret. Fails with `Config` when no usable token is present.
    pub async fn resolve(&self, reference: &SecretReference) -> Result<SecretString> {
        let token = self.token.as_ref().ok_or_else(|| {
            SecretsError::Config("vault access token is missing or a placeholder".to_string())
        })?;
        self.backend.resolve(token.expose_secret(), reference).await
    }
}

impl fmt::Debug for SecretsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsManager")
            .field("configured", &self.is_configured())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretsBackend for FixedBackend {
        async fn resolve(&self, token: &str, reference: &SecretReference) -> Result<SecretString> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(token, "real-token");
            Ok(SecretString::from(format!("value-of-{}", reference.field)))
        }
    }

    #[test]
    fn test_reference_parsing() {
        let r = SecretReference::parse("Prod/facilitator/private_key").unwrap();
        assert_eq!(r.vault, "Prod");
        assert_eq!(r.item, "facilitator");
        assert_eq!(r.field, "private_key");
        assert_eq!(r.to_string(), "Prod/facilitator/private_key");

        assert!(SecretReference::parse("").is_none());
        assert!(SecretReference::parse("a/b").is_none());
        assert!(SecretReference::parse("a/b/c/d").is_none());
        assert!(SecretReference::parse("a//c").is_none());
        assert!(SecretReference::parse("/b/c").is_none());
    }

    #[test]
    fn test_placeholder_tokens() {
        assert_eq!(usable_token(None), None);
        assert_eq!(usable_token(Some("")), None);
        assert_eq!(usable_token(Some("   ")), None);
        assert_eq!(usable_token(Some("your-op-token")), None);
        assert_eq!(usable_token(Some("your-service-account-token")), None);
        assert_eq!(usable_token(Some(" ops_abc ")), Some("ops_abc"));
    }

    #[tokio::test]
    async fn test_manager_requires_token() {
        let backend = Arc::new(FixedBackend {
            calls: AtomicUsize::new(0),
        });
        let reference = SecretReference::parse("v/i/f").unwrap();

        let manager = SecretsManager::new(backend.clone(), Some("your-op-token"));
        assert!(!manager.is_configured());
        assert!(matches!(
            manager.resolve(&reference).await,
            Err(SecretsError::Config(_))
        ));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let manager = SecretsManager::new(backend.clone(), Some("real-token"));
        let value = manager.resolve(&reference).await.unwrap();
        assert_eq!(value.expose_secret(), "value-of-f");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_token() {
        let backend = Arc::new(FixedBackend {
            calls: AtomicUsize::new(0),
        });
        let manager = SecretsManager::new(backend, Some("real-token"));
        assert!(!format!("{:?}", manager).contains("real-token"));
    }
}
