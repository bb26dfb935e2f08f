use crate::config::Config;
use crate::engine::{SettlementEngine, SignerRegistration};
use crate::errors::Result;
use crate::secrets::SecretResolver;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::{info, warn};

/// Network ids the settlement engine knows how to sign for
pub const KNOWN_NETWORKS: &[&str] = &[
    "tron:mainnet",
    "tron:nile",
    "tron:shasta",
    "bsc:mainnet",
    "bsc:testnet",
    "eth:mainnet",
    "eth:sepolia",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFamily {
    Tron,
    Bsc,
    Eth,
}

impl NetworkFamily {
    /// Family from the `<family>:` prefix of a network id
    pub fn of(network_id: &str) -> Option<Self> {
        match network_id.split_once(':')?.0 {
            "tron" => Some(NetworkFamily::Tron),
            "bsc" => Some(NetworkFamily::Bsc),
            "eth" => Some(NetworkFamily::Eth),
            _ => None,
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, NetworkFamily::Bsc | NetworkFamily::Eth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Exact,
    ExactPermit,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Exact => "exact",
            Scheme::ExactPermit => "exact_permit",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_supported(network_id: &str) -> bool {
    NetworkFamily::of(network_id).is_some() && KNOWN_NETWORKS.contains(&network_id)
}

/// Resolve each configured network's signer and hand it to the engine.
/// Unsupported networks are skipped; a network whose key cannot be resolved
/// aborts startup.
pub async fn register_networks(
    config: &Config,
    resolver: &SecretResolver,
    engine: &dyn SettlementEngine,
    chain_api_key: Option<&SecretString>,
) -> Result<Vec<String>> {
    let mut registered = Vec::new();

    for network_id in config.network_ids() {
        let family = match NetworkFamily::of(network_id) {
            Some(family) if is_supported(network_id) => family,
            _ => {
                warn!(network = %network_id, "Unsupported network, skipping");
                continue;
            }
        };

        let private_key = resolver.resolve_private_key(network_id).await?;
        let fee_to_address = config.fee_to_address(network_id).unwrap_or_default().to_string();
        let base_fee = config.base_fee(network_id)?;

        // The shared API token only applies to TRON nodes
        let chain_api_key = match family {
            NetworkFamily::Tron => {
                chain_api_key.map(|k| SecretString::from(k.expose_secret().to_string()))
            }
            _ => None,
        };

        let registration = SignerRegistration {
            network_id: network_id.to_string(),
            schemes: vec![Scheme::ExactPermit, Scheme::Exact],
            private_key,
            fee_to_address,
            base_fee,
            chain_api_key,
        };

        engine.register_network(&registration).await?;
        info!(network = %network_id, evm = family.is_evm(), "Facilitator registered");
        registered.push(network_id.to_string());
    }

    Ok(registered)
}
