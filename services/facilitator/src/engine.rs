//! Settlement engine contract and HTTP client.
//!
//! Payload verification, transaction signing and on-chain submission all
//! happen inside the engine. The facilitator only hands it signer material at
//! startup and forwards payment requests to it.

use crate::models::{FeeQuoteRequest, PaymentRequirements, SettleResponse};
use crate::networks::Scheme;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed caller input
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

/// Signer material for one network
#[derive(Debug)]
pub struct SignerRegistration {
    pub network_id: String,
    pub schemes: Vec<Scheme>,
    pub private_key: SecretString,
    pub fee_to_address: String,
    /// Token symbol to amount in smallest units
    pub base_fee: BTreeMap<String, u64>,
    /// Shared blockchain API token, when one resolved
    pub chain_api_key: Option<SecretString>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementEngine: Send + Sync {
    async fn register_network(&self, registration: &SignerRegistration) -> Result<(), EngineError>;

    async fn supported(&self) -> Result<Value, EngineError>;

    async fn fee_quote(&self, request: &FeeQuoteRequest) -> Result<Value, EngineError>;

    async fn verify(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<Value, EngineError>;

    async fn settle(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, EngineError>;
}

/// Engine reached over HTTP
#[derive(Debug, Clone)]
pub struct RemoteEngine {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteEngine {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, EngineError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("POST {} failed: {}", path, e)))?;

        Self::decode(path, response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| EngineError::Internal(format!("GET {} failed: {}", path, e)))?;

        Self::decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(
        path: &str,
        response: reqwest::Response,
    ) -> Result<T, EngineError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| EngineError::Internal(format!("invalid response from {}: {}", path, e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_for_status(path, status.as_u16(), &body))
    }
}

/// 400/422 are the caller's fault; anything else is ours
pub fn error_for_status(path: &str, status: u16, body: &str) -> EngineError {
    match status {
        400 | 422 => EngineError::BadRequest(detail_from_body(body)),
        _ => {
            warn!("Settlement engine {} returned {}", path, status);
            EngineError::Internal(format!("{} returned status {}: {}", path, status, body))
        }
    }
}

fn detail_from_body(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

#[async_trait]
impl SettlementEngine for RemoteEngine {
    async fn register_network(&self, registration: &SignerRegistration) -> Result<(), EngineError> {
        debug!(network = %registration.network_id, "Registering signer with settlement engine");

        let schemes: Vec<&str> = registration.schemes.iter().map(Scheme::as_str).collect();
        let body = json!({
            "network": registration.network_id,
            "schemes": schemes,
            "privateKey": registration.private_key.expose_secret(),
            "feeTo": registration.fee_to_address,
            "baseFee": registration.base_fee,
            "chainApiKey": registration.chain_api_key.as_ref().map(|k| k.expose_secret()),
        });

        let _: Value = self.post("/signers", &body).await?;
        Ok(())
    }

    async fn supported(&self) -> Result<Value, EngineError> {
        self.get("/supported").await
    }

    async fn fee_quote(&self, request: &FeeQuoteRequest) -> Result<Value, EngineError> {
        let body = serde_json::to_value(request)
            .map_err(|e| EngineError::Internal(format!("failed to encode fee quote: {}", e)))?;
        self.post("/fee/quote", &body).await
    }

    async fn verify(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<Value, EngineError> {
        let body = json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        self.post("/verify", &body).await
    }

    async fn settle(
        &self,
        payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, EngineError> {
        let body = json!({
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        });
        self.post("/settle", &body).await
    }
}
