use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use std::fmt;

/// Requirements the payer must satisfy. Only the routing fields are typed;
/// everything else is forwarded to the engine as received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub payment_payload: Value,
    pub payment_requirements: PaymentRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub payment_payload: Value,
    pub payment_requirements: PaymentRequirements,
}

impl SettleRequest {
    /// `paymentPayload.payload.paymentPermit.meta.paymentId`, when present and a string
    pub fn payment_id(&self) -> Option<String> {
        payment_id_from_payload(&self.payment_payload)
    }

    pub fn network(&self) -> Option<String> {
        self.payment_requirements
            .network
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

pub fn payment_id_from_payload(payload: &Value) -> Option<String> {
    payload
        .pointer("/payload/paymentPermit/meta/paymentId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuoteRequest {
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_permit_context: Option<Value>,
}

/// Engine settle result. Unknown fields are kept so the response is returned verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            PaymentStatus::Success
        } else {
            PaymentStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger row as stored
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PaymentRecord {
    pub id: i64,
    pub payment_id: Option<String>,
    pub seller_id: Option<String>,
    pub network: Option<String>,
    pub tx_hash: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Ledger row before insertion
#[derive(Debug, Clone, PartialEq)]
pub struct NewPaymentRecord {
    pub payment_id: Option<String>,
    pub seller_id: Option<String>,
    pub network: Option<String>,
    pub tx_hash: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecordResponse {
    pub payment_id: Option<String>,
    pub tx_hash: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub network: Option<String>,
}

impl From<PaymentRecord> for PaymentRecordResponse {
    fn from(record: PaymentRecord) -> Self {
        Self {
            payment_id: record.payment_id,
            tx_hash: record.tx_hash,
            status: record.status,
            created_at: record.created_at,
            network: record.network,
        }
    }
}
