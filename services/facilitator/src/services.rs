use crate::engine::SettlementEngine;
use crate::errors::{FacilitatorError, Result};
use crate::metrics;
use crate::models::{
    FeeQuoteRequest, NewPaymentRecord, PaymentRecord, PaymentRecordResponse, PaymentStatus,
    SettleRequest, SettleResponse, VerifyRequest,
};
use crate::store::PaymentStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

pub struct SettlementService {
    engine: Arc<dyn SettlementEngine>,
    store: Arc<dyn PaymentStore>,
}

impl SettlementService {
    pub fn new(engine: Arc<dyn SettlementEngine>, store: Arc<dyn PaymentStore>) -> Self {
        Self { engine, store }
    }

    pub async fn supported(&self) -> Result<Value> {
        Ok(self.engine.supported().await?)
    }

    pub async fn fee_quote(&self, request: FeeQuoteRequest) -> Result<Value> {
        Ok(self.engine.fee_quote(&request).await?)
    }

    pub async fn verify(&self, request: VerifyRequest) -> Result<Value> {
        self.engine
            .verify(&request.payment_payload, &request.payment_requirements)
            .await
            .map_err(|e| {
                error!("Verify failed: {}", e);
                e.into()
            })
    }

    /// Settle through the engine, then record the outcome.
    ///
    /// The engine's answer is returned whenever one was obtained; a ledger
    /// write failure is only logged. Engine errors produce no ledger row.
    /// No deduplication: every call reaches the engine and appends a row.
    pub async fn settle(
        &self,
        request: SettleRequest,
        caller_api_key: Option<&str>,
    ) -> Result<SettleResponse> {
        let payment_id = request.payment_id();
        let network = request.network();

        let response = match self
            .engine
            .settle(&request.payment_payload, &request.payment_requirements)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = FacilitatorError::from(e);
                metrics::SETTLEMENT_ERRORS_TOTAL
                    .with_label_values(&[err.kind()])
                    .inc();
                error!(payment_id = ?payment_id, "Settle failed: {}", err);
                return Err(err);
            }
        };

        let status = PaymentStatus::from_success(response.success);
        metrics::SETTLEMENTS_TOTAL
            .with_label_values(&[status.as_str()])
            .inc();

        let record = NewPaymentRecord {
            payment_id,
            seller_id: None,
            network,
            tx_hash: response.transaction.clone().unwrap_or_default(),
            status,
        };
        self.record_outcome(record, caller_api_key).await;

        Ok(response)
    }

    async fn record_outcome(&self, record: NewPaymentRecord, caller_api_key: Option<&str>) {
        let payment_id = record.payment_id.clone();
        match self.try_record(record, caller_api_key).await {
            Ok(row) => info!(
                seller_id = ?row.seller_id,
                network = ?row.network,
                payment_id = ?row.payment_id,
                "Payment record saved -> {}",
                row.tx_hash
            ),
            Err(e) => {
                metrics::LEDGER_WRITE_FAILURES_TOTAL.inc();
                error!(
                    payment_id = ?payment_id,
                    "Failed to save payment record (settle result still returned): {}",
                    e
                );
            }
        }
    }

    async fn try_record(
        &self,
        mut record: NewPaymentRecord,
        caller_api_key: Option<&str>,
    ) -> Result<PaymentRecord> {
        record.seller_id = self.seller_for(caller_api_key).await?;
        self.store.insert_payment_record(&record).await
    }

    async fn seller_for(&self, caller_api_key: Option<&str>) -> Result<Option<String>> {
        match caller_api_key {
            Some(key) => self.store.seller_for_api_key(key).await,
            None => Ok(None),
        }
    }

    pub async fn payments_by_id(
        &self,
        payment_id: &str,
        caller_api_key: Option<&str>,
    ) -> Result<Vec<PaymentRecordResponse>> {
        let seller_id = self.seller_for(caller_api_key).await?;
        let rows = self
            .store
            .payments_by_id(payment_id, seller_id.as_deref())
            .await?;
        into_response(rows)
    }

    pub async fn payments_by_tx_hash(
        &self,
        tx_hash: &str,
        caller_api_key: Option<&str>,
    ) -> Result<Vec<PaymentRecordResponse>> {
        let seller_id = self.seller_for(caller_api_key).await?;
        let rows = self
            .store
            .payments_by_tx_hash(tx_hash, seller_id.as_deref())
            .await?;
        into_response(rows)
    }
}

fn into_response(rows: Vec<PaymentRecord>) -> Result<Vec<PaymentRecordResponse>> {
    if rows.is_empty() {
        return Err(FacilitatorError::NotFound("Payment not found".to_string()));
    }
    Ok(rows.into_iter().map(PaymentRecordResponse::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, MockSettlementEngine};
    use crate::models::PaymentRequirements;
    use crate::store::MemoryStore;
    use serde_json::{json, Map};

    fn settle_request(payment_id: &str, network: &str) -> SettleRequest {
        SettleRequest {
            payment_payload: json!({
                "payload": { "paymentPermit": { "meta": { "paymentId": payment_id } } }
            }),
            payment_requirements: PaymentRequirements {
                scheme: Some("exact_permit".to_string()),
                network: Some(network.to_string()),
                extra: Map::new(),
            },
        }
    }

    fn engine_response(success: bool, tx: &str) -> SettleResponse {
        SettleResponse {
            success,
            transaction: Some(tx.to_string()),
            network: None,
            error_reason: None,
            extra: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_success_is_recorded_with_seller() {
        let mut engine = MockSettlementEngine::new();
        engine
            .expect_settle()
            .times(1)
            .returning(|_, _| Ok(engine_response(true, "0xabc")));

        let store = Arc::new(MemoryStore::new());
        store.add_api_key("key-1", "seller-1");
        let service = SettlementService::new(Arc::new(engine), store.clone());

        let response = service
            .settle(settle_request("pay-123", "mainnet"), Some("key-1"))
            .await
            .unwrap();
        assert!(response.success);

        let rows = store.records();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].payment_id.as_deref(), Some("pay-123"));
        assert_eq!(rows[0].seller_id.as_deref(), Some("seller-1"));
        assert_eq!(rows[0].network.as_deref(), Some("mainnet"));
        assert_eq!(rows[0].tx_hash, "0xabc");
        assert_eq!(rows[0].status, "success");
    }

    #[tokio::test]
    async fn test_engine_failure_outcome_is_recorded_as_failed() {
        let mut engine = MockSettlementEngine::new();
        engine.expect_settle().returning(|_, _| {
            Ok(SettleResponse {
                transaction: None,
                error_reason: Some("insufficient_allowance".to_string()),
                ..engine_response(false, "")
            })
        });

        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(Arc::new(engine), store.clone());

        let response = service
            .settle(settle_request("pay-9", "tron:nile"), None)
            .await
            .unwrap();
        assert!(!response.success);

        let rows = store.records();
        assert_eq!(rows[0].status, "failed");
        assert_eq!(rows[0].tx_hash, "");
        assert_eq!(rows[0].seller_id, None);
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_change_result() {
        let mut engine = MockSettlementEngine::new();
        engine
            .expect_settle()
            .returning(|_, _| Ok(engine_response(true, "0xabc")));

        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let service = SettlementService::new(Arc::new(engine), store.clone());

        let response = service
            .settle(settle_request("pay-1", "mainnet"), None)
            .await
            .unwrap();
        assert_eq!(response.transaction.as_deref(), Some("0xabc"));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_seller_lookup_failure_does_not_change_result() {
        let mut engine = MockSettlementEngine::new();
        engine
            .expect_settle()
            .returning(|_, _| Ok(engine_response(true, "0xabc")));

        let store = Arc::new(MemoryStore::new());
        store.set_fail_reads(true);
        let service = SettlementService::new(Arc::new(engine), store.clone());

        let response = service
            .settle(settle_request("pay-1", "mainnet"), Some("key-1"))
            .await
            .unwrap();
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_engine_errors_are_not_recorded() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let mut engine = MockSettlementEngine::new();
        engine.expect_settle().times(2).returning(move |_, _| {
            if calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(EngineError::Internal("node timeout".to_string()))
            } else {
                Err(EngineError::BadRequest("bad permit".to_string()))
            }
        });

        let store = Arc::new(MemoryStore::new());
        let service = SettlementService::new(Arc::new(engine), store.clone());

        let err = service
            .settle(settle_request("pay-1", "mainnet"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FacilitatorError::Engine(EngineError::Internal(_))));

        let err = service
            .settle(settle_request("pay-1", "mainnet"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FacilitatorError::Engine(EngineError::BadRequest(_))));

        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_not_found() {
        let engine = MockSettlementEngine::new();
        let service = SettlementService::new(Arc::new(engine), Arc::new(MemoryStore::new()));

        let err = service.payments_by_id("nope", None).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::NotFound(_)));
        let err = service.payments_by_tx_hash("0x0", None).await.unwrap_err();
        assert!(matches!(err, FacilitatorError::NotFound(_)));
    }
}
