//! End-to-end tests for the HTTP surface against an in-memory ledger and a
//! scripted settlement engine.

use actix_web::{test, web, App};
use async_trait::async_trait;
use facilitator::engine::{EngineError, SettlementEngine, SignerRegistration};
use facilitator::handlers;
use facilitator::models::{FeeQuoteRequest, PaymentRequirements, SettleResponse};
use facilitator::security_middleware::{ApiKeyAuth, API_KEY_HEADER};
use facilitator::services::SettlementService;
use facilitator::store::{MemoryStore, PaymentStore};
use security::api_keys::ApiKeyCache;
use security::rate_limiter::{RateLimit, RateLimiter, RateLimiterConfig, TimeUnit};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SELLER_KEY: &str = "seller-key-1";
const SELLER_ID: &str = "seller-1";

/// Engine that answers the first settle with `0xabc` and later ones with `0xabc-<n>`
struct ScriptedEngine {
    settle_calls: AtomicUsize,
    fail_with: Option<EngineError>,
    delay: Duration,
}

impl ScriptedEngine {
    fn succeeding() -> Self {
        Self {
            settle_calls: AtomicUsize::new(0),
            fail_with: None,
            delay: Duration::ZERO,
        }
    }

    fn failing(error: EngineError) -> Self {
        Self {
            fail_with: Some(error),
            ..Self::succeeding()
        }
    }

    fn slow() -> Self {
        Self {
            delay: Duration::from_millis(50),
            ..Self::succeeding()
        }
    }

    fn calls(&self) -> usize {
        self.settle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettlementEngine for ScriptedEngine {
    async fn register_network(&self, _registration: &SignerRegistration) -> Result<(), EngineError> {
        Ok(())
    }

    async fn supported(&self) -> Result<Value, EngineError> {
        Ok(json!({ "kinds": [{ "x402Version": 1, "scheme": "exact", "network": "tron:mainnet" }] }))
    }

    async fn fee_quote(&self, _request: &FeeQuoteRequest) -> Result<Value, EngineError> {
        Ok(json!({ "fee": "100" }))
    }

    async fn verify(
        &self,
        _payload: &Value,
        _requirements: &PaymentRequirements,
    ) -> Result<Value, EngineError> {
        Ok(json!({ "isValid": true }))
    }

    async fn settle(
        &self,
        _payload: &Value,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, EngineError> {
        let call = self.settle_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(SettleResponse {
            success: true,
            transaction: Some(if call == 1 {
                "0xabc".to_string()
            } else {
                format!("0xabc-{}", call)
            }),
            network: requirements.network.clone(),
            error_reason: None,
            extra: Map::new(),
        })
    }
}

struct Harness {
    engine: Arc<ScriptedEngine>,
    store: Arc<MemoryStore>,
    service: Arc<SettlementService>,
    cache: Arc<ApiKeyCache>,
    limiter: Arc<RateLimiter>,
}

impl Harness {
    fn new(engine: ScriptedEngine) -> Self {
        let engine = Arc::new(engine);
        let store = Arc::new(MemoryStore::new());
        store.add_api_key(SELLER_KEY, SELLER_ID);

        let cache = Arc::new(ApiKeyCache::new());
        cache.replace(vec![SELLER_KEY.to_string()]);

        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            authenticated: RateLimit::new(100, TimeUnit::Minute),
            anonymous: RateLimit::new(1, TimeUnit::Minute),
        }));

        let service = Arc::new(SettlementService::new(
            engine.clone(),
            store.clone() as Arc<dyn PaymentStore>,
        ));

        Self {
            engine,
            store,
            service,
            cache,
            limiter,
        }
    }
}

macro_rules! facilitator_app {
    ($harness:expr) => {{
        let limiter = $harness.limiter.clone();
        test::init_service(
            App::new()
                .wrap(ApiKeyAuth::new($harness.cache.clone()))
                .app_data(web::Data::new($harness.service.clone()))
                .configure(move |cfg| handlers::configure_routes(cfg, limiter, Some("/metrics"))),
        )
        .await
    }};
}

fn settle_body(payment_id: &str, network: &str) -> Value {
    json!({
        "paymentPayload": {
            "x402Version": 1,
            "payload": { "paymentPermit": { "meta": { "paymentId": payment_id } } }
        },
        "paymentRequirements": { "scheme": "exact", "network": network }
    })
}

#[actix_web::test]
async fn test_health_check() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "status": "ok" }));
}

#[actix_web::test]
async fn test_anonymous_settle_is_limited_per_minute() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let first = test::TestRequest::post()
        .uri("/settle")
        .peer_addr("10.0.0.7:5000".parse().unwrap())
        .set_json(settle_body("pay-anon", "tron:nile"))
        .to_request();
    assert_eq!(test::call_service(&app, first).await.status(), 200);

    let second = test::TestRequest::post()
        .uri("/settle")
        .peer_addr("10.0.0.7:5001".parse().unwrap())
        .set_json(settle_body("pay-anon", "tron:nile"))
        .to_request();
    let resp = test::call_service(&app, second).await;
    assert_eq!(resp.status(), 429);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Rate limit exceeded"));

    // The denied call never reached the engine
    assert_eq!(harness.engine.calls(), 1);

    // Other endpoints are not limited
    for _ in 0..3 {
        let req = test::TestRequest::get()
            .uri("/supported")
            .peer_addr("10.0.0.7:5002".parse().unwrap())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
}

#[actix_web::test]
async fn test_settle_records_row_and_lookup_returns_it() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .set_json(settle_body("pay-123", "mainnet"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["transaction"], "0xabc");

    let rows = harness.store.records();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payment_id.as_deref(), Some("pay-123"));
    assert_eq!(rows[0].network.as_deref(), Some("mainnet"));
    assert_eq!(rows[0].seller_id.as_deref(), Some(SELLER_ID));
    assert_eq!(rows[0].tx_hash, "0xabc");
    assert_eq!(rows[0].status, "success");

    let req = test::TestRequest::get()
        .uri("/payments/pay-123")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let records: Vec<Value> = test::read_body_json(resp).await;
    assert_eq!(records[0]["paymentId"], "pay-123");
    assert_eq!(records[0]["txHash"], "0xabc");
    assert_eq!(records[0]["status"], "success");
    assert_eq!(records[0]["network"], "mainnet");

    let req = test::TestRequest::get()
        .uri("/payments/tx/0xabc")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let records: Vec<Value> = test::read_body_json(resp).await;
    assert_eq!(records.len(), 1);
}

#[actix_web::test]
async fn test_concurrent_duplicate_settles_both_reach_engine() {
    let harness = Harness::new(ScriptedEngine::slow());
    let app = facilitator_app!(harness);

    let request = || {
        test::TestRequest::post()
            .uri("/settle")
            .insert_header((API_KEY_HEADER, SELLER_KEY))
            .set_json(settle_body("pay-dup", "bsc:mainnet"))
            .to_request()
    };

    let (a, b) = futures_util::future::join(
        test::call_service(&app, request()),
        test::call_service(&app, request()),
    )
    .await;
    assert_eq!(a.status(), 200);
    assert_eq!(b.status(), 200);

    assert_eq!(harness.engine.calls(), 2);
    let rows = harness.store.records();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.payment_id.as_deref() == Some("pay-dup")));

    // Newest first
    let req = test::TestRequest::get()
        .uri("/payments/pay-dup")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .to_request();
    let records: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(records.len(), 2);

    let newest = rows.iter().max_by_key(|r| r.id).unwrap();
    let oldest = rows.iter().min_by_key(|r| r.id).unwrap();
    assert_ne!(newest.tx_hash, oldest.tx_hash);
    assert_eq!(records[0]["txHash"], newest.tx_hash.as_str());
    assert_eq!(records[1]["txHash"], oldest.tx_hash.as_str());
}

#[actix_web::test]
async fn test_malformed_settle_does_not_consume_anonymous_quota() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let malformed = test::TestRequest::post()
        .uri("/settle")
        .peer_addr("10.9.9.9:6000".parse().unwrap())
        .set_json(json!({ "paymentPayload": {} }))
        .to_request();
    assert_eq!(test::call_service(&app, malformed).await.status(), 400);

    let valid = test::TestRequest::post()
        .uri("/settle")
        .peer_addr("10.9.9.9:6001".parse().unwrap())
        .set_json(settle_body("pay-after-typo", "tron:nile"))
        .to_request();
    assert_eq!(test::call_service(&app, valid).await.status(), 200);
    assert_eq!(harness.engine.calls(), 1);

    // The valid call used the single slot
    let again = test::TestRequest::post()
        .uri("/settle")
        .peer_addr("10.9.9.9:6002".parse().unwrap())
        .set_json(settle_body("pay-after-typo", "tron:nile"))
        .to_request();
    assert_eq!(test::call_service(&app, again).await.status(), 429);
}

#[actix_web::test]
async fn test_engine_failure_writes_no_row() {
    let harness = Harness::new(ScriptedEngine::failing(EngineError::Internal(
        "rpc unreachable".to_string(),
    )));
    let app = facilitator_app!(harness);

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .set_json(settle_body("pay-err", "tron:nile"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Internal server error");

    assert_eq!(harness.engine.calls(), 1);
    assert!(harness.store.records().is_empty());
}

#[actix_web::test]
async fn test_engine_rejection_is_client_error() {
    let harness = Harness::new(ScriptedEngine::failing(EngineError::BadRequest(
        "unsupported network".to_string(),
    )));
    let app = facilitator_app!(harness);

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .set_json(settle_body("pay-bad", "doge:mainnet"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert!(harness.store.records().is_empty());
}

#[actix_web::test]
async fn test_ledger_failure_still_returns_engine_result() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    harness.store.set_fail_writes(true);
    let app = facilitator_app!(harness);

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .set_json(settle_body("pay-lost", "tron:nile"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["transaction"], "0xabc");
    assert!(harness.store.records().is_empty());
}

#[actix_web::test]
async fn test_unknown_payment_is_not_found() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let req = test::TestRequest::get()
        .uri("/payments/does-not-exist")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Payment not found");
}

#[actix_web::test]
async fn test_malformed_settle_body_is_bad_request() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let req = test::TestRequest::post()
        .uri("/settle")
        .insert_header((API_KEY_HEADER, SELLER_KEY))
        .set_json(json!({ "paymentPayload": {} }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(harness.engine.calls(), 0);
}

#[actix_web::test]
async fn test_metrics_endpoint_is_served() {
    let harness = Harness::new(ScriptedEngine::succeeding());
    let app = facilitator_app!(harness);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}
