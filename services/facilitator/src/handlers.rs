use crate::errors::FacilitatorError;
use crate::metrics;
use crate::middleware::CallerRateLimit;
use crate::models::{FeeQuoteRequest, SettleRequest, VerifyRequest};
use crate::security_middleware::caller_of;
use crate::services::SettlementService;
use actix_web::{error, web, HttpRequest, HttpResponse};
use security::rate_limiter::RateLimiter;
use serde_json::json;
use std::sync::Arc;

/// Liveness probe. Not rate limited.
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

pub async fn supported(
    service: web::Data<Arc<SettlementService>>,
) -> Result<HttpResponse, FacilitatorError> {
    let response = service.supported().await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn fee_quote(
    service: web::Data<Arc<SettlementService>>,
    request: web::Json<FeeQuoteRequest>,
) -> Result<HttpResponse, FacilitatorError> {
    let response = service.fee_quote(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn verify(
    service: web::Data<Arc<SettlementService>>,
    request: web::Json<VerifyRequest>,
) -> Result<HttpResponse, FacilitatorError> {
    let response = service.verify(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Rate limited. The limit is checked only after the body has deserialized.
pub async fn settle(
    req: HttpRequest,
    service: web::Data<Arc<SettlementService>>,
    limit: web::Data<CallerRateLimit>,
    request: web::Json<SettleRequest>,
) -> Result<HttpResponse, FacilitatorError> {
    let caller = caller_of(&req);
    limit.check(&caller, req.path())?;
    let response = service
        .settle(request.into_inner(), caller.api_key())
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

pub async fn get_payment(
    req: HttpRequest,
    service: web::Data<Arc<SettlementService>>,
    payment_id: web::Path<String>,
) -> Result<HttpResponse, FacilitatorError> {
    let caller = caller_of(&req);
    let records = service
        .payments_by_id(&payment_id, caller.api_key())
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

pub async fn get_payment_by_tx(
    req: HttpRequest,
    service: web::Data<Arc<SettlementService>>,
    tx_hash: web::Path<String>,
) -> Result<HttpResponse, FacilitatorError> {
    let caller = caller_of(&req);
    let records = service
        .payments_by_tx_hash(&tx_hash, caller.api_key())
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

pub async fn prometheus_metrics() -> HttpResponse {
    match metrics::metrics_handler() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Malformed JSON bodies get the same `{"detail": ...}` shape as other client errors
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        error::Error::from(FacilitatorError::BadRequest(message))
    })
}

/// Register all routes. Only `/settle` is rate limited.
pub fn configure_routes(
    cfg: &mut web::ServiceConfig,
    limiter: Arc<RateLimiter>,
    metrics_endpoint: Option<&str>,
) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(health_check))
        .route("/supported", web::get().to(supported))
        .route("/fee/quote", web::post().to(fee_quote))
        .route("/verify", web::post().to(verify))
        .service(
            web::resource("/settle")
                .app_data(web::Data::new(CallerRateLimit::new(limiter)))
                .route(web::post().to(settle)),
        )
        .route("/payments/tx/{tx_hash}", web::get().to(get_payment_by_tx))
        .route("/payments/{payment_id}", web::get().to(get_payment));

    if let Some(endpoint) = metrics_endpoint {
        cfg.route(endpoint, web::get().to(prometheus_metrics));
    }
}
