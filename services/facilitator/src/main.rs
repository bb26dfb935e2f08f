use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use facilitator::{
    config::Config,
    database::Database,
    engine::{RemoteEngine, SettlementEngine},
    handlers, metrics,
    middleware::RequestMetrics,
    networks,
    secrets::{redact_database_url, SecretResolver, SharedToken},
    security_middleware::ApiKeyAuth,
    services::SettlementService,
    store::{PaymentStore, StoreKeySource},
    telemetry,
};
use security::api_keys::{ApiKeyCache, ApiKeyRefresher};
use security::rate_limiter::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// On-chain settlement can take a while
const ENGINE_TIMEOUT: Duration = Duration::from_secs(120);
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Arc::new(Config::load(None)?);
    telemetry::init(&config.logging);
    info!("Configuration loaded");

    if let Err(e) = metrics::register_metrics(prometheus::default_registry()) {
        warn!("Failed to register metrics: {}", e);
    }

    let resolver = SecretResolver::from_config(config.clone());

    // Database (URL may get its password from the vault)
    let database_url = resolver.database_url().await?;
    info!("Database URL: {}", redact_database_url(&database_url));
    let db = Arc::new(
        Database::connect(&database_url, &config.database)
            .await
            .context("Failed to connect to database")?,
    );
    db.init_schema().await.context("Failed to initialise schema")?;
    info!("Database initialized");
    let store: Arc<dyn PaymentStore> = db;

    // Signers
    let trongrid_api_key = resolver.resolve_shared_token(SharedToken::TronGrid).await;
    if trongrid_api_key.is_some() {
        info!("TronGrid API key resolved");
    } else {
        warn!("TronGrid API key not configured. Using default rate limits for blockchain requests.");
    }

    let engine: Arc<dyn SettlementEngine> =
        Arc::new(RemoteEngine::new(config.engine_url()?, ENGINE_TIMEOUT)?);
    let registered = networks::register_networks(
        &config,
        &resolver,
        engine.as_ref(),
        trongrid_api_key.as_ref(),
    )
    .await?;
    info!("Facilitator registered for {} network(s)", registered.len());

    // Rate limiting
    let limiter_config = config.rate_limiter_config()?;
    let max_window = limiter_config
        .authenticated
        .window()
        .max(limiter_config.anonymous.window());
    let limiter = Arc::new(RateLimiter::new(limiter_config));
    let cleanup = limiter
        .clone()
        .start_cleanup_task(RATE_LIMIT_CLEANUP_INTERVAL, max_window);

    let metrics_endpoint = if config.monitoring_port() == config.server.port {
        Some(config.monitoring_endpoint().to_string())
    } else {
        warn!(
            "monitoring.port {} differs from server.port {}; a separate metrics listener is not \
             supported, metrics are disabled",
            config.monitoring_port(),
            config.server.port
        );
        None
    };

    // API key cache. Spawned after the last fallible startup step.
    let key_cache = Arc::new(ApiKeyCache::new());
    let refresher = {
        let observed = key_cache.clone();
        ApiKeyRefresher::spawn_with_hook(
            key_cache.clone(),
            Arc::new(StoreKeySource::new(store.clone())),
            config.api_key_refresh_interval(),
            move |ok| metrics::observe_key_refresh(ok, observed.len()),
        )
    };
    info!("API key refresher task started");

    let service = Arc::new(SettlementService::new(engine, store));

    info!(
        "Starting x402 Facilitator on {}:{}",
        config.server.host, config.server.port
    );

    let app_cache = key_cache.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .send_wildcard()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(ApiKeyAuth::new(app_cache.clone()))
            .wrap(RequestMetrics)
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(service.clone()))
            .configure(|cfg| {
                handlers::configure_routes(cfg, limiter.clone(), metrics_endpoint.as_deref())
            })
    })
    .workers(config.server.workers.max(1))
    .bind((config.server.host.as_str(), config.server.port));

    // The refresher is stopped on every exit path, including bind and server errors
    let served = refresher
        .run_until(async move {
            match server {
                Ok(server) => server.run().await,
                Err(e) => Err(e),
            }
        })
        .await;

    info!("Shutting down...");
    cleanup.abort();

    served.context("HTTP server failed")?;
    Ok(())
}
