use crate::config::DatabaseConfig;
use crate::errors::{FacilitatorError, Result};
use crate::models::{NewPaymentRecord, PaymentRecord};
use crate::store::PaymentStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sellers (
        seller_id VARCHAR(64) PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        key VARCHAR(128) PRIMARY KEY,
        seller_id VARCHAR(64) NOT NULL REFERENCES sellers (seller_id),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_records (
        id BIGSERIAL PRIMARY KEY,
        payment_id VARCHAR(128),
        seller_id VARCHAR(64),
        network VARCHAR(64),
        tx_hash VARCHAR(128) NOT NULL DEFAULT '',
        status VARCHAR(32) NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payment_records_payment_id ON payment_records (payment_id)",
    "CREATE INDEX IF NOT EXISTS idx_payment_records_tx_hash ON payment_records (tx_hash)",
    "CREATE INDEX IF NOT EXISTS idx_api_keys_seller_id ON api_keys (seller_id)",
];

pub fn parse_ssl_mode(mode: &str) -> Result<PgSslMode> {
    match mode.trim().to_ascii_lowercase().as_str() {
        "disable" => Ok(PgSslMode::Disable),
        "allow" => Ok(PgSslMode::Allow),
        "prefer" => Ok(PgSslMode::Prefer),
        "require" => Ok(PgSslMode::Require),
        "verify-ca" => Ok(PgSslMode::VerifyCa),
        "verify-full" => Ok(PgSslMode::VerifyFull),
        other => Err(FacilitatorError::Configuration(format!(
            "database.ssl_mode '{}' is not one of disable, allow, prefer, require, verify-ca, verify-full",
            other
        ))),
    }
}

/// Pool sizing from the `database` section
pub fn pool_options(settings: &DatabaseConfig) -> PgPoolOptions {
    let max_connections = settings.max_open_conns.max(1);
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(settings.max_idle_conns.min(max_connections))
        .max_lifetime(Duration::from_secs(settings.max_life_time))
        .acquire_timeout(Duration::from_secs(5))
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, settings: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(database_url)
            .map_err(|e| FacilitatorError::Configuration(format!("database.url is invalid: {}", e)))?
            .ssl_mode(parse_ssl_mode(&settings.ssl_mode)?);

        let pool = pool_options(settings).connect_with(options).await?;

        info!(
            "Database pool ready (max {} connections, ssl_mode {})",
            settings.max_open_conns, settings.ssl_mode
        );
        Ok(Database { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Create a seller owning `api_key`. Returns the new seller id.
    pub async fn register_seller(&self, api_key: &str) -> Result<String> {
        let seller_id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO sellers (seller_id) VALUES ($1)")
            .bind(&seller_id)
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query("INSERT INTO api_keys (key, seller_id) VALUES ($1, $2)")
            .bind(api_key)
            .bind(&seller_id)
            .execute(&mut *tx)
            .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(seller_id)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tx.rollback().await?;
                Err(FacilitatorError::BadRequest("API key already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PaymentStore for Database {
    async fn insert_payment_record(&self, record: &NewPaymentRecord) -> Result<PaymentRecord> {
        let row = sqlx::query_as::<_, PaymentRecord>(
            r#"
            INSERT INTO payment_records (payment_id, seller_id, network, tx_hash, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, payment_id, seller_id, network, tx_hash, status, created_at
            "#,
        )
        .bind(&record.payment_id)
        .bind(&record.seller_id)
        .bind(&record.network)
        .bind(&record.tx_hash)
        .bind(record.status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn payments_by_id(
        &self,
        payment_id: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, payment_id, seller_id, network, tx_hash, status, created_at
            FROM payment_records
            WHERE payment_id = $1 AND ($2::VARCHAR IS NULL OR seller_id = $2)
            ORDER BY id DESC
            "#,
        )
        .bind(payment_id)
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn payments_by_tx_hash(
        &self,
        tx_hash: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>> {
        let rows = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, payment_id, seller_id, network, tx_hash, status, created_at
            FROM payment_records
            WHERE tx_hash = $1 AND ($2::VARCHAR IS NULL OR seller_id = $2)
            ORDER BY id DESC
            "#,
        )
        .bind(tx_hash)
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn seller_for_api_key(&self, api_key: &str) -> Result<Option<String>> {
        let seller = sqlx::query_scalar::<_, String>("SELECT seller_id FROM api_keys WHERE key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(seller)
    }

    async fn all_api_keys(&self) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT key FROM api_keys")
            .fetch_all(&self.pool)
            .await?;

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_modes() {
        assert!(matches!(parse_ssl_mode("disable"), Ok(PgSslMode::Disable)));
        assert!(matches!(parse_ssl_mode("Require"), Ok(PgSslMode::Require)));
        assert!(matches!(parse_ssl_mode("verify-full"), Ok(PgSslMode::VerifyFull)));
        assert!(matches!(
            parse_ssl_mode("sometimes"),
            Err(FacilitatorError::Configuration(_))
        ));
    }

    #[test]
    fn test_pool_options_clamp_idle() {
        let settings = DatabaseConfig {
            max_open_conns: 5,
            max_idle_conns: 15,
            ..DatabaseConfig::default()
        };
        let options = pool_options(&settings);
        assert_eq!(options.get_max_connections(), 5);
        assert_eq!(options.get_min_connections(), 5);
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(600)));
    }
}
