use crate::errors::{FacilitatorError, Result};
use crate::models::{NewPaymentRecord, PaymentRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use security::api_keys::ApiKeySource;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ledger and API-key persistence
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Append one ledger row. Rows are never updated or deleted.
    async fn insert_payment_record(&self, record: &NewPaymentRecord) -> Result<PaymentRecord>;

    /// Rows for `payment_id`, newest first, limited to `seller_id` when given
    async fn payments_by_id(
        &self,
        payment_id: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>>;

    /// Rows for `tx_hash`, newest first, limited to `seller_id` when given
    async fn payments_by_tx_hash(
        &self,
        tx_hash: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>>;

    async fn seller_for_api_key(&self, api_key: &str) -> Result<Option<String>>;

    async fn all_api_keys(&self) -> Result<Vec<String>>;
}

/// Feeds the API-key cache from a [`PaymentStore`]
pub struct StoreKeySource {
    store: Arc<dyn PaymentStore>,
}

impl StoreKeySource {
    pub fn new(store: Arc<dyn PaymentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ApiKeySource for StoreKeySource {
    async fn fetch_api_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.store.all_api_keys().await?)
    }
}

#[derive(Default)]
struct MemoryState {
    records: Vec<PaymentRecord>,
    api_keys: HashMap<String, String>,
    next_id: i64,
}

/// Process-local store for tests and local runs without Postgres
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_api_key(&self, api_key: &str, seller_id: &str) {
        self.state
            .lock()
            .api_keys
            .insert(api_key.to_string(), seller_id.to_string());
    }

    /// Make ledger inserts fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make key lookups fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Every row in insertion order
    pub fn records(&self) -> Vec<PaymentRecord> {
        self.state.lock().records.clone()
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(FacilitatorError::Internal("key store unavailable".to_string()));
        }
        Ok(())
    }

    fn select<F>(&self, seller_id: Option<&str>, matches: F) -> Vec<PaymentRecord>
    where
        F: Fn(&PaymentRecord) -> bool,
    {
        let state = self.state.lock();
        let mut rows: Vec<PaymentRecord> = state
            .records
            .iter()
            .filter(|r| matches(r))
            .filter(|r| seller_id.map_or(true, |s| r.seller_id.as_deref() == Some(s)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment_record(&self, record: &NewPaymentRecord) -> Result<PaymentRecord> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(FacilitatorError::Internal("ledger unavailable".to_string()));
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let row = PaymentRecord {
            id: state.next_id,
            payment_id: record.payment_id.clone(),
            seller_id: record.seller_id.clone(),
            network: record.network.clone(),
            tx_hash: record.tx_hash.clone(),
            status: record.status.as_str().to_string(),
            created_at: Utc::now(),
        };
        state.records.push(row.clone());
        Ok(row)
    }

    async fn payments_by_id(
        &self,
        payment_id: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>> {
        Ok(self.select(seller_id, |r| r.payment_id.as_deref() == Some(payment_id)))
    }

    async fn payments_by_tx_hash(
        &self,
        tx_hash: &str,
        seller_id: Option<&str>,
    ) -> Result<Vec<PaymentRecord>> {
        Ok(self.select(seller_id, |r| r.tx_hash == tx_hash))
    }

    async fn seller_for_api_key(&self, api_key: &str) -> Result<Option<String>> {
        self.check_reads()?;
        Ok(self.state.lock().api_keys.get(api_key).cloned())
    }

    async fn all_api_keys(&self) -> Result<Vec<String>> {
        self.check_reads()?;
        Ok(self.state.lock().api_keys.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentStatus;

    fn record(payment_id: &str, seller: Option<&str>, tx: &str) -> NewPaymentRecord {
        NewPaymentRecord {
            payment_id: Some(payment_id.to_string()),
            seller_id: seller.map(str::to_string),
            network: Some("tron:nile".to_string()),
            tx_hash: tx.to_string(),
            status: PaymentStatus::Success,
        }
    }

    #[tokio::test]
    async fn test_rows_are_appended_newest_first() {
        let store = MemoryStore::new();
        store.insert_payment_record(&record("p1", None, "0x1")).await.unwrap();
        store.insert_payment_record(&record("p1", None, "0x2")).await.unwrap();
        store.insert_payment_record(&record("p2", None, "0x3")).await.unwrap();

        let rows = store.payments_by_id("p1", None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tx_hash, "0x2");
        assert!(rows[0].id > rows[1].id);

        let rows = store.payments_by_tx_hash("0x3", None).await.unwrap();
        assert_eq!(rows[0].payment_id.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn test_seller_scoping() {
        let store = MemoryStore::new();
        store.insert_payment_record(&record("p1", Some("s1"), "0x1")).await.unwrap();
        store.insert_payment_record(&record("p1", Some("s2"), "0x2")).await.unwrap();

        let rows = store.payments_by_id("p1", Some("s1")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].tx_hash, "0x1");
        assert!(store.payments_by_id("p1", Some("s3")).await.unwrap().is_empty());
        assert_eq!(store.payments_by_id("p1", None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_key_source() {
        let store = Arc::new(MemoryStore::new());
        store.add_api_key("k1", "s1");

        let source = StoreKeySource::new(store.clone());
        assert_eq!(source.fetch_api_keys().await.unwrap(), vec!["k1".to_string()]);
        assert_eq!(store.seller_for_api_key("k1").await.unwrap().as_deref(), Some("s1"));
        assert_eq!(store.seller_for_api_key("k2").await.unwrap(), None);

        store.set_fail_reads(true);
        assert!(source.fetch_api_keys().await.is_err());
    }
}
