//! In-memory store for tests and local runs.
//!
//! Every mutation happens under a single lock, which makes increments atomic.
//! Writes apply synchronously after the simulated latency, so a call dropped
//! at its deadline has written nothing. Failure and latency knobs let tests
//! exercise the pipeline's error paths.

use super::backend::{with_deadline, EventStore, StoreError};
use crate::collector_core::record::StorageItem;
use crate::collector_core::summary::{SummaryCounter, SummaryIncrement, SummaryKey};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct Tables {
    events: BTreeMap<String, StorageItem>,
    summary: BTreeMap<SummaryKey, SummaryCounter>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_batch_puts: AtomicBool,
    rejected_domains: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    batch_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every batch put fail with [`StoreError::Rejected`].
    pub fn fail_batch_puts(&self, fail: bool) {
        self.fail_batch_puts.store(fail, Ordering::SeqCst);
    }

    /// Reject summary increments for one partition key.
    pub fn reject_summary_for(&self, domain_md5: &str) {
        if let Ok(mut rejected) = self.rejected_domains.lock() {
            rejected.insert(domain_md5.to_string());
        }
    }

    /// Delay every write call by `latency` before applying it.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = Some(latency);
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.tables().map(|t| t.events.len()).unwrap_or(0)
    }

    pub fn events(&self) -> Vec<StorageItem> {
        self.tables()
            .map(|t| t.events.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn summary_len(&self) -> usize {
        self.tables().map(|t| t.summary.len()).unwrap_or(0)
    }

    pub fn summary_counter(&self, key: &SummaryKey) -> Option<SummaryCounter> {
        self.tables().ok().and_then(|t| t.summary.get(key).cloned())
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("in-memory tables poisoned".to_string()))
    }

    async fn simulate_latency(&self) {
        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn batch_put(&self, items: &[StorageItem], deadline: Instant) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        with_deadline(deadline, async {
            self.simulate_latency().await;

            if self.fail_batch_puts.load(Ordering::SeqCst) {
                return Err(StoreError::Rejected("batch put disabled".to_string()));
            }

            let keyed = items
                .iter()
                .map(|item| Ok((item.ingest_key()?, item.clone())))
                .collect::<Result<Vec<_>, StoreError>>()?;

            let mut tables = self.tables()?;
            tables.events.extend(keyed);
            Ok(())
        })
        .await
    }

    async fn increment_counter(&self, increment: &SummaryIncrement, deadline: Instant) -> Result<(), StoreError> {
        with_deadline(deadline, async {
            self.simulate_latency().await;

            let rejected = self
                .rejected_domains
                .lock()
                .map(|r| r.contains(&increment.key.domain_md5))
                .unwrap_or(false);
            if rejected {
                return Err(StoreError::Rejected(format!(
                    "summary updates disabled for {}",
                    increment.key.domain_md5
                )));
            }

            let mut tables = self.tables()?;
            tables
                .summary
                .entry(increment.key.clone())
                .or_insert_with(|| SummaryCounter::new(increment.key.clone(), increment.ttl))
                .apply(increment);
            Ok(())
        })
        .await
    }

    async fn scan_summary(&self) -> Result<Vec<SummaryCounter>, StoreError> {
        Ok(self.tables()?.summary.values().cloned().collect())
    }

    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        let before = tables.events.len() + tables.summary.len();
        tables.events.retain(|_, item| item.ttl().map_or(true, |ttl| ttl > now));
        tables.summary.retain(|_, counter| counter.ttl > now);
        Ok(before - tables.events.len() - tables.summary.len())
    }

    fn backend_type(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::record::{RawEvent, RecordMapper};
    use crate::collector_core::summary::DEFAULT_SUMMARY_TTL_SECS;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    fn item(path: &str, received_at: i64) -> StorageItem {
        RecordMapper::default()
            .map_record(
                &RawEvent::new().with_field("url", format!("https://example.com{}", path)),
                received_at,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_passed_deadline_writes_nothing() {
        let store = InMemoryStore::new();
        let expired = Instant::now() - Duration::from_millis(1);
        let item = item("/a", 1_700_000_000);
        let increment = SummaryIncrement::for_item(&item, DEFAULT_SUMMARY_TTL_SECS).unwrap();

        let put = store.batch_put(std::slice::from_ref(&item), expired).await;
        let add = store.increment_counter(&increment, expired).await;

        assert!(matches!(put, Err(StoreError::DeadlineExceeded)));
        assert!(matches!(add, Err(StoreError::DeadlineExceeded)));
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.summary_len(), 0);
    }

    #[tokio::test]
    async fn test_purge_counts_events_and_summary_items() {
        let store = InMemoryStore::new();
        let old = item("/old", 1_000);
        let increment = SummaryIncrement::for_item(&old, 1).unwrap();
        store
            .batch_put(&[old, item("/new", 1_700_000_000)], far_deadline())
            .await
            .unwrap();
        store.increment_counter(&increment, far_deadline()).await.unwrap();

        // one event and one summary item; its slot is not counted
        assert_eq!(store.purge_expired(1_600_000_000).await.unwrap(), 2);
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.summary_len(), 0);
    }
}
