//! Event table writer
//!
//! Submits all mapped items of one request as a single batch put. The store
//! applies items independently and keys them by content, so replaying the same
//! batch overwrites instead of duplicating. No retries happen here.

use super::record::StorageItem;
use crate::store::{EventStore, StoreError};
use std::sync::Arc;
use tokio::time::Instant;

pub struct BatchWriter {
    store: Arc<dyn EventStore>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Write `items` in one batch put. Returns the number of items submitted.
    ///
    /// An empty batch is not sent to the store.
    pub async fn write_batch(&self, items: &[StorageItem], deadline: Instant) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }

        self.store.batch_put(items, deadline).await?;

        log::debug!(
            "✅ Wrote {} events to {} event table",
            items.len(),
            self.store.backend_type()
        );

        Ok(items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::record::{RawEvent, RecordMapper};
    use crate::store::InMemoryStore;
    use tokio::time::Duration;

    fn items(n: usize) -> Vec<StorageItem> {
        let mapper = RecordMapper::default();
        (0..n)
            .map(|i| {
                let event = RawEvent::new()
                    .with_field("url", format!("https://example.com/p/{}", i))
                    .with_field("eid", i.to_string());
                mapper.map_record(&event, 1_700_000_000).unwrap()
            })
            .collect()
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_write_batch() {
        let store = Arc::new(InMemoryStore::new());
        let writer = BatchWriter::new(store.clone());

        let written = writer.write_batch(&items(5), deadline()).await.unwrap();
        assert_eq!(written, 5);
        assert_eq!(store.event_count(), 5);
        assert_eq!(store.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_replay_overwrites() {
        let store = Arc::new(InMemoryStore::new());
        let writer = BatchWriter::new(store.clone());
        let batch = items(3);

        writer.write_batch(&batch, deadline()).await.unwrap();
        writer.write_batch(&batch, deadline()).await.unwrap();

        assert_eq!(store.event_count(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_store() {
        let store = Arc::new(InMemoryStore::new());
        let writer = BatchWriter::new(store.clone());

        assert_eq!(writer.write_batch(&[], deadline()).await.unwrap(), 0);
        assert_eq!(store.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_reported_once() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_batch_puts(true);
        let writer = BatchWriter::new(store.clone());

        let result = writer.write_batch(&items(4), deadline()).await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.event_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_deadline() {
        let store = Arc::new(InMemoryStore::new());
        store.set_latency(Duration::from_millis(200));
        let writer = BatchWriter::new(store.clone());

        let result = writer
            .write_batch(&items(1), Instant::now() + Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
    }
}
