//! Store capability trait
//!
//! The pipeline only needs two write primitives from its store (batch put and
//! atomic set-ttl-and-add) plus a summary scan for the report reader and a
//! TTL purge for stores without their own reaper.

use crate::collector_core::record::StorageItem;
use crate::collector_core::summary::{SummaryCounter, SummaryIncrement};
use async_trait::async_trait;
use std::future::Future;
use tokio::time::Instant;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Database(String),
    /// The store refused the request (validation, throttling)
    Rejected(String),
    /// The request deadline passed before the store answered
    DeadlineExceeded,
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Database(format!("store task failed: {}", err))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Rejected(e) => write!(f, "Request rejected: {}", e),
            StoreError::DeadlineExceeded => write!(f, "Request deadline exceeded"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Key-value store holding the event and summary tables.
///
/// Implementations are shared process-wide behind `Arc<dyn EventStore>` and
/// must be safe for concurrent use without caller-side locking.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Put every item into the event table, overwriting items with the same
    /// ingestion key. Items are applied independently.
    ///
    /// Returns [`StoreError::DeadlineExceeded`] only when nothing was written.
    async fn batch_put(&self, items: &[StorageItem], deadline: Instant) -> Result<(), StoreError>;

    /// Atomically set the counter's ttl and add `hits` to its slot, creating
    /// the item or slot when absent.
    ///
    /// Returns [`StoreError::DeadlineExceeded`] only when the add was not applied.
    async fn increment_counter(&self, increment: &SummaryIncrement, deadline: Instant) -> Result<(), StoreError>;

    /// Every summary counter, ordered by key.
    async fn scan_summary(&self) -> Result<Vec<SummaryCounter>, StoreError>;

    /// Remove events and summary items with `ttl <= now`, along with the
    /// removed items' minute slots. Returns the number of events plus summary
    /// items removed; slots are not counted.
    async fn purge_expired(&self, now: i64) -> Result<usize, StoreError>;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// Bound a cancel-safe store call by the request deadline. Expiry drops the
/// call and surfaces as [`StoreError::DeadlineExceeded`]. A call whose
/// deadline has already passed is never polled.
///
/// Only for futures that apply nothing once dropped. Work handed to another
/// thread keeps running after the drop and must check the deadline itself.
pub async fn with_deadline<T, F>(deadline: Instant, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    if Instant::now() >= deadline {
        return Err(StoreError::DeadlineExceeded);
    }

    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_passed_deadline_never_polls_call() {
        let polled = AtomicBool::new(false);
        let result = with_deadline(Instant::now() - Duration::from_millis(1), async {
            polled.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_call_within_deadline() {
        let result = with_deadline(Instant::now() + Duration::from_secs(5), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
