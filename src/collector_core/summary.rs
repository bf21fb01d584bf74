//! Per-domain, per-minute hit summary
//!
//! Every mapped event contributes one hit to the counter item keyed by
//! `(domain_md5, "<YYYYMMDD>:<request_uri>")`, in the attribute named after its
//! minute of day (`HHmm`). Updates are "set ttl, add 1" against the store's
//! atomic primitive, so concurrent writers converge regardless of order.

use super::record::{StorageItem, SECONDS_PER_DAY};
use crate::store::{EventStore, StoreError};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

/// `YYYYMMDDHHmm`, UTC
pub const SLOT_FORMAT: &str = "%Y%m%d%H%M";
/// Summary items expire 360 days after their latest contributing event.
pub const DEFAULT_SUMMARY_TTL_SECS: i64 = 360 * SECONDS_PER_DAY;
/// Each event adds exactly one hit.
pub const HIT_INCREMENT: i64 = 1;

/// Calendar date and minute-of-day buckets derived from a receipt time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    /// `YYYYMMDD`
    pub date: String,
    /// `HHmm`
    pub minute: String,
}

impl TimeSlot {
    pub fn from_epoch_seconds(ttm: i64) -> Result<Self, SummaryError> {
        let at = DateTime::from_timestamp(ttm, 0).ok_or(SummaryError::TimestampOutOfRange(ttm))?;
        let formatted = at.format(SLOT_FORMAT).to_string();

        // years outside 0000..=9999 format wider than the fixed slot
        if formatted.len() != 12 || !formatted.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SummaryError::TimestampOutOfRange(ttm));
        }

        Ok(Self {
            date: formatted[..8].to_string(),
            minute: formatted[8..].to_string(),
        })
    }
}

/// Primary key of a summary counter item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SummaryKey {
    pub domain_md5: String,
    pub datepath: String,
}

impl SummaryKey {
    pub fn new(domain_md5: impl Into<String>, date: &str, request_uri: &str) -> Self {
        Self {
            domain_md5: domain_md5.into(),
            datepath: format!("{}:{}", date, request_uri),
        }
    }
}

/// One "set ttl and add" update against a summary counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryIncrement {
    pub key: SummaryKey,
    /// Minute-of-day attribute to bump
    pub slot: String,
    pub hits: i64,
    /// Overwrites the item's ttl (last writer wins)
    pub ttl: i64,
}

impl SummaryIncrement {
    /// Derive the increment for a mapped storage item.
    pub fn for_item(item: &StorageItem, summary_ttl_secs: i64) -> Result<Self, SummaryError> {
        let domain_md5 = item
            .domain_md5()
            .ok_or(SummaryError::MissingAttribute("domain_md5"))?;
        let request_uri = item
            .request_uri()
            .ok_or(SummaryError::MissingAttribute("request_uri"))?;
        let ttm = item.ttm().ok_or(SummaryError::MissingAttribute("ttm"))?;

        let slot = TimeSlot::from_epoch_seconds(ttm)?;

        Ok(Self {
            key: SummaryKey::new(domain_md5, &slot.date, request_uri),
            slot: slot.minute,
            hits: HIT_INCREMENT,
            ttl: ttm.saturating_add(summary_ttl_secs),
        })
    }
}

/// A summary item as stored: minute slot → hit count, plus ttl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryCounter {
    pub key: SummaryKey,
    pub ttl: i64,
    pub slots: BTreeMap<String, i64>,
}

impl SummaryCounter {
    pub fn new(key: SummaryKey, ttl: i64) -> Self {
        Self {
            key,
            ttl,
            slots: BTreeMap::new(),
        }
    }

    /// Additive merge. Commutative in the slot counts; ttl is last-write-wins.
    pub fn apply(&mut self, increment: &SummaryIncrement) {
        self.ttl = increment.ttl;
        *self.slots.entry(increment.slot.clone()).or_insert(0) += increment.hits;
    }

    pub fn hits(&self, slot: &str) -> i64 {
        self.slots.get(slot).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub enum SummaryError {
    MissingAttribute(&'static str),
    TimestampOutOfRange(i64),
}

impl std::fmt::Display for SummaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryError::MissingAttribute(name) => write!(f, "Storage item has no '{}' attribute", name),
            SummaryError::TimestampOutOfRange(ttm) => write!(f, "Receipt time {} cannot be bucketed", ttm),
        }
    }
}

impl std::error::Error for SummaryError {}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationOutcome {
    pub applied: usize,
    pub failed: usize,
}

/// Applies one summary increment per mapped event.
pub struct SummaryAggregator {
    store: Arc<dyn EventStore>,
    summary_ttl_secs: i64,
}

impl SummaryAggregator {
    pub fn new(store: Arc<dyn EventStore>, summary_ttl_secs: i64) -> Self {
        Self {
            store,
            summary_ttl_secs,
        }
    }

    /// Increment the counter for every item. A failed record is logged and
    /// skipped; the remaining records are still applied.
    pub async fn aggregate(&self, items: &[StorageItem], deadline: Instant) -> AggregationOutcome {
        let mut outcome = AggregationOutcome::default();

        for item in items {
            let increment = match SummaryIncrement::for_item(item, self.summary_ttl_secs) {
                Ok(increment) => increment,
                Err(e) => {
                    log::warn!("⚠️  Skipping summary update: {}", e);
                    outcome.failed += 1;
                    continue;
                }
            };

            match self.increment(&increment, deadline).await {
                Ok(()) => outcome.applied += 1,
                Err(e) => {
                    log::warn!(
                        "⚠️  Summary update failed ({} {} slot {}): {}",
                        increment.key.domain_md5,
                        increment.key.datepath,
                        increment.slot,
                        e
                    );
                    outcome.failed += 1;
                }
            }
        }

        log::debug!(
            "📊 Summary pass: {} applied, {} failed ({})",
            outcome.applied,
            outcome.failed,
            self.store.backend_type()
        );

        outcome
    }

    async fn increment(&self, increment: &SummaryIncrement, deadline: Instant) -> Result<(), StoreError> {
        self.store.increment_counter(increment, deadline).await
    }
}
