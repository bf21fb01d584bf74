//! Raw event → storage item mapping
//!
//! Sender fields pass through a small policy table: the temporal fields are
//! coerced from epoch milliseconds to epoch seconds, everything else is kept
//! verbatim as text. Domain metadata and server timestamps are layered on top.

use super::canonicalizer::{canonicalize, CanonicalizeError, DomainMetadata};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field consumed by the canonicalizer (and also stored verbatim).
pub const URL_FIELD: &str = "url";
/// Server receipt time, epoch seconds.
pub const RECEIPT_FIELD: &str = "ttm";
/// Expiration time, epoch seconds.
pub const TTL_FIELD: &str = "ttl";

pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
/// Event items live for 60 days after receipt.
pub const DEFAULT_EVENT_TTL_SECS: i64 = 60 * SECONDS_PER_DAY;

/// How a sender field is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// Milliseconds since epoch, stored as whole epoch seconds
    EpochMillis,
    /// Stored as sent
    Verbatim,
}

const RESERVED_FIELDS: &[(&str, FieldPolicy)] = &[
    ("dtm", FieldPolicy::EpochMillis),
    ("stm", FieldPolicy::EpochMillis),
    (URL_FIELD, FieldPolicy::Verbatim),
];

/// Look up the storage policy for a sender field name.
pub fn field_policy(name: &str) -> FieldPolicy {
    RESERVED_FIELDS
        .iter()
        .find(|(reserved, _)| *reserved == name)
        .map(|(_, policy)| *policy)
        .unwrap_or(FieldPolicy::Verbatim)
}

/// One sender-supplied event: a flat field → value map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent {
    fields: BTreeMap<String, String>,
}

impl RawEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.get(URL_FIELD)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawEvent {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Inbound request body: `{"data": [ {field: value}, ... ]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsPayload {
    pub data: Vec<RawEvent>,
}

impl EventsPayload {
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

/// Typed attribute value, tagged the way the store persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    Text(String),
    #[serde(rename = "N")]
    Number(i64),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(_) => None,
        }
    }
}

/// A mapped event, ready for the event table's batch put.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageItem {
    attributes: BTreeMap<String, AttributeValue>,
}

impl StorageItem {
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::as_text)
    }

    pub fn number(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(AttributeValue::as_number)
    }

    pub fn domain_md5(&self) -> Option<&str> {
        self.text("domain_md5")
    }

    pub fn request_uri(&self) -> Option<&str> {
        self.text("request_uri")
    }

    pub fn ttm(&self) -> Option<i64> {
        self.number(RECEIPT_FIELD)
    }

    pub fn ttl(&self) -> Option<i64> {
        self.number(TTL_FIELD)
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeValue> {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Deterministic primary key for the event table: md5 over the item's
    /// canonical JSON. Re-submitting an identical item overwrites it.
    pub fn ingest_key(&self) -> Result<String, serde_json::Error> {
        let canonical = serde_json::to_vec(&self.attributes)?;
        Ok(hex::encode(Md5::digest(&canonical)))
    }

    fn set(&mut self, name: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(name.into(), value);
    }
}

#[derive(Debug)]
pub enum MapError {
    MissingUrl,
    Canonicalize(CanonicalizeError),
}

impl From<CanonicalizeError> for MapError {
    fn from(err: CanonicalizeError) -> Self {
        MapError::Canonicalize(err)
    }
}

impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::MissingUrl => write!(f, "Event has no '{}' field", URL_FIELD),
            MapError::Canonicalize(e) => write!(f, "URL canonicalization failed: {}", e),
        }
    }
}

impl std::error::Error for MapError {}

/// Convert a millisecond epoch string to whole seconds, truncating.
///
/// Accepts anything `f64` parses (`1.7e12`, `1700000000000.9`); rejects
/// non-finite values and values outside the `i64` second range.
pub fn millis_to_epoch_seconds(value: &str) -> Option<i64> {
    let millis: f64 = value.trim().parse().ok()?;
    if !millis.is_finite() {
        return None;
    }
    let seconds = (millis / 1000.0).trunc();
    if seconds < i64::MIN as f64 || seconds > i64::MAX as f64 {
        return None;
    }
    Some(seconds as i64)
}

/// Maps raw events into storage items.
///
/// The receipt time is always injected by the caller so mapping is a pure
/// function of `(event, received_at)`.
#[derive(Debug, Clone)]
pub struct RecordMapper {
    event_ttl_secs: i64,
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_TTL_SECS)
    }
}

impl RecordMapper {
    pub fn new(event_ttl_secs: i64) -> Self {
        Self { event_ttl_secs }
    }

    pub fn event_ttl_secs(&self) -> i64 {
        self.event_ttl_secs
    }

    /// Map one event received at `received_at` (epoch seconds).
    pub fn map_record(&self, event: &RawEvent, received_at: i64) -> Result<StorageItem, MapError> {
        let url = event.url().ok_or(MapError::MissingUrl)?;
        let metadata = canonicalize(url)?;
        Ok(self.build_item(event, &metadata, received_at))
    }

    fn build_item(&self, event: &RawEvent, metadata: &DomainMetadata, received_at: i64) -> StorageItem {
        let mut item = StorageItem::default();

        for (name, value) in event.iter() {
            match field_policy(name) {
                FieldPolicy::EpochMillis => match millis_to_epoch_seconds(value) {
                    Some(seconds) => item.set(name, AttributeValue::Number(seconds)),
                    None => {
                        log::warn!("⚠️  Dropping field '{}': not a millisecond timestamp: {:?}", name, value);
                    }
                },
                FieldPolicy::Verbatim => item.set(name, AttributeValue::Text(value.to_string())),
            }
        }

        for (name, value) in metadata.attributes() {
            item.set(name, AttributeValue::Text(value.to_string()));
        }

        item.set(RECEIPT_FIELD, AttributeValue::Number(received_at));
        item.set(TTL_FIELD, AttributeValue::Number(received_at.saturating_add(self.event_ttl_secs)));

        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECEIVED_AT: i64 = 1_717_245_000;

    fn sample_event() -> RawEvent {
        RawEvent::new()
            .with_field("url", "HTTP://Example.COM/Foo")
            .with_field("dtm", "1700000000000")
            .with_field("e", "pv")
    }

    #[test]
    fn test_map_scenario_a() {
        let item = RecordMapper::default().map_record(&sample_event(), RECEIVED_AT).unwrap();

        assert_eq!(item.text("domain"), Some("com:example"));
        assert_eq!(item.number("dtm"), Some(1_700_000_000));
        assert_eq!(item.text("url"), Some("HTTP://Example.COM/Foo"));
        assert_eq!(item.text("e"), Some("pv"));
        assert_eq!(item.ttm(), Some(RECEIVED_AT));
        assert_eq!(item.ttl(), Some(RECEIVED_AT + 60 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_temporal_fields_truncate() {
        let event = RawEvent::new()
            .with_field("url", "https://example.com/")
            .with_field("dtm", "1700000000999")
            .with_field("stm", "1.7000000015e12");

        let item = RecordMapper::default().map_record(&event, RECEIVED_AT).unwrap();
        assert_eq!(item.number("dtm"), Some(1_700_000_000));
        assert_eq!(item.number("stm"), Some(1_700_000_001));
    }

    #[test]
    fn test_bad_temporal_field_is_dropped_not_fatal() {
        let event = RawEvent::new()
            .with_field("url", "https://example.com/")
            .with_field("dtm", "yesterday")
            .with_field("stm", "NaN");

        let item = RecordMapper::default().map_record(&event, RECEIVED_AT).unwrap();
        assert!(item.get("dtm").is_none());
        assert!(item.get("stm").is_none());
        assert_eq!(item.text("domain"), Some("com:example"));
    }

    #[test]
    fn test_non_reserved_numeric_strings_stay_text() {
        let event = RawEvent::new()
            .with_field("url", "https://example.com/")
            .with_field("vp", "1024");

        let item = RecordMapper::default().map_record(&event, RECEIVED_AT).unwrap();
        assert_eq!(item.text("vp"), Some("1024"));
    }

    #[test]
    fn test_domain_metadata_wins_over_sender_fields() {
        let mut event = RawEvent::new().with_field("url", "https://example.com/a");
        for name in DomainMetadata::FIELDS {
            event.insert(name, "spoofed");
        }
        event.insert("ttm", "spoofed");

        let item = RecordMapper::default().map_record(&event, RECEIVED_AT).unwrap();
        for name in DomainMetadata::FIELDS {
            assert_ne!(item.text(name), Some("spoofed"), "field {}", name);
        }
        assert_eq!(item.request_uri(), Some("/a"));
        assert_eq!(item.ttm(), Some(RECEIVED_AT));
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mapper = RecordMapper::default();
        let a = mapper.map_record(&sample_event(), RECEIVED_AT).unwrap();
        let b = mapper.map_record(&sample_event(), RECEIVED_AT).unwrap();

        assert_eq!(a, b);
        assert_eq!(serde_json::to_vec(&a).unwrap(), serde_json::to_vec(&b).unwrap());
        assert_eq!(a.ingest_key().unwrap(), b.ingest_key().unwrap());
    }

    #[test]
    fn test_distinct_events_have_distinct_keys() {
        let mapper = RecordMapper::default();
        let a = mapper.map_record(&sample_event(), RECEIVED_AT).unwrap();
        let b = mapper
            .map_record(&sample_event().with_field("e", "click"), RECEIVED_AT)
            .unwrap();
        assert_ne!(a.ingest_key().unwrap(), b.ingest_key().unwrap());
    }

    #[test]
    fn test_missing_or_bad_url_fails_record() {
        let mapper = RecordMapper::default();
        let no_url = RawEvent::new().with_field("e", "pv");
        assert!(matches!(mapper.map_record(&no_url, RECEIVED_AT), Err(MapError::MissingUrl)));

        let bad_url = RawEvent::new().with_field("url", "not a url");
        assert!(matches!(
            mapper.map_record(&bad_url, RECEIVED_AT),
            Err(MapError::Canonicalize(_))
        ));
    }

    #[test]
    fn test_parse_payload() {
        let body = br#"{"data":[{"url":"https://example.com/","dtm":"1700000000000"},{"e":"pv"}]}"#;
        let payload = EventsPayload::from_json(body).unwrap();
        assert_eq!(payload.data.len(), 2);
        assert_eq!(payload.data[0].get("dtm"), Some("1700000000000"));
        assert_eq!(payload.data[1].url(), None);
    }

    #[test]
    fn test_malformed_payload() {
        assert!(EventsPayload::from_json(br#"{"data": [{"url": 5}]}"#).is_err());
        assert!(EventsPayload::from_json(br#"{"invalid": "json"#).is_err());
        assert!(EventsPayload::from_json(br#"[]"#).is_err());
    }

    #[test]
    fn test_attribute_value_wire_format() {
        let item = RecordMapper::default().map_record(&sample_event(), RECEIVED_AT).unwrap();
        let json: serde_json::Value = serde_json::to_value(&item).unwrap();
        assert_eq!(json["dtm"], serde_json::json!({"N": 1_700_000_000i64}));
        assert_eq!(json["domain"], serde_json::json!({"S": "com:example"}));
    }
}
