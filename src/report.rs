//! Offline summary report
//!
//! Scans the summary table and flattens every counter into one JSON line per
//! minute slot: `{"domain","date","path","time","hits"}`. Key fields and ttl
//! are not emitted.

use crate::collector_core::summary::SummaryCounter;
use crate::store::{EventStore, StoreError};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLine {
    /// Reversed domain (`com:example`)
    pub domain: String,
    /// `YYYYMMDD`
    pub date: String,
    pub path: String,
    /// Minute of day, `HHmm`
    pub time: String,
    pub hits: i64,
}

#[derive(Debug)]
pub enum ReportError {
    Store(StoreError),
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<StoreError> for ReportError {
    fn from(err: StoreError) -> Self {
        ReportError::Store(err)
    }
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        ReportError::Io(err)
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::Serialization(err)
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Store(e) => write!(f, "Store error: {}", e),
            ReportError::Io(e) => write!(f, "IO error: {}", e),
            ReportError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}

/// Flatten counters into report lines, one per minute slot.
pub fn report_lines(counters: &[SummaryCounter]) -> Vec<ReportLine> {
    let mut lines = Vec::new();

    for counter in counters {
        let domain = counter
            .key
            .domain_md5
            .split_once('-')
            .map(|(_, domain)| domain)
            .unwrap_or(&counter.key.domain_md5);

        let (date, path) = match counter.key.datepath.split_once(':') {
            Some((date, path)) => (date, path),
            None => {
                log::warn!("⚠️  Skipping summary item with malformed datepath: {:?}", counter.key.datepath);
                continue;
            }
        };

        for (time, hits) in &counter.slots {
            lines.push(ReportLine {
                domain: domain.to_string(),
                date: date.to_string(),
                path: path.to_string(),
                time: time.clone(),
                hits: *hits,
            });
        }
    }

    lines
}

/// Scan the summary table and write one JSON line per slot to `out`.
/// Returns the number of lines written.
pub async fn write_report<W: Write>(store: &dyn EventStore, out: &mut W) -> Result<usize, ReportError> {
    let counters = store.scan_summary().await?;
    let lines = report_lines(&counters);

    for line in &lines {
        serde_json::to_writer(&mut *out, line)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;

    log::info!(
        "📝 Report: {} lines from {} summary items ({})",
        lines.len(),
        counters.len(),
        store.backend_type()
    );

    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::summary::SummaryKey;

    fn counter(domain_md5: &str, datepath: &str, slots: &[(&str, i64)]) -> SummaryCounter {
        let mut counter = SummaryCounter::new(
            SummaryKey {
                domain_md5: domain_md5.to_string(),
                datepath: datepath.to_string(),
            },
            1,
        );
        for (slot, hits) in slots {
            counter.slots.insert(slot.to_string(), *hits);
        }
        counter
    }

    #[test]
    fn test_report_lines_split_keys() {
        let lines = report_lines(&[counter(
            "0123abcd-com:example",
            "20240601:/a?x=1:2",
            &[("1230", 2), ("1231", 5)],
        )]);

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            ReportLine {
                domain: "com:example".to_string(),
                date: "20240601".to_string(),
                path: "/a?x=1:2".to_string(),
                time: "1230".to_string(),
                hits: 2,
            }
        );
        assert_eq!(lines[1].hits, 5);
    }

    #[test]
    fn test_malformed_datepath_skipped() {
        let lines = report_lines(&[counter("x-com:example", "nodate", &[("0000", 1)])]);
        assert!(lines.is_empty());
    }

    #[test]
    fn test_line_json_shape() {
        let lines = report_lines(&[counter("h-org:example", "20240101:/", &[("0000", 3)])]);
        let json = serde_json::to_value(&lines[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"domain": "org:example", "date": "20240101", "path": "/", "time": "0000", "hits": 3})
        );
    }
}
