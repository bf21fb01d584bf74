//! Report Binary - summary table dump
//!
//! Prints one JSON line per domain/date/path/minute to stdout:
//!
//! ```text
//! {"domain":"com:example","date":"20240601","path":"/a","time":"1230","hits":2}
//! ```
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --bin report > report.jsonl
//! ```
//!
//! ## Environment Variables
//!
//! - HITFLOW_DB_PATH - SQLite database path (default: data/hitflow.db)
//! - RUST_LOG - Logging level (optional, default: info)

use hitflow::report::write_report;
use hitflow::{CollectorConfig, SqliteStore};
use std::io::BufWriter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    dotenv::dotenv().ok();

    let config = CollectorConfig::from_env()?;
    log::info!("📖 Reading summary from {}", config.db_path);

    let store = SqliteStore::open(&config.db_path)?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let lines = write_report(&store, &mut out).await?;
    log::info!("✅ Wrote {} report lines", lines);

    Ok(())
}
