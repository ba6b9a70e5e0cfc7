//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization
//! - Folder structure initialization
//! - Best-effort bucket purge

use anstyle::{AnsiColor, Color, Style};
use anyhow::{Context, Result};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{error, info, warn};
use std::io::Write;
use std::time::Instant;

use crate::config::AppConfig;
use crate::context::AppContext;

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

const DIM: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));
const DURATION: Style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

/// Format a `duration` key-value (e.g. `1.234567ms`) to two decimals.
fn format_duration(raw: &str) -> String {
    if let Some(idx) = raw.find(|c: char| c.is_alphabetic()) {
        let (num, unit) = (&raw[..idx], &raw[idx..]);
        if let Ok(val) = num.parse::<f32>() {
            return format!("{:.2} {}", val, unit);
        }
    }
    raw.to_string()
}

pub fn initialize_logger() {
    let mut builder = Builder::new();
    builder
        .write_style(WriteStyle::Auto)
        .format(|buf, record| {
            let ts = buf.timestamp();

            let level_style = buf.default_level_style(record.level());
            let lvl = format!("{}{}{:#}", level_style, record.level(), level_style);

            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| format_duration(&v.to_string()))
                .unwrap_or_default();

            // Duration column is 10 wide, blank when absent
            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{}{:>10}{:#}", DURATION, dur_raw, DURATION)
            };

            writeln!(
                buf,
                "{}{}{:#} {} {}{}{:#}",
                DIM,
                ts,
                DIM,
                lvl,
                DIM,
                record.target(),
                DIM
            )?;

            let message = format!("{}", record.args());
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();

            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }

            Ok(())
        })
        // Only show INFO+ globally, WARN+ for Rocket; RUST_LOG wins
        .filter(None, log::LevelFilter::Info)
        .filter(Some("rocket"), log::LevelFilter::Warn)
        .parse_default_env();

    if let Err(err) = builder.try_init() {
        eprintln!("Logger already initialized: {}", err);
    }
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!(
            "Failed to create upload folder {}",
            config.upload_dir.display()
        )
    })?;
    if !config.bundles_dir().is_dir() {
        warn!(
            "Bundle folder {} does not exist; no app bundles can be provisioned",
            config.bundles_dir().display()
        );
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────
// Bucket Purge
// ────────────────────────────────────────────────────────────────

/// Delete every object in the configured bucket. Failures are logged, never
/// fatal.
pub async fn purge_bucket(context: &AppContext) {
    let start_time = Instant::now();
    let bucket = context.bucket();
    match context.store.purge_all(&bucket).await {
        Ok(report) => {
            info!(duration = &*format!("{:?}", start_time.elapsed());
                "Purged {} objects from {} ({} failed)",
                report.deleted.len(),
                bucket,
                report.failed.len()
            );
        }
        Err(err) => {
            error!("Failed to purge bucket {}: {}", bucket, err);
        }
    }
}
