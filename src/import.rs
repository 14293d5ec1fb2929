//! Bulk import of identifier candidates from scanner output.
//!
//! The file is a sequence of 4-line blocks, blank lines ignored:
//!
//! ```text
//! Portal: http://portal.example:8080/c/
//! MAC: 00:1A:79:12:34:56
//! Expiration: March 15, 2026, 12:00 am
//! Channels: 1234
//! ```

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{CredentialStore, StoreError};

const BLOCK_LINES: usize = 4;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-F]{2}(:[0-9A-F]{2}){5}$").unwrap());

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Cannot read {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("Block at line {line}: {reason}")]
    MalformedBlock { line: usize, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub endpoint: String,
    pub identifier: String,
    pub expiration: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub existing: usize,
    /// Malformed blocks, logged and ignored
    pub skipped: usize,
}

/// Upper-cases and validates a colon-separated hardware address.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let value = raw.trim().to_uppercase();
    IDENTIFIER_RE.is_match(&value).then_some(value)
}

/// "March 15, 2026, 12:00 am" → 2026-03-15. Only the first two comma parts count.
pub fn parse_expiration(raw: &str) -> Option<NaiveDate> {
    let date: Vec<&str> = raw.split(',').take(2).map(str::trim).collect();
    NaiveDate::parse_from_str(&date.join(", "), "%B %d, %Y").ok()
}

fn field<'a>(line: &'a str, name: &str, line_no: usize) -> Result<&'a str, ImportError> {
    match line.split_once(':') {
        Some((_, value)) if !value.trim().is_empty() => Ok(value.trim()),
        _ => Err(ImportError::MalformedBlock {
            line: line_no,
            reason: format!("missing {} value in '{}'", name, line),
        }),
    }
}

fn parse_block(lines: &[(usize, &str)]) -> Result<ImportEntry, ImportError> {
    let start = lines.first().map(|(n, _)| *n).unwrap_or(0);
    if lines.len() < 3 {
        return Err(ImportError::MalformedBlock {
            line: start,
            reason: "truncated block".to_string(),
        });
    }

    let endpoint = field(lines[0].1, "portal", lines[0].0)?;
    let raw_identifier = field(lines[1].1, "identifier", lines[1].0)?;
    let raw_expiration = field(lines[2].1, "expiration", lines[2].0)?;

    let identifier =
        normalize_identifier(raw_identifier).ok_or_else(|| ImportError::MalformedBlock {
            line: lines[1].0,
            reason: format!("'{}' is not a hardware address", raw_identifier),
        })?;
    let expiration =
        parse_expiration(raw_expiration).ok_or_else(|| ImportError::MalformedBlock {
            line: lines[2].0,
            reason: format!("unrecognised date '{}'", raw_expiration),
        })?;

    Ok(ImportEntry {
        endpoint: endpoint.to_string(),
        identifier,
        expiration,
    })
}

/// Splits scanner output into blocks; each block parses independently.
pub fn parse_scanner_output(content: &str) -> Vec<Result<ImportEntry, ImportError>> {
    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty())
        .collect();

    lines.chunks(BLOCK_LINES).map(parse_block).collect()
}

pub fn import_entries(
    store: &dyn CredentialStore,
    entries: impl IntoIterator<Item = ImportEntry>,
) -> Result<ImportReport, ImportError> {
    let mut report = ImportReport::default();
    for entry in entries {
        if store.add_identifier(&entry.endpoint, &entry.identifier, Some(entry.expiration))? {
            info!("ADDED: {} - {} - {}", entry.endpoint, entry.identifier, entry.expiration);
            report.added += 1;
        } else {
            info!("EXISTS: {} - {}", entry.endpoint, entry.identifier);
            report.existing += 1;
        }
    }
    Ok(report)
}

pub fn import_file(store: &dyn CredentialStore, path: &Path) -> Result<ImportReport, ImportError> {
    let content = fs::read_to_string(path)
        .map_err(|e| ImportError::Io(path.display().to_string(), e))?;

    let mut skipped = 0;
    let mut entries = Vec::new();
    for parsed in parse_scanner_output(&content) {
        match parsed {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!("Skipping block: {}", e);
                skipped += 1;
            }
        }
    }

    let mut report = import_entries(store, entries)?;
    report.skipped = skipped;
    Ok(report)
}
