use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::classifier;
use crate::flex_id::FlexId;

/// Terminal result of one validation attempt for an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// At least one relevant, playable stream was found
    Success,
    /// Handshake / authentication failed
    Login,
    /// Transient or technical failure after authentication
    Error,
    /// Authenticated, but nothing relevant or playable
    Content,
    /// Not attempted because the endpoint already has a working identifier
    Skipped,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Login => "LOGIN",
            Status::Error => "ERROR",
            Status::Content => "CONTENT",
            Status::Skipped => "SKIPPED",
        }
    }

    /// Whether writing this status bumps the identifier's failure counter.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, Status::Success | Status::Skipped)
    }

    pub fn all() -> &'static [Status] {
        &[
            Status::Success,
            Status::Login,
            Status::Error,
            Status::Content,
            Status::Skipped,
        ]
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SUCCESS" => Ok(Status::Success),
            "LOGIN" => Ok(Status::Login),
            "ERROR" => Ok(Status::Error),
            "CONTENT" => Ok(Status::Content),
            "SKIPPED" => Ok(Status::Skipped),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Strips the trailing slash so `http://host/` and `http://host` are the same endpoint.
pub fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim();
    trimmed.strip_suffix('/').unwrap_or(trimmed).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: i64,
    pub url: String,
}

/// A device credential belonging to exactly one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub id: i64,
    pub endpoint_id: i64,
    pub value: String,
    pub expiration: Option<NaiveDate>,
    pub status: Option<Status>,
    pub message: Option<String>,
    pub failure_count: u32,
    pub region_match: Option<bool>,
    pub category_match: Option<bool>,
}

/// Catalog category as returned by `get_genres`, with relevance labels
/// computed once from the title.
#[derive(Debug, Clone, PartialEq)]
pub struct Genre {
    pub id: FlexId,
    /// Display name as sent by the portal
    pub name: String,
    pub is_german_region: bool,
    pub is_austrian_region: bool,
    pub is_adult_category: bool,
}

impl Genre {
    pub fn new(id: FlexId, title: &str) -> Self {
        let name = title.trim().to_string();
        Self {
            is_german_region: classifier::is_german_region(&name),
            is_austrian_region: classifier::is_austrian_region(&name),
            is_adult_category: classifier::is_adult_category(&name),
            id,
            name,
        }
    }

    pub fn is_region_match(&self) -> bool {
        self.is_german_region || self.is_austrian_region
    }

    pub fn is_relevant(&self) -> bool {
        self.is_region_match() || self.is_adult_category
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: FlexId,
    pub name: String,
    /// Direct locator, or a template that needs a `create_link` round trip
    pub cmd: String,
    pub stream_url: Option<String>,
}

/// What a worker reports back for one identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: Status,
    pub message: String,
    pub region_match: Option<bool>,
    pub category_match: Option<bool>,
}

impl CheckOutcome {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            region_match: None,
            category_match: None,
        }
    }

    pub fn skipped() -> Self {
        Self::new(
            Status::Skipped,
            "Skipped: endpoint already has a working identifier",
        )
    }

    pub fn with_flags(mut self, region_match: bool, category_match: bool) -> Self {
        self.region_match = Some(region_match);
        self.category_match = Some(category_match);
        self
    }
}

/// Counts of terminal statuses, aggregated per endpoint and per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub success: usize,
    pub login: usize,
    pub error: usize,
    pub content: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: Status) {
        match status {
            Status::Success => self.success += 1,
            Status::Login => self.login += 1,
            Status::Error => self.error += 1,
            Status::Content => self.content += 1,
            Status::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusCounts) {
        self.success += other.success;
        self.login += other.login;
        self.error += other.error;
        self.content += other.content;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.success + self.login + self.error + self.content + self.skipped
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success={} login={} error={} content={} skipped={} (total {})",
            self.success,
            self.login,
            self.error,
            self.content,
            self.skipped,
            self.total()
        )
    }
}
