//! Wire protocol of the portal middleware.
//!
//! Every call is a plain GET against `<base>/portal.php` with `type`/`action`
//! query parameters; every response is JSON with its payload nested under `js`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::errors::PortalError;
use crate::flex_id::{deserialize_flex_u64, FlexId};

pub const PORTAL_PATH: &str = "/portal.php";

/// Fingerprint of a MAG200 receiver, the model most portals accept.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (QtEmbedded; U; Linux; C) \
     AppleWebKit/533.3 (KHTML, like Gecko) MAG200 stbapp ver: 2 rev: 250 Safari/533.3";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Handshake,
    GetProfile,
    GetMainInfo,
    GetGenres,
    GetOrderedList,
    CreateLink,
}

impl Action {
    /// Value of the `type` query parameter.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Handshake | Action::GetProfile => "stb",
            Action::GetMainInfo => "account_info",
            Action::GetGenres | Action::GetOrderedList | Action::CreateLink => "itv",
        }
    }

    /// Value of the `action` query parameter.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Handshake => "handshake",
            Action::GetProfile => "get_profile",
            Action::GetMainInfo => "get_main_info",
            Action::GetGenres => "get_genres",
            Action::GetOrderedList => "get_ordered_list",
            Action::CreateLink => "create_link",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortalRequest {
    pub base_url: String,
    pub action: Action,
    pub params: Vec<(&'static str, String)>,
    pub headers: Vec<(&'static str, String)>,
    pub timeout: Duration,
}

impl PortalRequest {
    pub fn new(base_url: &str, action: Action, timeout: Duration) -> Self {
        Self {
            base_url: base_url.to_string(),
            action,
            params: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    pub fn param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.push((key, value.into()));
        self
    }

    pub fn header(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((key, value.into()));
        self
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url, PORTAL_PATH)
    }

    /// Full query string parameters, in the order the receiver sends them.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("type", self.action.kind().to_string()),
            ("action", self.action.name().to_string()),
        ];
        query.extend(self.params.iter().cloned());
        query.push(("JsHttpRequest", "1-xml".to_string()));
        query
    }

    pub fn param_value(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_value(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one portal request and returns the decoded JSON body.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, request: &PortalRequest) -> Result<Value, PortalError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Transport resolving portal hosts through hickory instead of the system resolver
    pub fn new_with_hickory() -> Result<Self, anyhow::Error> {
        use reqwest_hickory_resolver::HickoryResolver;
        use std::sync::Arc;

        let resolver = HickoryResolver::default();
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .dns_resolver(Arc::new(resolver))
            .build()?;
        Ok(Self { client })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(&self, request: &PortalRequest) -> Result<Value, PortalError> {
        let host = request.base_url.clone();
        let secs = request.timeout.as_secs();

        let mut builder = self
            .client
            .get(request.url())
            .query(&request.query())
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(*key, value.as_str());
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| PortalError::from_reqwest(&e, &host, secs))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PortalError::ServerError(
                status.as_u16(),
                status.canonical_reason().unwrap_or("").to_string(),
            ));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| PortalError::from_reqwest(&e, &host, secs))?;
        serde_json::from_str(&body).map_err(|e| PortalError::ParseError(e.to_string()))
    }
}

/// Unwraps the `js` envelope every portal response carries.
pub fn payload(mut body: Value) -> Result<Value, PortalError> {
    match body.get_mut("js") {
        Some(js) => Ok(js.take()),
        None => Err(PortalError::ParseError(
            "response has no 'js' payload".to_string(),
        )),
    }
}

pub fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, PortalError> {
    serde_json::from_value(value).map_err(|e| PortalError::ParseError(e.to_string()))
}

/// True for `{}`, `[]`, `null` and `""` payloads, which portals use for "nothing here".
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
pub struct HandshakePayload {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenreEntry {
    #[serde(default)]
    pub id: FlexId,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrderedListPage {
    #[serde(default, deserialize_with = "deserialize_flex_u64")]
    pub total_items: u64,
    #[serde(default, deserialize_with = "deserialize_flex_u64")]
    pub max_page_items: u64,
    #[serde(default)]
    pub data: Option<Vec<ChannelEntry>>,
}

impl OrderedListPage {
    /// Page size as announced by the portal, falling back to the size of this page.
    pub fn page_size(&self) -> u64 {
        if self.max_page_items > 0 {
            self.max_page_items
        } else {
            self.data.as_ref().map(|d| d.len() as u64).unwrap_or(0)
        }
    }

    /// Number of pages implied by `total_items`; a zero page size means one page.
    pub fn total_pages(&self) -> u64 {
        let size = self.page_size();
        if size == 0 {
            1
        } else {
            (self.total_items + size - 1) / size
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelEntry {
    #[serde(default)]
    pub id: FlexId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateLinkPayload {
    #[serde(default)]
    pub cmd: Option<String>,
}
