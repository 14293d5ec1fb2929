//! One authenticated conversation with one portal for one identifier.
//!
//! `Unauthenticated -> Authenticated -> (token older than 10 min) -> re-handshake`.
//! There is no logout; a session is dropped at the end of its attempt and is
//! never shared between tasks.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::api::{
    self, Action, ChannelEntry, CreateLinkPayload, GenreEntry, HandshakePayload, OrderedListPage,
    PortalRequest, Transport,
};
use crate::config::{CheckerConfig, DeviceProfile};
use crate::errors::PortalError;
use crate::model::{normalize_endpoint, Channel, Genre};

/// Portals drop tokens after ten minutes.
pub const TOKEN_TTL: Duration = Duration::from_secs(600);

/// Pages fetched per genre before a portal's listing is rejected as implausible.
pub const DEFAULT_MAX_PAGES: u64 = 50;

/// Command prefixes some portals put in front of the locator.
const KNOWN_PREFIXES: &[&str] = &["ffmpeg ", "ffrt3 "];

/// Catalog access under one identifier.
#[async_trait]
pub trait Portal: Send {
    async fn login(&mut self) -> Result<(), PortalError>;
    async fn list_genres(&mut self) -> Result<Vec<Genre>, PortalError>;
    async fn list_channels(&mut self, genre: &Genre) -> Result<Vec<Channel>, PortalError>;
    /// Turns a channel command into a stream locator and stores it on the channel.
    async fn resolve_stream(&mut self, channel: &mut Channel) -> Result<String, PortalError>;
}

/// Opens a fresh [`Portal`] per validation attempt.
pub trait PortalFactory: Send + Sync {
    fn open(&self, endpoint: &str, identifier: &str) -> Box<dyn Portal>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestTimeouts {
    pub handshake: Duration,
    pub request: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(15),
            request: Duration::from_secs(10),
        }
    }
}

/// Scheme + host + port of an endpoint; paths like `/c/` are dropped.
pub fn portal_base_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };
    match reqwest::Url::parse(&with_scheme) {
        Ok(url) if url.has_host() => url.origin().ascii_serialization(),
        _ => normalize_endpoint(&with_scheme),
    }
}

pub fn strip_known_prefix(cmd: &str) -> String {
    let mut locator = cmd.trim();
    for prefix in KNOWN_PREFIXES {
        let head = locator.get(..prefix.len());
        if head.map(|h| h.eq_ignore_ascii_case(prefix)).unwrap_or(false) {
            locator = locator[prefix.len()..].trim();
        }
    }
    locator.to_string()
}

/// `.../ch/1234_` style commands only become playable through `create_link`.
pub fn needs_create_link(cmd: &str) -> bool {
    cmd.contains("/ch/") && cmd.ends_with('_')
}

pub struct PortalSession {
    transport: Arc<dyn Transport>,
    base_url: String,
    identifier: String,
    device: DeviceProfile,
    timezone: String,
    timeouts: RequestTimeouts,
    max_pages: u64,
    token: Option<String>,
    token_acquired: Option<Instant>,
}

impl PortalSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoint: &str,
        identifier: &str,
        device: DeviceProfile,
        timeouts: RequestTimeouts,
    ) -> Self {
        let timezone = device.timezone();
        Self {
            transport,
            base_url: portal_base_url(endpoint),
            identifier: identifier.trim().to_string(),
            device,
            timezone,
            timeouts,
            max_pages: DEFAULT_MAX_PAGES,
            token: None,
            token_acquired: None,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn token_is_valid(&self) -> bool {
        match (&self.token, self.token_acquired) {
            (Some(_), Some(at)) => at.elapsed() < TOKEN_TTL,
            _ => false,
        }
    }

    fn cookie(&self, token: Option<&str>) -> String {
        let mut cookie = format!(
            "mac={}; stb_lang={}; timezone={}",
            self.identifier, self.device.language, self.timezone
        );
        if let Some(token) = token {
            cookie.push_str("; token=");
            cookie.push_str(token);
        }
        cookie
    }

    fn request(&self, action: Action, token: Option<&str>) -> PortalRequest {
        let timeout = if action == Action::Handshake {
            self.timeouts.handshake
        } else {
            self.timeouts.request
        };
        let mut req = PortalRequest::new(&self.base_url, action, timeout)
            .header("User-Agent", self.device.user_agent.clone())
            .header("Cookie", self.cookie(token));
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn handshake(&mut self) -> Result<String, PortalError> {
        debug!(portal = %self.base_url, identifier = %self.identifier, "handshake");
        let req = self.request(Action::Handshake, None);
        let body = self
            .transport
            .get_json(&req)
            .await
            .map_err(PortalError::into_login_failure)?;
        let js = api::payload(body).map_err(PortalError::into_login_failure)?;
        let handshake: HandshakePayload =
            serde_json::from_value(js).unwrap_or(HandshakePayload { token: None });

        match handshake.token.filter(|t| !t.trim().is_empty()) {
            Some(token) => {
                self.token = Some(token.clone());
                self.token_acquired = Some(Instant::now());
                Ok(token)
            }
            None => Err(PortalError::AuthenticationFailed(
                "Token not found in handshake response".to_string(),
            )),
        }
    }

    /// Cached token while younger than [`TOKEN_TTL`], otherwise a new handshake.
    pub async fn validate_token(&mut self) -> Result<String, PortalError> {
        if self.token_is_valid() {
            if let Some(token) = &self.token {
                return Ok(token.clone());
            }
        }
        self.handshake().await
    }

    async fn authorized_get(
        &mut self,
        action: Action,
        params: Vec<(&'static str, String)>,
    ) -> Result<Value, PortalError> {
        let token = self
            .validate_token()
            .await
            .map_err(PortalError::into_renewal_failure)?;
        let mut req = self.request(action, Some(&token));
        req.params = params;
        let body = self.transport.get_json(&req).await?;
        api::payload(body)
    }

    async fn fetch_page(&mut self, genre: &Genre, page: u64) -> Result<Value, PortalError> {
        debug!(portal = %self.base_url, genre = %genre.name, page, "get_ordered_list");
        self.authorized_get(
            Action::GetOrderedList,
            vec![("genre", genre.id.to_string()), ("p", page.to_string())],
        )
        .await
    }
}

/// Merges pages, keeps the first entry per catalog id, sorts by display name.
pub fn merge_channel_pages(entries: Vec<ChannelEntry>) -> Vec<Channel> {
    let mut seen = HashSet::new();
    let mut channels: Vec<Channel> = entries
        .into_iter()
        .filter(|entry| entry.id.is_present())
        .filter(|entry| seen.insert(entry.id.clone()))
        .map(|entry| Channel {
            id: entry.id,
            name: entry.name.unwrap_or_default(),
            cmd: entry.cmd.unwrap_or_default(),
            stream_url: None,
        })
        .collect();
    channels.sort_by(|a, b| a.name.cmp(&b.name));
    channels
}

#[async_trait]
impl Portal for PortalSession {
    async fn login(&mut self) -> Result<(), PortalError> {
        self.handshake().await?;

        // Real receivers fetch both right after the handshake; some portals
        // refuse catalog calls from clients that skip them.
        self.authorized_get(Action::GetProfile, Vec::new()).await?;
        self.authorized_get(Action::GetMainInfo, Vec::new()).await?;
        debug!(portal = %self.base_url, identifier = %self.identifier, "logged in");
        Ok(())
    }

    async fn list_genres(&mut self) -> Result<Vec<Genre>, PortalError> {
        let js = self.authorized_get(Action::GetGenres, Vec::new()).await?;
        if !js.is_array() && !api::is_empty_payload(&js) {
            return Err(PortalError::ParseError(
                "genre payload is not a list".to_string(),
            ));
        }
        let entries: Vec<GenreEntry> = if js.is_array() { api::decode(js)? } else { Vec::new() };
        if entries.is_empty() {
            return Err(PortalError::EmptyCatalog(
                "Portal returned no genres".to_string(),
            ));
        }
        Ok(entries
            .into_iter()
            .map(|entry| Genre::new(entry.id, entry.title.as_deref().unwrap_or_default()))
            .collect())
    }

    async fn list_channels(&mut self, genre: &Genre) -> Result<Vec<Channel>, PortalError> {
        let first = self.fetch_page(genre, 0).await?;
        if api::is_empty_payload(&first) {
            return Ok(Vec::new());
        }
        let first: OrderedListPage = api::decode(first)?;
        let total_pages = first.total_pages();
        if total_pages > self.max_pages {
            return Err(PortalError::ParseError(format!(
                "genre '{}' claims {} pages, limit is {}",
                genre.name, total_pages, self.max_pages
            )));
        }
        let mut entries = first.data.unwrap_or_default();

        for page in 1..total_pages {
            let js = self.fetch_page(genre, page).await?;
            if api::is_empty_payload(&js) {
                continue;
            }
            let next: OrderedListPage = api::decode(js)?;
            entries.extend(next.data.unwrap_or_default());
        }

        Ok(merge_channel_pages(entries))
    }

    async fn resolve_stream(&mut self, channel: &mut Channel) -> Result<String, PortalError> {
        let cmd = channel.cmd.trim().to_string();
        if cmd.is_empty() {
            return Err(PortalError::MissingLocator(format!(
                "channel '{}' has no command",
                channel.name
            )));
        }

        let locator = if needs_create_link(&cmd) {
            debug!(portal = %self.base_url, channel = %channel.name, "create_link");
            let js = self
                .authorized_get(Action::CreateLink, vec![("cmd", cmd.clone())])
                .await?;
            let link: CreateLinkPayload = api::decode(js)?;
            match link.cmd.map(|c| strip_known_prefix(&c)).filter(|c| !c.is_empty()) {
                Some(locator) => locator,
                None => {
                    return Err(PortalError::MissingLocator(format!(
                        "no stream URL returned for channel '{}'",
                        channel.name
                    )))
                }
            }
        } else {
            strip_known_prefix(&cmd)
        };

        channel.stream_url = Some(locator.clone());
        Ok(locator)
    }
}

/// Builds HTTP-backed sessions sharing one connection pool.
pub struct HttpPortalFactory {
    transport: Arc<dyn Transport>,
    device: DeviceProfile,
    timeouts: RequestTimeouts,
    max_pages: u64,
}

impl HttpPortalFactory {
    pub fn new(transport: Arc<dyn Transport>, device: DeviceProfile, timeouts: RequestTimeouts) -> Self {
        Self {
            transport,
            device,
            timeouts,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &CheckerConfig) -> Self {
        Self::new(
            transport,
            config.device.clone(),
            RequestTimeouts {
                handshake: config.handshake_timeout(),
                request: config.request_timeout(),
            },
        )
        .with_max_pages(config.max_pages_per_genre)
    }

    pub fn with_max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }
}

impl PortalFactory for HttpPortalFactory {
    fn open(&self, endpoint: &str, identifier: &str) -> Box<dyn Portal> {
        Box::new(PortalSession::new(
            self.transport.clone(),
            endpoint,
            identifier,
            self.device.clone(),
            self.timeouts,
        )
        .with_max_pages(self.max_pages))
    }
}
