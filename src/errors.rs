use thiserror::Error;

use crate::model::Status;

/// Connection stage a transport failure happened at
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStage {
    DnsResolution,
    TcpConnection,
    TlsHandshake,
    HttpRequest,
    ResponseParsing,
}

impl std::fmt::Display for ConnectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl ConnectionStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionStage::DnsResolution => "DNS Resolution",
            ConnectionStage::TcpConnection => "TCP Connection",
            ConnectionStage::TlsHandshake => "TLS Handshake",
            ConnectionStage::HttpRequest => "HTTP Request",
            ConnectionStage::ResponseParsing => "Response Parsing",
        }
    }
}

/// Everything that can go wrong while talking to a portal.
///
/// Each variant maps onto one persisted [`Status`] through [`PortalError::status`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortalError {
    /// Handshake did not yield a token, or the handshake request itself failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {1}s to {0}")]
    ConnectionTimeout(String, u64),

    /// Connection failed
    #[error("Connection failed at {0}: {1}")]
    ConnectionFailed(ConnectionStage, String),

    /// Server returned a non-2xx status
    #[error("Server returned {0}: {1}")]
    ServerError(u16, String),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Authenticated, but the catalog has nothing to offer
    #[error("Empty catalog: {0}")]
    EmptyCatalog(String),

    /// Token expired mid-session and the renewal handshake failed
    #[error("Token renewal failed: {0}")]
    RenewalFailed(String),

    /// A link could not be turned into a playable locator
    #[error("No stream locator: {0}")]
    MissingLocator(String),
}

impl PortalError {
    pub fn status(&self) -> Status {
        match self {
            PortalError::AuthenticationFailed(_) => Status::Login,
            PortalError::EmptyCatalog(_) => Status::Content,
            PortalError::ConnectionTimeout(..)
            | PortalError::ConnectionFailed(..)
            | PortalError::ServerError(..)
            | PortalError::ParseError(_)
            | PortalError::RenewalFailed(_)
            | PortalError::MissingLocator(_) => Status::Error,
        }
    }

    /// Re-labels a failure that happened during the handshake as a login failure.
    pub fn into_login_failure(self) -> PortalError {
        match self {
            PortalError::AuthenticationFailed(_) => self,
            other => PortalError::AuthenticationFailed(other.to_string()),
        }
    }

    /// A failed handshake outside `login` follows the failing call, not the login contract.
    pub fn into_renewal_failure(self) -> PortalError {
        match self {
            PortalError::AuthenticationFailed(msg) => PortalError::RenewalFailed(msg),
            other => other,
        }
    }

    pub fn from_reqwest(err: &reqwest::Error, host: &str, timeout_secs: u64) -> PortalError {
        if err.is_timeout() {
            return PortalError::ConnectionTimeout(host.to_string(), timeout_secs);
        }
        if let Some(status) = err.status() {
            return PortalError::ServerError(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return PortalError::ParseError(err.to_string());
        }
        let stage = if err.is_connect() {
            classify_connect_error(&format!("{:?}", err))
        } else {
            ConnectionStage::HttpRequest
        };
        PortalError::ConnectionFailed(stage, err.to_string())
    }
}

fn classify_connect_error(debug: &str) -> ConnectionStage {
    let lower = debug.to_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("lookup") {
        ConnectionStage::DnsResolution
    } else if lower.contains("tls") || lower.contains("certificate") || lower.contains("ssl") {
        ConnectionStage::TlsHandshake
    } else {
        ConnectionStage::TcpConnection
    }
}
