use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::{CheckerConfig, ProbeMode};

/// Answers "does this locator actually play?".
///
/// Implementations must return `false` for anything they cannot confirm,
/// including their own failures.
#[async_trait]
pub trait StreamProbe: Send + Sync {
    async fn is_playable(&self, url: &str) -> bool;
}

/// Content types that mean a stream is being served.
const STREAM_CONTENT_TYPES: &[&str] = &[
    "video",
    "audio",
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/octet-stream",
];

fn is_stream_content_type(content_type: &str) -> bool {
    let lower = content_type.to_lowercase();
    STREAM_CONTENT_TYPES.iter().any(|ct| lower.contains(ct))
}

/// Decodes a handful of frames with mpv, without opening a window or audio device.
#[derive(Debug, Clone)]
pub struct MpvProbe {
    binary: String,
    frames: u32,
}

impl MpvProbe {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            frames: 25,
        }
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames.max(1);
        self
    }
}

#[async_trait]
impl StreamProbe for MpvProbe {
    async fn is_playable(&self, url: &str) -> bool {
        let child = Command::new(&self.binary)
            .arg(url)
            .arg("--vo=null")
            .arg("--ao=null")
            .arg(format!("--frames={}", self.frames))
            .arg("--no-config")
            .arg("--really-quiet")
            .arg("--no-terminal")
            .arg("--network-timeout=10")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to start {}: {}", self.binary, e);
                return false;
            }
        };

        // mpv exits 0 only once the frame budget was decoded
        match child.wait().await {
            Ok(status) => {
                debug!(url, ?status, "mpv finished");
                status.success()
            }
            Err(e) => {
                debug!(url, "mpv wait failed: {}", e);
                false
            }
        }
    }
}

/// HEAD first, GET as fallback for servers without HEAD support.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    fn accepts(resp: &reqwest::Response) -> bool {
        if resp.status() != reqwest::StatusCode::OK {
            return false;
        }
        resp.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(is_stream_content_type)
            .unwrap_or(false)
    }
}

#[async_trait]
impl StreamProbe for HttpProbe {
    async fn is_playable(&self, url: &str) -> bool {
        if let Ok(resp) = self.client.head(url).send().await {
            if Self::accepts(&resp) {
                return true;
            }
        }
        // Only the headers are inspected; the body is dropped unread.
        match self.client.get(url).send().await {
            Ok(resp) => Self::accepts(&resp),
            Err(e) => {
                debug!(url, "stream GET failed: {}", e);
                false
            }
        }
    }
}

/// Bounds any probe by a deadline; running out of time counts as "not playable".
pub struct TimedProbe {
    inner: Arc<dyn StreamProbe>,
    timeout: Duration,
}

impl TimedProbe {
    pub fn new(inner: Arc<dyn StreamProbe>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl StreamProbe for TimedProbe {
    async fn is_playable(&self, url: &str) -> bool {
        match tokio::time::timeout(self.timeout, self.inner.is_playable(url)).await {
            Ok(verdict) => verdict,
            Err(_) => {
                debug!(url, "probe timed out after {}s", self.timeout.as_secs());
                false
            }
        }
    }
}

/// The probe selected by configuration, already wrapped in its timeout.
pub fn probe_from_config(config: &CheckerConfig) -> Arc<dyn StreamProbe> {
    let inner: Arc<dyn StreamProbe> = match config.probe {
        ProbeMode::Mpv => Arc::new(MpvProbe::new(config.mpv_path.clone())),
        ProbeMode::Http => Arc::new(HttpProbe::new(config.probe_timeout())),
    };
    Arc::new(TimedProbe::new(inner, config.probe_timeout()))
}
