//! Seed conversion
//!
//! Users type seeds as free text. The server turns that text into the
//! numeric seed maps are keyed by; [`local_seed`] applies the same rule
//! offline. Typing is debounced so only the last text within the idle window
//! is converted, and the result reaches the control thread over a channel
//! whenever it arrives.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Numeric seed for a piece of seed text, computed locally.
///
/// Empty text is 0, text holding a signed 64-bit integer is that integer, and
/// anything else is the Java `String.hashCode` of the text.
pub fn local_seed(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }
    parse_seed_integer(text).unwrap_or_else(|| java_string_hash(text) as i64)
}

/// Decimal integer with optional surrounding whitespace, sign and single
/// underscores between digits (`"-1_000"` is -1000)
fn parse_seed_integer(text: &str) -> Option<i64> {
    let text = text.trim();
    let digits = text.strip_prefix(&['+', '-'][..]).unwrap_or(text);

    let well_formed = !digits.is_empty()
        && !digits.starts_with('_')
        && !digits.ends_with('_')
        && !digits.contains("__")
        && digits.chars().all(|c| c.is_ascii_digit() || c == '_');
    if !well_formed {
        return None;
    }

    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    cleaned.parse::<i64>().ok()
}

/// `s[0]*31^(n-1) + ... + s[n-1]` in wrapping 32-bit arithmetic
pub fn java_string_hash(text: &str) -> i32 {
    text.chars()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32 as i32))
}

/// Errors that can occur while converting a seed
#[derive(Debug, Clone, PartialEq)]
pub enum SeedError {
    NetworkError(String),
    StatusError(u16),
    ParseError(String),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::NetworkError(e) => write!(f, "Network error: {}", e),
            SeedError::StatusError(code) => write!(f, "Server returned status {}", code),
            SeedError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for SeedError {}

/// Parse a seed endpoint body: plain text or JSON, number or numeric string
pub fn parse_seed_body(body: &str) -> Result<i64, SeedError> {
    let body = body.trim();
    if let Ok(seed) = body.parse::<i64>() {
        return Ok(seed);
    }

    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| SeedError::ParseError(format!("Seed out of range: {}", n))),
        Ok(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| SeedError::ParseError(e.to_string())),
        Ok(other) => Err(SeedError::ParseError(format!("Unexpected seed body: {}", other))),
        Err(e) => Err(SeedError::ParseError(e.to_string())),
    }
}

/// Client for the server's seed endpoint
#[derive(Clone)]
pub struct SeedClient {
    base_url: String,
    client: reqwest::Client,
}

impl SeedClient {
    pub fn new(base_url: &str) -> Result<Self, SeedError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chunk_viewer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SeedError::NetworkError(e.to_string()))?;

        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub async fn convert(&self, text: &str) -> Result<i64, SeedError> {
        let url = format!("{}/api/seed", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("seed", text)])
            .send()
            .await
            .map_err(|e| SeedError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SeedError::StatusError(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SeedError::ParseError(e.to_string()))?;
        parse_seed_body(&body)
    }
}

/// Timer-reset scheduler: each trigger replaces the previously scheduled task
pub struct Debouncer {
    window: Duration,
    runtime: Handle,
    pending: Option<AbortHandle>,
}

impl Debouncer {
    pub fn new(window: Duration, runtime: Handle) -> Self {
        Self {
            window,
            runtime,
            pending: None,
        }
    }

    /// Run `task` once the window has passed without another trigger.
    /// A task that already started is aborted as well.
    pub fn trigger<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let window = self.window;
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(window).await;
            task.await;
        });
        self.pending = Some(handle.abort_handle());
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Where numeric seeds come from
#[derive(Clone)]
pub enum SeedSource {
    Remote(SeedClient),
    Local,
}

/// A converted seed, tagged with the text it came from
#[derive(Debug, Clone, PartialEq)]
pub struct SeedUpdate {
    pub text: String,
    pub result: Result<i64, SeedError>,
}

/// Debounced seed text to numeric seed conversion
pub struct SeedInput {
    source: Arc<SeedSource>,
    debouncer: Debouncer,
    tx: mpsc::UnboundedSender<SeedUpdate>,
    rx: mpsc::UnboundedReceiver<SeedUpdate>,
}

impl SeedInput {
    pub fn new(source: SeedSource, window: Duration, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            source: Arc::new(source),
            debouncer: Debouncer::new(window, runtime),
            tx,
            rx,
        }
    }

    /// The seed text changed. Empty text is never converted.
    pub fn input(&mut self, text: &str) {
        if text.is_empty() {
            self.debouncer.cancel();
            return;
        }

        let text = text.to_string();
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        self.debouncer.trigger(async move {
            let result = match source.as_ref() {
                SeedSource::Remote(client) => client.convert(&text).await,
                SeedSource::Local => Ok(local_seed(&text)),
            };
            if let Err(e) = &result {
                log::warn!("Seed conversion for {:?} failed: {}", text, e);
            }
            let _ = tx.send(SeedUpdate { text, result });
        });
    }

    pub fn try_next(&mut self) -> Option<SeedUpdate> {
        self.rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<SeedUpdate> {
        self.rx.recv().await
    }
}
