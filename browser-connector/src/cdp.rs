//! Chrome DevTools Protocol (CDP) renderer for Chromium-based browsers
//!
//! Every rendered page gets its own target created through the DevTools HTTP
//! endpoints (`/json/new`, `/json/close/<id>`). The target is driven over its
//! WebSocket: navigate, wait for the load event plus a short settle delay,
//! then read back the post-script markup and title with `Runtime.evaluate`.

use crate::traits::{PageRenderer, RenderSession, RenderedPage};
use site_archiver_core::*;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type CdpSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// CDP target information returned by the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpTarget {
    pub id: String,
    #[serde(rename = "type", default)]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
}

/// CDP browser version information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpVersion {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
    #[serde(rename = "User-Agent", default)]
    pub user_agent: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: Option<String>,
}

/// CDP command message
#[derive(Debug, Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: serde_json::Value,
}

/// CDP message: either a response (`id`) or an event (`method`)
#[derive(Debug, Deserialize)]
struct CdpResponse {
    id: Option<u64>,
    result: Option<serde_json::Value>,
    error: Option<CdpError>,
    method: Option<String>,
}

/// CDP error information
#[derive(Debug, Deserialize)]
struct CdpError {
    code: i64,
    message: String,
}

/// Connection settings for a DevTools endpoint
#[derive(Debug, Clone)]
pub struct CdpConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for rendering one page
    pub page_timeout: Duration,
    /// Extra wait after the load event for late network activity
    pub settle_delay: Duration,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9222,
            page_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl CdpConfig {
    fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Renderer that drives a running Chrome/Chromium over CDP
pub struct CdpRenderer {
    config: CdpConfig,
    client: reqwest::Client,
}

impl CdpRenderer {
    pub fn new(config: CdpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ArchiverError::configuration(format!("Failed to build CDP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Query `/json/version`, failing when no browser listens on the endpoint
    pub async fn version(&self) -> Result<CdpVersion> {
        let endpoint = self.config.endpoint();
        let url = format!("{}/json/version", endpoint);

        let response = self.client.get(&url).send().await.map_err(|_| {
            FetchError::BrowserUnavailable { endpoint: endpoint.clone() }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::BrowserUnavailable { endpoint }.into());
        }

        response.json::<CdpVersion>().await.map_err(|e| {
            FetchError::InvalidResponse {
                endpoint: url,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl PageRenderer for CdpRenderer {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>> {
        let version = self.version().await?;
        tracing::info!("Opened render session on {} ({})", self.config.endpoint(), version.browser);

        Ok(Box::new(CdpSession {
            config: self.config.clone(),
            client: self.client.clone(),
            open_targets: Arc::new(Mutex::new(HashSet::new())),
        }))
    }
}

/// One crawl's worth of browser targets
pub struct CdpSession {
    config: CdpConfig,
    client: reqwest::Client,
    open_targets: Arc<Mutex<HashSet<String>>>,
}

impl CdpSession {
    async fn new_target(&self) -> Result<CdpTarget> {
        let url = format!(
            "{}/json/new?{}",
            self.config.endpoint(),
            urlencoding::encode("about:blank")
        );

        let response = self.client.put(&url).send().await.map_err(|_| {
            FetchError::BrowserUnavailable { endpoint: self.config.endpoint() }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::InvalidResponse {
                endpoint: url,
                reason: format!("status {}", response.status()),
            }
            .into());
        }

        let target: CdpTarget = response.json().await.map_err(|e| FetchError::InvalidResponse {
            endpoint: url.clone(),
            reason: e.to_string(),
        })?;

        self.open_targets.lock().await.insert(target.id.clone());
        Ok(target)
    }

    async fn close_target(&self, target_id: &str) {
        let url = format!("{}/json/close/{}", self.config.endpoint(), target_id);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => tracing::warn!("Closing target {} returned {}", target_id, response.status()),
            Err(e) => tracing::warn!("Failed to close target {}: {}", target_id, e),
        }
        self.open_targets.lock().await.remove(target_id);
    }

    async fn drive(&self, target: &CdpTarget, url: &str) -> Result<RenderedPage> {
        let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
            FetchError::InvalidResponse {
                endpoint: self.config.endpoint(),
                reason: format!("target {} has no debugger URL", target.id),
            }
        })?;

        let (socket, _) = connect_async(ws_url.as_str()).await.map_err(|e| FetchError::Navigation {
            url: url.to_string(),
            reason: format!("DevTools socket: {}", e),
        })?;

        let mut channel = CdpChannel::new(socket, url);
        channel.call("Page.enable", serde_json::json!({})).await?;

        let navigation = channel.call("Page.navigate", serde_json::json!({ "url": url })).await?;
        if let Some(reason) = navigation.get("errorText").and_then(|v| v.as_str()) {
            return Err(FetchError::Navigation {
                url: url.to_string(),
                reason: reason.to_string(),
            }
            .into());
        }

        channel.wait_for_event("Page.loadEventFired").await?;
        tokio::time::sleep(self.config.settle_delay).await;

        let html = channel
            .evaluate("document.documentElement.outerHTML")
            .await?
            .unwrap_or_default();
        let title = channel
            .evaluate("document.title")
            .await?
            .filter(|t| !t.trim().is_empty());

        channel.close().await;

        Ok(RenderedPage {
            url: url.to_string(),
            html,
            title,
        })
    }
}

#[async_trait]
impl RenderSession for CdpSession {
    async fn render(&self, url: &str) -> Result<RenderedPage> {
        tracing::debug!("Rendering {}", url);
        let target = self.new_target().await?;

        let outcome = tokio::time::timeout(self.config.page_timeout, self.drive(&target, url)).await;
        self.close_target(&target.id).await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
                timeout_ms: self.config.page_timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn close(&self) -> Result<()> {
        let leftover: Vec<String> = self.open_targets.lock().await.drain().collect();
        for target_id in leftover {
            self.close_target(&target_id).await;
        }
        tracing::debug!("Closed render session on {}", self.config.endpoint());
        Ok(())
    }
}

/// Request/response channel over one target's DevTools socket
struct CdpChannel {
    socket: CdpSocket,
    next_id: u64,
    /// Events received while waiting for a command response
    events: Vec<String>,
    url: String,
}

impl CdpChannel {
    fn new(socket: CdpSocket, url: &str) -> Self {
        Self {
            socket,
            next_id: 0,
            events: Vec::new(),
            url: url.to_string(),
        }
    }

    fn socket_error(&self, reason: impl std::fmt::Display) -> ArchiverError {
        FetchError::Navigation {
            url: self.url.clone(),
            reason: format!("DevTools socket: {}", reason),
        }
        .into()
    }

    async fn next_message(&mut self) -> Result<CdpResponse> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(&text).map_err(|e| self.socket_error(e));
                }
                Some(Ok(Message::Close(_))) | None => return Err(self.socket_error("closed")),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(self.socket_error(e)),
            }
        }
    }

    async fn call(&mut self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        self.next_id += 1;
        let id = self.next_id;

        let command = CdpCommand {
            id,
            method: method.to_string(),
            params,
        };
        let text = serde_json::to_string(&command).map_err(SystemError::from)?;

        if let Err(e) = self.socket.send(Message::Text(text)).await {
            return Err(self.socket_error(e));
        }

        loop {
            let message = self.next_message().await?;
            if message.id == Some(id) {
                if let Some(error) = message.error {
                    return Err(self.socket_error(format!(
                        "{} failed ({}): {}",
                        method, error.code, error.message
                    )));
                }
                return Ok(message.result.unwrap_or(serde_json::Value::Null));
            }
            if let Some(event) = message.method {
                self.events.push(event);
            }
        }
    }

    async fn wait_for_event(&mut self, name: &str) -> Result<()> {
        if let Some(pos) = self.events.iter().position(|e| e == name) {
            self.events.remove(pos);
            return Ok(());
        }

        loop {
            let message = self.next_message().await?;
            if message.method.as_deref() == Some(name) {
                return Ok(());
            }
        }
    }

    /// Evaluate an expression that yields a string
    async fn evaluate(&mut self, expression: &str) -> Result<Option<String>> {
        let result = self
            .call(
                "Runtime.evaluate",
                serde_json::json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.socket.close(None).await;
    }
}
