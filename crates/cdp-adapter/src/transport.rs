use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OnceCell};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::CdpEvent;
use crate::util::extract_ws_url;
use tabwright_core_types::SessionId;

/// Where a command is delivered: the browser endpoint itself or one attached session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(SessionId),
}

impl CommandTarget {
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            CommandTarget::Browser => None,
            CommandTarget::Session(id) => Some(id),
        }
    }
}

/// Command frame as written to the wire.
#[derive(Clone, Debug, Serialize)]
pub struct OutboundCommand {
    pub id: u64,
    pub method: String,
    pub params: Value,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoteErrorPayload {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Reply to a previously issued command.
#[derive(Clone, Debug)]
pub struct CommandResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<RemoteErrorPayload>,
}

impl CommandResponse {
    pub fn into_result(self) -> Result<Value, AdapterError> {
        if let Some(err) = self.error {
            let mut error = AdapterError::remote(err.code, err.message);
            if let Some(data) = err.data {
                error = error.with_data(data);
            }
            return Err(error);
        }
        Ok(self.result.unwrap_or_else(|| json!({})))
    }
}

#[derive(Clone, Debug)]
pub enum InboundMessage {
    Response(CommandResponse),
    Event(CdpEvent),
}

#[derive(Deserialize)]
struct RawFrame {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<RemoteErrorPayload>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(rename = "sessionId")]
    session_id: Option<SessionId>,
}

impl InboundMessage {
    /// Frames carrying an `id` are replies; frames carrying only a `method` are events.
    pub fn parse(text: &str) -> Result<Self, AdapterError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|err| AdapterError::decode(format!("malformed frame: {err}")))?;
        if let Some(id) = raw.id {
            return Ok(InboundMessage::Response(CommandResponse {
                id,
                result: raw.result,
                error: raw.error,
            }));
        }
        match raw.method {
            Some(method) => Ok(InboundMessage::Event(CdpEvent {
                method,
                params: raw.params,
                session_id: raw.session_id,
            })),
            None => Err(AdapterError::decode("frame has neither id nor method")),
        }
    }
}

/// Ordered, bidirectional message channel to the browser.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn send(&self, command: OutboundCommand) -> Result<(), AdapterError>;
    /// `None` means the connection is gone for good.
    async fn next_message(&self) -> Option<InboundMessage>;
    async fn shutdown(&self) {}
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send(&self, command: OutboundCommand) -> Result<(), AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("transport not available for method {}", command.method)))
    }

    async fn next_message(&self) -> Option<InboundMessage> {
        None
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    writer: Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<SplitStream<WsStream>>,
    child: std::sync::Mutex<Option<Child>>,
}

impl Connection {
    async fn open(cfg: &CdpConfig) -> Result<Self, AdapterError> {
        cfg.validate()?;
        let (child, ws_url) = match &cfg.websocket_url {
            Some(url) => (None, url.clone()),
            None => {
                let config = browser_config(cfg)?;
                launch_browser(config, cfg.launch_timeout()).await?
            }
        };

        let (stream, _) = connect_async(ws_url.as_str()).await.map_err(|err| {
            AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("websocket connect to {ws_url} failed: {err}"))
                .retriable(true)
        })?;
        info!(target: "cdp-transport", %ws_url, launched = child.is_some(), "devtools connection established");

        let (writer, reader) = stream.split();
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            child: std::sync::Mutex::new(child),
        })
    }

    fn take_child(&self) -> Option<Child> {
        self.child.lock().ok().and_then(|mut guard| guard.take())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(mut child) = self.take_child() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(err) = child.kill().await {
                        warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                    }
                });
            } else {
                debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
            }
        }
    }
}

/// JSON-over-WebSocket transport, either to a launched browser or to `websocket_url`.
pub struct WebSocketTransport {
    cfg: CdpConfig,
    conn: OnceCell<Connection>,
}

impl WebSocketTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        Self {
            cfg,
            conn: OnceCell::new(),
        }
    }

    fn connection(&self) -> Result<&Connection, AdapterError> {
        self.conn.get().ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint("websocket transport used before start")
        })
    }
}

#[async_trait]
impl CdpTransport for WebSocketTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.conn
            .get_or_try_init(|| Connection::open(&self.cfg))
            .await?;
        Ok(())
    }

    async fn send(&self, command: OutboundCommand) -> Result<(), AdapterError> {
        let conn = self.connection()?;
        let text = serde_json::to_string(&command).map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to encode {}: {err}", command.method))
        })?;
        conn.writer
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("websocket write failed: {err}"))
            })
    }

    async fn next_message(&self) -> Option<InboundMessage> {
        let conn = self.connection().ok()?;
        let mut reader = conn.reader.lock().await;
        loop {
            match reader.next().await? {
                Ok(Message::Text(text)) => match InboundMessage::parse(&text) {
                    Ok(message) => return Some(message),
                    Err(err) => {
                        warn!(target: "cdp-transport", %err, "dropping undecodable frame");
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(target: "cdp-transport", ?frame, "websocket closed by peer");
                    return None;
                }
                Ok(_) => continue,
                Err(err) => {
                    warn!(target: "cdp-transport", %err, "websocket read failed");
                    return None;
                }
            }
        }
    }

    async fn shutdown(&self) {
        let Ok(conn) = self.connection() else {
            return;
        };
        if let Err(err) = conn.writer.lock().await.close().await {
            debug!(target: "cdp-transport", %err, "websocket close failed");
        }
        if let Some(mut child) = conn.take_child() {
            if let Err(err) = child.kill().await {
                warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
            }
        }
    }
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!(
                "chrome executable not found at {}",
                cfg.executable.display()
            ))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set TABWRIGHT_CHROME to the full path of chrome/chromium."
            })));
    }

    let profile_dir = resolve_profile_dir(&cfg.user_data_dir)?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(cfg.navigation_timeout())
        .launch_timeout(cfg.launch_timeout());

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("TABWRIGHT_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    let mut args = vec![
        "--disable-background-networking",
        "--disable-breakpad",
        "--disable-default-apps",
        "--disable-dev-shm-usage",
        "--disable-extensions",
        "--disable-popup-blocking",
        "--disable-sync",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--hide-scrollbars");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("browser config error: {err}"))
    })
}

fn resolve_profile_dir(raw: &Path) -> Result<PathBuf, AdapterError> {
    let profile_dir = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
        })?;
        cwd.join(raw)
    };
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;
    Ok(profile_dir)
}

async fn launch_browser(
    config: BrowserConfig,
    wait: Duration,
) -> Result<(Option<Child>, String), AdapterError> {
    let mut child = config.launch().map_err(|err| {
        AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child, wait)
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

    Ok((Some(child), ws_url))
}
