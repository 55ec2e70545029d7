//! Chromium DevTools Protocol client.
//!
//! A single connection carries browser-level commands and any number of flattened
//! sessions. The [`dispatcher::Dispatcher`] owns request/reply correlation and fans
//! events out on a topic-keyed bus; [`session::Session`] layers navigation, frame
//! tracking, tab management, element queries, evaluation and screenshots on top.

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the client.
    #[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
    pub enum AdapterErrorKind {
        /// The browser answered a command with an error object.
        #[error("remote error {code}: {message}")]
        Remote { code: i64, message: String },
        #[error("session closed")]
        SessionClosed,
        #[error("connection lost")]
        ConnectionLost,
        #[error("element not found")]
        NotFound,
        #[error("element not visible")]
        Invisible,
        #[error("navigation timed out")]
        NavigateTimeout,
        #[error("timed out")]
        Timeout,
        #[error("navigation failed: {0}")]
        Navigation(String),
        #[error("payload decode failure")]
        Decode,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to callers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct AdapterError {
        pub kind: AdapterErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for AdapterError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for AdapterError {}

    impl AdapterError {
        pub fn new(kind: AdapterErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }

        pub fn remote(code: i64, message: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::Remote {
                code,
                message: message.into(),
            })
        }

        pub fn session_closed() -> Self {
            Self::new(AdapterErrorKind::SessionClosed)
        }

        pub fn connection_lost() -> Self {
            Self::new(AdapterErrorKind::ConnectionLost)
        }

        /// Missing elements are expected while a page is still rendering.
        pub fn not_found(hint: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::NotFound)
                .with_hint(hint)
                .retriable(true)
        }

        pub fn invisible(hint: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::Invisible)
                .with_hint(hint)
                .retriable(true)
        }

        pub fn decode(hint: impl Into<String>) -> Self {
            Self::new(AdapterErrorKind::Decode).with_hint(hint)
        }

        pub fn kind(&self) -> &AdapterErrorKind {
            &self.kind
        }

        pub fn is_session_closed(&self) -> bool {
            matches!(self.kind, AdapterErrorKind::SessionClosed)
        }
    }
}

pub mod events {
    use serde::{Deserialize, Serialize};
    use serde_json::Value;
    use tabwright_core_types::SessionId;
    use tabwright_event_bus::{Event, EventBus, Subscription};

    /// Unsolicited protocol message, routed by method name and originating session.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct CdpEvent {
        pub method: String,
        #[serde(default)]
        pub params: Value,
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        pub session_id: Option<SessionId>,
    }

    impl CdpEvent {
        pub fn new(method: impl Into<String>, params: Value) -> Self {
            Self {
                method: method.into(),
                params,
                session_id: None,
            }
        }

        pub fn for_session(mut self, session: &SessionId) -> Self {
            self.session_id = Some(session.clone());
            self
        }
    }

    impl Event for CdpEvent {
        fn topic(&self) -> &str {
            &self.method
        }

        fn scope(&self) -> Option<&str> {
            self.session_id.as_ref().map(|id| id.as_str())
        }
    }

    pub type CdpEventBus = EventBus<CdpEvent>;
    pub type EventSubscription = Subscription<CdpEvent>;

    /// Protocol event names the client reacts to.
    pub mod methods {
        pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";
        pub const FRAME_ATTACHED: &str = "Page.frameAttached";
        pub const FRAME_DETACHED: &str = "Page.frameDetached";
        pub const CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
        pub const CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";
        pub const CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";
        pub const TARGET_CREATED: &str = "Target.targetCreated";
        pub const TARGET_DESTROYED: &str = "Target.targetDestroyed";
        pub const DETACHED_FROM_TARGET: &str = "Target.detachedFromTarget";
    }
}

pub mod config {
    use crate::error::{AdapterError, AdapterErrorKind};
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
        time::Duration,
    };
    use url::Url;
    use which::which;

    #[cfg(windows)]
    const CHROME_BINARIES: &[&str] = &["chrome.exe", "chromium.exe", "msedge.exe"];
    #[cfg(not(windows))]
    const CHROME_BINARIES: &[&str] = &[
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
    ];

    /// Configuration for launching the browser and tuning client timeouts.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(default)]
    pub struct CdpConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        /// Attach to an already running browser instead of launching one.
        pub websocket_url: Option<String>,
        pub navigation_timeout_ms: u64,
        /// Budget for `find_ready` polling.
        pub implicit_wait_ms: u64,
        pub poll_interval_ms: u64,
        pub launch_timeout_ms: u64,
    }

    impl Default for CdpConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                websocket_url: None,
                navigation_timeout_ms: 30_000,
                implicit_wait_ms: 10_000,
                poll_interval_ms: 100,
                launch_timeout_ms: 20_000,
            }
        }
    }

    impl CdpConfig {
        pub fn navigation_timeout(&self) -> Duration {
            Duration::from_millis(self.navigation_timeout_ms)
        }

        pub fn implicit_wait(&self) -> Duration {
            Duration::from_millis(self.implicit_wait_ms)
        }

        pub fn poll_interval(&self) -> Duration {
            Duration::from_millis(self.poll_interval_ms.max(1))
        }

        pub fn launch_timeout(&self) -> Duration {
            Duration::from_millis(self.launch_timeout_ms)
        }

        /// First Chrome binary found: `TABWRIGHT_CHROME`, then `PATH`, then the
        /// usual install locations unless `TABWRIGHT_SKIP_OS_PATHS` is set.
        pub fn locate_chrome() -> Option<PathBuf> {
            let explicit = env::var("TABWRIGHT_CHROME")
                .ok()
                .map(|raw| PathBuf::from(raw.trim()))
                .filter(|path| path.is_file());
            let on_path = CHROME_BINARIES.iter().filter_map(|name| which(name).ok());
            let installed = env_flag("TABWRIGHT_SKIP_OS_PATHS")
                .then(Vec::new)
                .unwrap_or_else(install_locations)
                .into_iter()
                .filter(|path| path.is_file());

            explicit.into_iter().chain(on_path).chain(installed).next()
        }

        /// Rejects endpoints that cannot carry a DevTools connection.
        pub fn validate(&self) -> Result<(), AdapterError> {
            if let Some(raw) = &self.websocket_url {
                let parsed = Url::parse(raw).map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint(format!("invalid websocket url {raw}: {err}"))
                })?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(AdapterError::new(AdapterErrorKind::Internal)
                        .with_hint(format!("websocket url must use ws:// or wss://, got {raw}")));
                }
            }
            Ok(())
        }
    }

    fn resolve_headless_default() -> bool {
        match env::var("TABWRIGHT_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn env_flag(key: &str) -> bool {
        env::var(key).map_or(false, |value| !value.trim().is_empty())
    }

    #[cfg(windows)]
    fn install_locations() -> Vec<PathBuf> {
        ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .into_iter()
            .filter_map(|key| env::var(key).ok())
            .flat_map(|root| {
                let root = PathBuf::from(root.trim());
                [
                    root.join("Google/Chrome/Application/chrome.exe"),
                    root.join("Chromium/Application/chrome.exe"),
                ]
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    fn install_locations() -> Vec<PathBuf> {
        [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
        .into_iter()
        .map(PathBuf::from)
        .collect()
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn install_locations() -> Vec<PathBuf> {
        CHROME_BINARIES
            .iter()
            .map(|name| Path::new("/usr/bin").join(name))
            .collect()
    }

    /// Empty when nothing is installed; launch then reports the missing binary.
    fn default_chrome_path() -> PathBuf {
        CdpConfig::locate_chrome().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("TABWRIGHT_CHROME_PROFILE") {
            return PathBuf::from(path);
        }

        Path::new("./.tabwright-profile").into()
    }
}

pub mod client;
pub mod commands;
pub mod dispatcher;
pub mod element;
pub mod metrics;
pub mod navigation;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod tabs;
pub mod transport;
pub mod util;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use client::CdpClient;
pub use commands::{ScreenshotFormat, ScreenshotOptions, Viewport};
pub use config::CdpConfig;
pub use dispatcher::Dispatcher;
pub use element::Element;
pub use error::{AdapterError, AdapterErrorKind};
pub use events::{CdpEvent, CdpEventBus, EventSubscription};
pub use metrics::AdapterMetricsSnapshot;
pub use navigation::NavigationPhase;
pub use protocol::{NavigationEntry, TargetInfo};
pub use session::Session;
pub use tabwright_core_types::{ExecutionContextId, FrameId, RemoteObjectId, SessionId, TargetId};
pub use tabwright_event_bus::{Listener, WatchOnce, WatchState};
pub use transport::{
    CdpTransport, CommandTarget, InboundMessage, NoopTransport, OutboundCommand,
    WebSocketTransport,
};
pub use wait::Ticker;
