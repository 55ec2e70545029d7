use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::CdpConfig;
use crate::dispatcher::Dispatcher;
use crate::error::AdapterError;
use crate::events::{methods, CdpEvent, CdpEventBus, EventSubscription};
use crate::protocol::{self, CreateTargetResult, DetachedFromTarget, GetTargetsResult, TargetDestroyed, TargetInfo};
use crate::registry::Registry;
use crate::session::Session;
use crate::transport::{CdpTransport, CommandTarget, WebSocketTransport};
use tabwright_core_types::TargetId;
use tabwright_event_bus::Listener;

pub(crate) const BLANK_PAGE: &str = "about:blank";

/// Browser-level handle. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct CdpClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) cfg: CdpConfig,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) registry: Arc<Registry>,
    pump: Mutex<Option<JoinHandle<()>>>,
    _lifecycle: Vec<EventSubscription>,
}

impl ClientInner {
    pub(crate) async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.dispatcher.send(CommandTarget::Browser, method, params).await
    }

    pub(crate) async fn targets(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        let reply = self.send("Target.getTargets", json!({})).await?;
        let parsed: GetTargetsResult = protocol::decode("Target.getTargets", reply)?;
        Ok(parsed.target_infos)
    }

    pub(crate) async fn create_target(&self, url: &str) -> Result<TargetId, AdapterError> {
        let url = if url.is_empty() { BLANK_PAGE } else { url };
        let reply = self.send("Target.createTarget", json!({ "url": url })).await?;
        let created: CreateTargetResult = protocol::decode("Target.createTarget", reply)?;
        Ok(created.target_id)
    }
}

impl CdpClient {
    /// Launch or attach to a browser as described by `cfg`.
    pub async fn connect(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let transport: Arc<dyn CdpTransport> = Arc::new(WebSocketTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport).await
    }

    pub async fn with_transport(
        cfg: CdpConfig,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<Self, AdapterError> {
        transport.start().await?;
        let dispatcher = Arc::new(Dispatcher::new(transport, CdpEventBus::new()));
        let registry = Arc::new(Registry::new());
        let lifecycle = watch_target_lifecycle(dispatcher.bus(), &registry);
        let pump = dispatcher.spawn();

        let client = Self {
            inner: Arc::new(ClientInner {
                cfg,
                dispatcher,
                registry,
                pump: Mutex::new(Some(pump)),
                _lifecycle: lifecycle,
            }),
        };
        client
            .send("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        info!(target: "cdp-adapter", "cdp client connected");
        Ok(client)
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &CdpConfig {
        &self.inner.cfg
    }

    pub fn events(&self) -> &CdpEventBus {
        self.inner.dispatcher.bus()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        self.inner.dispatcher.is_connected()
    }

    /// Raw browser-level command.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.inner.send(method, params).await
    }

    /// Run `callback` for every `method` event, whichever session raised it.
    pub fn subscribe<F>(&self, method: &str, callback: F) -> EventSubscription
    where
        F: FnMut(CdpEvent) + Send + 'static,
    {
        self.events().subscribe(method, None, callback)
    }

    /// Browser-level events (those not tied to any session), merged in arrival order.
    pub fn listen<I, S>(&self, methods: I) -> Listener<CdpEvent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.events().listen_many(methods, None)
    }

    pub async fn targets(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        self.inner.targets().await
    }

    pub async fn attach(&self, target: &TargetId) -> Result<Session, AdapterError> {
        Session::attach(Arc::clone(&self.inner), target).await
    }

    /// Open a new tab on `url` (blank when empty) and attach to it.
    pub async fn new_page(&self, url: &str) -> Result<Session, AdapterError> {
        let target = self.inner.create_target(url).await?;
        self.attach(&target).await
    }

    /// Attach to the first open tab, opening a blank one if there is none.
    pub async fn initial_session(&self) -> Result<Session, AdapterError> {
        let targets = self.targets().await?;
        match targets.into_iter().find(TargetInfo::is_page) {
            Some(page) => self.attach(&page.target_id).await,
            None => self.new_page(BLANK_PAGE).await,
        }
    }

    /// Close every session and the connection. Idempotent.
    pub async fn shutdown(&self) {
        self.inner.registry.close_all();
        self.inner.dispatcher.shutdown();
        self.inner.dispatcher.transport().shutdown().await;
        let pump = self.inner.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(err) = pump.await {
                warn!(target: "cdp-adapter", %err, "dispatcher task ended abnormally");
            }
        }
    }
}

fn watch_target_lifecycle(bus: &CdpEventBus, registry: &Arc<Registry>) -> Vec<EventSubscription> {
    let on_destroyed = {
        let registry = Arc::clone(registry);
        bus.subscribe(methods::TARGET_DESTROYED, None, move |event| {
            match protocol::decode::<TargetDestroyed>(methods::TARGET_DESTROYED, event.params) {
                Ok(payload) => {
                    registry.close_target(&payload.target_id);
                }
                Err(err) => warn!(target: "cdp-adapter", %err, "ignoring target lifecycle event"),
            }
        })
    };
    let on_detached = {
        let registry = Arc::clone(registry);
        bus.subscribe(methods::DETACHED_FROM_TARGET, None, move |event| {
            match protocol::decode::<DetachedFromTarget>(methods::DETACHED_FROM_TARGET, event.params) {
                Ok(DetachedFromTarget {
                    session_id: Some(session),
                    ..
                }) => {
                    registry.close_session(&session);
                }
                Ok(DetachedFromTarget {
                    target_id: Some(target),
                    ..
                }) => {
                    registry.close_target(&target);
                }
                Ok(_) => {}
                Err(err) => warn!(target: "cdp-adapter", %err, "ignoring target lifecycle event"),
            }
        })
    };
    vec![on_destroyed, on_detached]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{attached, default_steps, scripted, test_config, Step};
    use crate::error::AdapterErrorKind;

    #[tokio::test]
    async fn connect_enables_target_discovery() {
        let (transport, _wire, log) = scripted(default_steps);
        let client = CdpClient::with_transport(test_config(), transport).await.unwrap();
        let discover = log.find("Target.setDiscoverTargets").unwrap();
        assert_eq!(discover.params["discover"], true);
        assert!(discover.session_id.is_none());
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn attach_uses_flat_sessions_and_enables_domains() {
        let (_client, session, _wire, log) = attached(default_steps).await;
        let attach = log.find("Target.attachToTarget").unwrap();
        assert_eq!(attach.params["targetId"], "T1");
        assert_eq!(attach.params["flatten"], true);
        assert_eq!(session.id().as_str(), "S-T1");

        let enable = log.find("Page.enable").unwrap();
        assert_eq!(enable.session_id, Some(session.id().clone()));
        assert!(log.find("Runtime.enable").is_some());
    }

    #[tokio::test]
    async fn initial_session_picks_first_page() {
        let (transport, _wire, log) = scripted(default_steps);
        let client = CdpClient::with_transport(test_config(), transport).await.unwrap();
        let session = client.initial_session().await.unwrap();
        assert_eq!(session.target_id().as_str(), "T1");
        assert_eq!(log.count("Target.createTarget"), 0);
    }

    #[tokio::test]
    async fn initial_session_opens_blank_tab_when_none_exist() {
        let (transport, _wire, log) = scripted(|command| match command.method.as_str() {
            "Target.getTargets" => vec![Step::Reply(json!({ "targetInfos": [] }))],
            "Target.createTarget" => vec![Step::Reply(json!({ "targetId": "NEW" }))],
            _ => default_steps(command),
        });
        let client = CdpClient::with_transport(test_config(), transport).await.unwrap();
        let session = client.initial_session().await.unwrap();
        assert_eq!(session.target_id().as_str(), "NEW");
        assert_eq!(log.find("Target.createTarget").unwrap().params["url"], "about:blank");
    }

    #[tokio::test]
    async fn shutdown_closes_sessions_and_connection() {
        let (client, session, _wire, _log) = attached(default_steps).await;
        client.shutdown().await;
        assert!(session.is_closed());
        let err = client.send("Browser.getVersion", json!({})).await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ConnectionLost);
    }
}
