//! One attached tab.
//!
//! Every command issued through a [`Session`] races the session's close signal,
//! so a tab that goes away fails its callers with `SessionClosed` instead of
//! leaving them parked on a reply that will never come.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CdpClient, ClientInner};
use crate::commands::ScreenshotOptions;
use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{methods, CdpEvent, CdpEventBus, EventSubscription};
use crate::protocol::{
    self, AddScriptResult, AttachToTargetResult, CaptureScreenshotResult, ContextCreated,
    ContextDestroyed, EvaluateResult, FrameAttached, FrameDetached, LayoutMetrics,
    NavigationEntry, NavigationHistory, RemoteObject,
};
use crate::transport::CommandTarget;
use tabwright_core_types::{ExecutionContextId, FrameId, RemoteObjectId, SessionId, TargetId};
use tabwright_event_bus::Listener;

/// Child frames seen on this target, with their default execution context once known.
type FrameTable = DashMap<FrameId, Option<ExecutionContextId>>;

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    target_id: TargetId,
    frame: RwLock<FrameId>,
    frames: Arc<FrameTable>,
    closed: CancellationToken,
    client: Arc<ClientInner>,
    _trackers: Vec<EventSubscription>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.client.registry.close_session(&self.id);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("target_id", &self.inner.target_id)
            .field("frame", &*self.inner.frame.read())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) async fn attach(
        client: Arc<ClientInner>,
        target: &TargetId,
    ) -> Result<Session, AdapterError> {
        let reply = client
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target, "flatten": true }),
            )
            .await?;
        let attached: AttachToTargetResult = protocol::decode("Target.attachToTarget", reply)?;
        let id = attached.session_id;

        let closed = client.registry.insert(id.clone(), target.clone());
        let frames = Arc::new(FrameTable::new());
        // Registered before the domains are enabled so the initial contexts are seen.
        let trackers = track_frames(client.dispatcher.bus(), &id, target, &frames);

        let session = Session {
            inner: Arc::new(SessionInner {
                id,
                target_id: target.clone(),
                frame: RwLock::new(FrameId::from(target)),
                frames,
                closed,
                client,
                _trackers: trackers,
            }),
        };
        session.send("Page.enable", json!({})).await?;
        session.send("Runtime.enable", json!({})).await?;
        info!(target: "cdp-adapter", session = %session.id(), target = %session.target_id(), "session attached");
        Ok(session)
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    pub fn target_id(&self) -> &TargetId {
        &self.inner.target_id
    }

    pub fn client(&self) -> CdpClient {
        CdpClient::from_inner(Arc::clone(&self.inner.client))
    }

    pub fn config(&self) -> &CdpConfig {
        &self.inner.client.cfg
    }

    pub fn events(&self) -> &CdpEventBus {
        self.inner.client.dispatcher.bus()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the target is gone or the session was detached.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub(crate) fn client_inner(&self) -> &Arc<ClientInner> {
        &self.inner.client
    }

    /// Raw command on this session.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.race(CommandTarget::Session(self.inner.id.clone()), method, params)
            .await
    }

    /// Browser-level command that still fails fast once this session is closed.
    pub(crate) async fn send_browser(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.race(CommandTarget::Browser, method, params).await
    }

    async fn race(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        if self.is_closed() {
            return Err(AdapterError::session_closed().with_hint(method.to_string()));
        }
        tokio::select! {
            biased;
            _ = self.inner.closed.cancelled() => {
                debug!(target: "cdp-adapter", session = %self.id(), %method, "session closed while awaiting reply");
                Err(AdapterError::session_closed().with_hint(method.to_string()))
            }
            reply = self.inner.client.dispatcher.send(target, method, params) => reply,
        }
    }

    /// Run `callback` for every `method` event raised on this session.
    pub fn subscribe<F>(&self, method: &str, callback: F) -> EventSubscription
    where
        F: FnMut(CdpEvent) + Send + 'static,
    {
        self.events()
            .subscribe(method, Some(self.inner.id.as_str()), callback)
    }

    /// This session's events for several methods, merged in arrival order.
    pub fn listen<I, S>(&self, methods: I) -> Listener<CdpEvent>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.events()
            .listen_many(methods, Some(self.inner.id.as_str()))
    }

    pub fn current_frame(&self) -> FrameId {
        self.inner.frame.read().clone()
    }

    pub fn main_frame(&self) {
        *self.inner.frame.write() = FrameId::from(&self.inner.target_id);
    }

    /// Scope later queries and evaluations to `frame`. Only frames observed on
    /// this target are accepted.
    pub fn switch_to_frame(&self, frame: &FrameId) -> Result<(), AdapterError> {
        if frame.as_str() == self.inner.target_id.as_str() {
            self.main_frame();
            return Ok(());
        }
        if !self.inner.frames.contains_key(frame) {
            return Err(AdapterError::not_found(format!("frame {frame} is not attached to this tab")));
        }
        *self.inner.frame.write() = frame.clone();
        debug!(target: "cdp-adapter", session = %self.id(), %frame, "switched frame");
        Ok(())
    }

    /// Child frames currently known on this tab.
    pub fn frames(&self) -> Vec<FrameId> {
        self.inner.frames.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Whether `frame` is known and has a live default execution context.
    pub fn execution_context_ready(&self, frame: &FrameId) -> bool {
        matches!(self.inner.frames.get(frame).map(|entry| *entry.value()), Some(Some(_)))
    }

    /// `None` for the main frame, which is the session's default context.
    pub(crate) fn execution_context(&self) -> Result<Option<ExecutionContextId>, AdapterError> {
        let frame = self.current_frame();
        if frame.as_str() == self.inner.target_id.as_str() {
            return Ok(None);
        }
        match self.inner.frames.get(&frame).map(|entry| *entry.value()) {
            Some(Some(context)) => Ok(Some(context)),
            Some(None) => Err(AdapterError::not_found(format!(
                "execution context for frame {frame} not ready"
            ))),
            None => Err(AdapterError::not_found(format!("frame {frame} was detached"))
                .retriable(false)),
        }
    }

    async fn evaluate_raw(
        &self,
        expression: &str,
        by_value: bool,
        await_promise: bool,
    ) -> Result<EvaluateResult, AdapterError> {
        let mut params = json!({
            "expression": expression,
            "returnByValue": by_value,
            "awaitPromise": await_promise,
        });
        if let Some(context) = self.execution_context()? {
            params["contextId"] = json!(context);
        }
        let reply = self.send("Runtime.evaluate", params).await?;
        protocol::decode("Runtime.evaluate", reply)
    }

    /// Run `expression` in the current frame and return its JSON value.
    pub async fn evaluate(&self, expression: &str, await_promise: bool) -> Result<Value, AdapterError> {
        self.evaluate_raw(expression, true, await_promise)
            .await?
            .into_value()
    }

    pub(crate) async fn evaluate_handle(&self, expression: &str) -> Result<RemoteObject, AdapterError> {
        self.evaluate_raw(expression, false, false).await?.into_object()
    }

    pub(crate) async fn call_function_on(
        &self,
        object_id: &RemoteObjectId,
        declaration: &str,
        args: Vec<Value>,
    ) -> Result<Value, AdapterError> {
        let arguments: Vec<Value> = args.into_iter().map(|value| json!({ "value": value })).collect();
        let reply = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": declaration,
                    "objectId": object_id,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        protocol::decode::<EvaluateResult>("Runtime.callFunctionOn", reply)?.into_value()
    }

    pub(crate) async fn release_object(&self, object_id: &RemoteObjectId) {
        if let Err(err) = self
            .send("Runtime.releaseObject", json!({ "objectId": object_id }))
            .await
        {
            debug!(target: "cdp-adapter", %err, "failed to release remote object");
        }
    }

    /// Capture the tab as image bytes in the requested format.
    pub async fn take_screenshot(&self, opts: &ScreenshotOptions) -> Result<Vec<u8>, AdapterError> {
        if let Err(err) = self
            .send_browser("Target.activateTarget", json!({ "targetId": self.target_id() }))
            .await
        {
            if err.is_session_closed() {
                return Err(err);
            }
            warn!(target: "cdp-adapter", %err, "could not activate target before capture");
        }

        let captured = if opts.full_page {
            let reply = self.send("Page.getLayoutMetrics", json!({})).await?;
            let metrics: LayoutMetrics = protocol::decode("Page.getLayoutMetrics", reply)?;
            let size = metrics.document_size();
            let captured = match self
                .send(
                    "Emulation.setDeviceMetricsOverride",
                    json!({
                        "width": size.width.ceil() as i64,
                        "height": size.height.ceil() as i64,
                        "deviceScaleFactor": 1,
                        "mobile": false,
                    }),
                )
                .await
            {
                Ok(_) => self.capture(opts).await,
                Err(err) => Err(err),
            };
            if let Err(err) = self
                .send("Emulation.clearDeviceMetricsOverride", json!({}))
                .await
            {
                warn!(target: "cdp-adapter", %err, "failed to restore device metrics");
            }
            captured
        } else {
            self.capture(opts).await
        };

        let data = captured?;
        BASE64
            .decode(data.as_bytes())
            .map_err(|err| AdapterError::decode(format!("screenshot data is not base64: {err}")))
    }

    async fn capture(&self, opts: &ScreenshotOptions) -> Result<String, AdapterError> {
        let reply = self
            .send("Page.captureScreenshot", opts.capture_params())
            .await?;
        let shot: CaptureScreenshotResult = protocol::decode("Page.captureScreenshot", reply)?;
        Ok(shot.data)
    }

    /// Current history entry; a fresh tab with no history reports `about:blank`.
    pub async fn navigation_entry(&self) -> Result<NavigationEntry, AdapterError> {
        let reply = self.send("Page.getNavigationHistory", json!({})).await?;
        let history: NavigationHistory = protocol::decode("Page.getNavigationHistory", reply)?;
        if history.current_index < 0 {
            return Ok(NavigationEntry::blank());
        }
        history
            .entries
            .get(history.current_index as usize)
            .cloned()
            .ok_or_else(|| {
                AdapterError::decode(format!(
                    "history index {} out of range ({} entries)",
                    history.current_index,
                    history.entries.len()
                ))
            })
    }

    /// Register `source` to run in every new document; returns its identifier.
    pub async fn add_script_on_new_document(&self, source: &str) -> Result<String, AdapterError> {
        let reply = self
            .send(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        let added: AddScriptResult =
            protocol::decode("Page.addScriptToEvaluateOnNewDocument", reply)?;
        Ok(added.identifier)
    }

    pub async fn remove_script_on_new_document(&self, identifier: &str) -> Result<(), AdapterError> {
        self.send(
            "Page.removeScriptToEvaluateOnNewDocument",
            json!({ "identifier": identifier }),
        )
        .await?;
        Ok(())
    }

    /// Slow the tab's CPU down by `rate` (1 disables throttling).
    pub async fn set_cpu_throttling_rate(&self, rate: f64) -> Result<(), AdapterError> {
        if !rate.is_finite() || rate < 1.0 {
            return Err(AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("cpu throttling rate must be >= 1, got {rate}")));
        }
        self.send("Emulation.setCPUThrottlingRate", json!({ "rate": rate }))
            .await?;
        Ok(())
    }
}

fn track_frames(
    bus: &CdpEventBus,
    session: &SessionId,
    target: &TargetId,
    frames: &Arc<FrameTable>,
) -> Vec<EventSubscription> {
    let scope = Some(session.as_str());
    let mut trackers = Vec::with_capacity(5);

    let table = Arc::clone(frames);
    trackers.push(bus.subscribe(methods::FRAME_ATTACHED, scope, move |event| {
        if let Ok(attached) = protocol::decode::<FrameAttached>(methods::FRAME_ATTACHED, event.params) {
            table.entry(attached.frame_id).or_insert(None);
        }
    }));

    let table = Arc::clone(frames);
    trackers.push(bus.subscribe(methods::FRAME_DETACHED, scope, move |event| {
        if let Ok(detached) = protocol::decode::<FrameDetached>(methods::FRAME_DETACHED, event.params) {
            table.remove(&detached.frame_id);
        }
    }));

    let table = Arc::clone(frames);
    let main = FrameId::from(target);
    trackers.push(bus.subscribe(methods::CONTEXT_CREATED, scope, move |event| {
        match protocol::decode::<ContextCreated>(methods::CONTEXT_CREATED, event.params) {
            Ok(ContextCreated { context }) if context.aux_data.is_default => {
                // The main frame evaluates without a contextId.
                if let Some(frame) = context.aux_data.frame_id.filter(|frame| *frame != main) {
                    table.insert(frame, Some(context.id));
                }
            }
            Ok(_) => {}
            Err(err) => debug!(target: "cdp-adapter", %err, "ignoring execution context event"),
        }
    }));

    let table = Arc::clone(frames);
    trackers.push(bus.subscribe(methods::CONTEXT_DESTROYED, scope, move |event| {
        if let Ok(destroyed) =
            protocol::decode::<ContextDestroyed>(methods::CONTEXT_DESTROYED, event.params)
        {
            for mut entry in table.iter_mut() {
                if *entry.value() == Some(destroyed.execution_context_id) {
                    *entry.value_mut() = None;
                }
            }
        }
    }));

    let table = Arc::clone(frames);
    trackers.push(bus.subscribe(methods::CONTEXTS_CLEARED, scope, move |_| {
        for mut entry in table.iter_mut() {
            *entry.value_mut() = None;
        }
    }));

    trackers
}
