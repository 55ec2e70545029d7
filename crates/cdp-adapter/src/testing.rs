//! In-process stand-in for a browser endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::client::CdpClient;
use crate::config::CdpConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{CdpEvent, CdpEventBus};
use crate::transport::{
    CdpTransport, CommandResponse, InboundMessage, OutboundCommand, RemoteErrorPayload,
};

pub(crate) struct MockTransport {
    outbound: mpsc::UnboundedSender<OutboundCommand>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundMessage>>,
}

#[async_trait]
impl CdpTransport for MockTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn send(&self, command: OutboundCommand) -> Result<(), AdapterError> {
        self.outbound.send(command).map_err(|_| {
            AdapterError::new(AdapterErrorKind::CdpIo).with_hint("mock browser gone")
        })
    }

    async fn next_message(&self) -> Option<InboundMessage> {
        self.inbound.lock().await.recv().await
    }
}

/// Browser side of the mock connection.
#[derive(Clone)]
pub(crate) struct Wire {
    inbound: Arc<Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>>,
}

impl Wire {
    fn push(&self, message: InboundMessage) {
        if let Some(tx) = self.inbound.lock().as_ref() {
            let _ = tx.send(message);
        }
    }

    pub fn reply(&self, id: u64, result: Value) {
        self.push(InboundMessage::Response(CommandResponse {
            id,
            result: Some(result),
            error: None,
        }));
    }

    pub fn fail(&self, id: u64, code: i64, message: &str) {
        self.push(InboundMessage::Response(CommandResponse {
            id,
            result: None,
            error: Some(RemoteErrorPayload {
                code,
                message: message.to_string(),
                data: None,
            }),
        }));
    }

    pub fn emit(&self, event: CdpEvent) {
        self.push(InboundMessage::Event(event));
    }

    pub fn disconnect(&self) {
        self.inbound.lock().take();
    }
}

fn mock_pair() -> (
    Arc<MockTransport>,
    Wire,
    mpsc::UnboundedReceiver<OutboundCommand>,
) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        outbound: out_tx,
        inbound: tokio::sync::Mutex::new(in_rx),
    });
    let wire = Wire {
        inbound: Arc::new(Mutex::new(Some(in_tx))),
    };
    (transport, wire, out_rx)
}

/// Manually driven browser wired to a running dispatcher.
pub(crate) struct MockBrowser {
    wire: Wire,
    commands: tokio::sync::Mutex<mpsc::UnboundedReceiver<OutboundCommand>>,
    dispatcher: Arc<Dispatcher>,
}

impl MockBrowser {
    pub fn new() -> Self {
        let (transport, wire, commands) = mock_pair();
        let dispatcher = Arc::new(Dispatcher::new(transport, CdpEventBus::new()));
        dispatcher.spawn();
        Self {
            wire,
            commands: tokio::sync::Mutex::new(commands),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub async fn next_command(&self) -> OutboundCommand {
        self.commands
            .lock()
            .await
            .recv()
            .await
            .expect("dispatcher dropped its transport")
    }

    pub fn reply(&self, id: u64, result: Value) {
        self.wire.reply(id, result);
    }

    pub fn fail(&self, id: u64, code: i64, message: &str) {
        self.wire.fail(id, code, message);
    }

    pub fn emit(&self, event: CdpEvent) {
        self.wire.emit(event);
    }

    pub fn disconnect(&self) {
        self.wire.disconnect();
    }
}

/// One scripted reaction to a command, applied in order.
pub(crate) enum Step {
    Reply(Value),
    Fail(i64, &'static str),
    Emit(CdpEvent),
}

impl Step {
    /// Event raised on the same session the command was sent to.
    pub fn emit_on(command: &OutboundCommand, method: &str, params: Value) -> Step {
        Step::Emit(CdpEvent {
            method: method.to_string(),
            params,
            session_id: command.session_id.clone(),
        })
    }
}

#[derive(Clone, Default)]
pub(crate) struct CommandLog {
    entries: Arc<Mutex<Vec<OutboundCommand>>>,
}

impl CommandLog {
    pub fn methods(&self) -> Vec<String> {
        self.entries.lock().iter().map(|c| c.method.clone()).collect()
    }

    pub fn find(&self, method: &str) -> Option<OutboundCommand> {
        self.entries.lock().iter().find(|c| c.method == method).cloned()
    }

    pub fn nth(&self, index: usize) -> OutboundCommand {
        self.entries.lock()[index].clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.entries.lock().iter().filter(|c| c.method == method).count()
    }
}

/// Replies that every attached-session test needs.
pub(crate) fn default_steps(command: &OutboundCommand) -> Vec<Step> {
    match command.method.as_str() {
        "Target.attachToTarget" => {
            let target = command.params["targetId"].as_str().unwrap_or("T0");
            vec![Step::Reply(json!({ "sessionId": format!("S-{target}") }))]
        }
        "Target.getTargets" => vec![Step::Reply(json!({
            "targetInfos": [
                { "targetId": "T1", "type": "page", "title": "one", "url": "about:blank", "attached": true },
                { "targetId": "W1", "type": "service_worker", "title": "", "url": "https://a.test/sw.js", "attached": false },
                { "targetId": "T2", "type": "page", "title": "two", "url": "https://b.test/", "attached": false }
            ]
        }))],
        _ => vec![Step::Reply(json!({}))],
    }
}

/// Browser answering every command through `script`.
pub(crate) fn scripted<F>(mut script: F) -> (Arc<dyn CdpTransport>, Wire, CommandLog)
where
    F: FnMut(&OutboundCommand) -> Vec<Step> + Send + 'static,
{
    let (transport, wire, mut commands) = mock_pair();
    let log = CommandLog::default();
    let responder_wire = wire.clone();
    let responder_log = log.clone();
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            responder_log.entries.lock().push(command.clone());
            for step in script(&command) {
                match step {
                    Step::Reply(value) => responder_wire.reply(command.id, value),
                    Step::Fail(code, message) => responder_wire.fail(command.id, code, message),
                    Step::Emit(event) => responder_wire.emit(event),
                }
            }
        }
    });
    (transport, wire, log)
}

pub(crate) fn test_config() -> CdpConfig {
    CdpConfig {
        executable: Default::default(),
        user_data_dir: Default::default(),
        headless: true,
        websocket_url: None,
        navigation_timeout_ms: 5_000,
        implicit_wait_ms: 3_000,
        poll_interval_ms: 100,
        launch_timeout_ms: 1_000,
    }
}

/// Connected client plus a session attached to target `T1`.
pub(crate) async fn attached<F>(
    script: F,
) -> (CdpClient, crate::session::Session, Wire, CommandLog)
where
    F: FnMut(&OutboundCommand) -> Vec<Step> + Send + 'static,
{
    let (transport, wire, log) = scripted(script);
    let client = CdpClient::with_transport(test_config(), transport)
        .await
        .expect("client connects");
    let session = client
        .attach(&"T1".into())
        .await
        .expect("session attaches");
    (client, session, wire, log)
}

/// Poll `condition` until it holds; event callbacks run on their own tasks.
pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
