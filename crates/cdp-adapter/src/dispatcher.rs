//! Request/reply correlation and event routing over one transport.
//!
//! Every command gets a fresh id and a waiter in the inflight table before it is
//! written. The pump task is the only reader of the transport: replies resolve the
//! matching waiter, events go to the bus. When the stream ends every waiter fails
//! with `ConnectionLost`, and so does every later `send`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::AdapterError;
use crate::events::{CdpEvent, CdpEventBus};
use crate::metrics;
use crate::transport::{CdpTransport, CommandResponse, CommandTarget, InboundMessage, OutboundCommand};

type Waiter = oneshot::Sender<Result<Value, AdapterError>>;
type Inflight = DashMap<u64, Waiter>;

pub struct Dispatcher {
    transport: Arc<dyn CdpTransport>,
    bus: CdpEventBus,
    next_id: AtomicU64,
    inflight: Arc<Inflight>,
    lost: AtomicBool,
    shutdown: CancellationToken,
}

/// Removes the waiter if the caller stops waiting before the reply arrives.
struct WaiterGuard {
    id: u64,
    inflight: Arc<Inflight>,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.inflight.remove(&self.id);
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn CdpTransport>, bus: CdpEventBus) -> Self {
        Self {
            transport,
            bus,
            next_id: AtomicU64::new(1),
            inflight: Arc::new(DashMap::new()),
            lost: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn bus(&self) -> &CdpEventBus {
        &self.bus
    }

    pub fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    pub fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.inflight.len()
    }

    /// Issue a command and wait for its reply.
    pub async fn send(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::connection_lost().with_hint(method.to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inflight.insert(id, tx);
        let _guard = WaiterGuard {
            id,
            inflight: Arc::clone(&self.inflight),
        };
        // The pump may have drained the table between the check above and the insert.
        if !self.is_connected() {
            return Err(AdapterError::connection_lost().with_hint(method.to_string()));
        }

        metrics::record_command(method);
        let started = Instant::now();
        trace!(target: "cdp-dispatcher", id, %method, session = ?target.session_id(), "sending command");

        let command = OutboundCommand {
            id,
            method: method.to_string(),
            params,
            session_id: target.session_id().cloned(),
        };
        if let Err(err) = self.transport.send(command).await {
            metrics::record_command_failure(method);
            return Err(err);
        }

        let outcome = rx
            .await
            .unwrap_or_else(|_| Err(AdapterError::connection_lost().with_hint(method.to_string())));
        match &outcome {
            Ok(_) => metrics::record_command_success(method, started.elapsed()),
            Err(err) => {
                metrics::record_command_failure(method);
                debug!(target: "cdp-dispatcher", id, %method, %err, "command failed");
            }
        }
        outcome
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run().await })
    }

    /// Read the transport until it ends or the dispatcher is shut down.
    pub async fn run(&self) {
        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.fail_all("dispatcher shut down");
                    break;
                }
                message = self.transport.next_message() => message,
            };
            match message {
                Some(InboundMessage::Response(response)) => self.resolve(response),
                Some(InboundMessage::Event(event)) => {
                    self.dispatch(event);
                }
                None => {
                    self.fail_all("transport stream ended");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn resolve(&self, response: CommandResponse) {
        match self.inflight.remove(&response.id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response.into_result());
            }
            None => {
                metrics::record_orphan_reply();
                debug!(target: "cdp-dispatcher", id = response.id, "dropping reply with no pending command");
            }
        }
    }

    /// Deliver an event to every matching bus registration.
    pub fn dispatch(&self, event: CdpEvent) -> usize {
        metrics::record_event();
        let method = event.method.clone();
        let delivered = self.bus.publish(event);
        trace!(target: "cdp-dispatcher", %method, delivered, "event routed");
        delivered
    }

    fn fail_all(&self, reason: &str) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        metrics::record_connection_lost();
        let ids: Vec<u64> = self.inflight.iter().map(|entry| *entry.key()).collect();
        warn!(target: "cdp-dispatcher", pending = ids.len(), %reason, "connection lost");
        for id in ids {
            if let Some((_, waiter)) = self.inflight.remove(&id) {
                let _ = waiter.send(Err(AdapterError::connection_lost().with_hint(reason.to_string())));
            }
        }
    }
}
