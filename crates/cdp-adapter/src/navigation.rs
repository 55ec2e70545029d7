//! Navigate/reload reconciled against `Page.loadEventFired`.
//!
//! The command reply only says the browser accepted the request; the load event
//! says the document finished. The load subscription is registered before the
//! command goes out so a fast load cannot slip past, and it is released on every
//! exit path when the sink handle drops.

use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;
use tracing::debug;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::events::{methods, CdpEvent};
use crate::protocol::{self, NavigateResult};
use crate::session::Session;

/// Progress of one navigate or reload attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NavigationPhase {
    Idle,
    CommandSent,
    LoadConfirmed,
    TimedOut,
    NoNavigationNeeded,
}

struct Attempt<'a> {
    session: &'a Session,
    action: &'static str,
    phase: NavigationPhase,
}

impl<'a> Attempt<'a> {
    fn new(session: &'a Session, action: &'static str) -> Self {
        Self {
            session,
            action,
            phase: NavigationPhase::Idle,
        }
    }

    fn advance(&mut self, next: NavigationPhase) {
        debug!(
            target: "cdp-adapter",
            session = %self.session.id(),
            action = self.action,
            from = ?self.phase,
            to = ?next,
            "navigation phase"
        );
        self.phase = next;
    }
}

impl Session {
    /// Load `url` in this tab's main frame and wait for the document to finish.
    pub async fn navigate(&self, url: &str) -> Result<NavigationPhase, AdapterError> {
        let (_loaded, mut loads) = self
            .events()
            .sink(methods::LOAD_EVENT_FIRED, Some(self.id().as_str()));
        let mut attempt = Attempt::new(self, "navigate");

        let reply = self
            .send(
                "Page.navigate",
                json!({
                    "url": url,
                    "transitionType": "typed",
                    "frameId": self.target_id(),
                }),
            )
            .await?;
        attempt.advance(NavigationPhase::CommandSent);

        let result: NavigateResult = protocol::decode("Page.navigate", reply)?;
        if let Some(text) = result.error_text.filter(|text| !text.is_empty()) {
            return Err(AdapterError::new(AdapterErrorKind::Navigation(text)).with_hint(url.to_string()));
        }
        if result.loader_id.as_deref().map_or(true, str::is_empty) {
            attempt.advance(NavigationPhase::NoNavigationNeeded);
            return Ok(NavigationPhase::NoNavigationNeeded);
        }

        self.await_load(&mut attempt, &mut loads).await
    }

    /// Reload bypassing the cache and wait for the document to finish.
    pub async fn reload(&self) -> Result<NavigationPhase, AdapterError> {
        let (_loaded, mut loads) = self
            .events()
            .sink(methods::LOAD_EVENT_FIRED, Some(self.id().as_str()));
        let mut attempt = Attempt::new(self, "reload");

        self.send("Page.reload", json!({ "ignoreCache": true }))
            .await?;
        attempt.advance(NavigationPhase::CommandSent);

        self.await_load(&mut attempt, &mut loads).await
    }

    async fn await_load(
        &self,
        attempt: &mut Attempt<'_>,
        loads: &mut UnboundedReceiver<CdpEvent>,
    ) -> Result<NavigationPhase, AdapterError> {
        let limit = self.config().navigation_timeout();
        tokio::select! {
            biased;
            _ = self.closed() => Err(AdapterError::session_closed().with_hint(attempt.action)),
            loaded = loads.recv() => match loaded {
                Some(_) => {
                    // The new document may have a different frame tree.
                    self.main_frame();
                    attempt.advance(NavigationPhase::LoadConfirmed);
                    Ok(NavigationPhase::LoadConfirmed)
                }
                None => Err(AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("load event subscription dropped")),
            },
            _ = sleep(limit) => {
                attempt.advance(NavigationPhase::TimedOut);
                Err(AdapterError::new(AdapterErrorKind::NavigateTimeout)
                    .with_hint(format!("{} did not finish within {limit:?}", attempt.action)))
            }
        }
    }
}
