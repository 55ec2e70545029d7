use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::error::AdapterError;
use crate::events::methods;
use crate::protocol::{self, TargetCreated};
use crate::session::Session;
use tabwright_core_types::TargetId;
use tabwright_event_bus::WatchOnce;

impl Session {
    /// Close this tab.
    ///
    /// `Target.targetDestroyed` can overtake the reply to `Target.closeTarget`
    /// and close the session first; that outcome counts as success.
    pub async fn close(&self) -> Result<(), AdapterError> {
        match self
            .send_browser("Target.closeTarget", json!({ "targetId": self.target_id() }))
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_session_closed() => {
                debug!(target: "cdp-adapter", target = %self.target_id(), "tab gone before close replied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Open a tab on `url` (blank when empty) without attaching to it.
    pub async fn new_tab(&self, url: &str) -> Result<TargetId, AdapterError> {
        self.client_inner().create_target(url).await
    }

    /// Attach to `target` and return an independent session for it.
    pub async fn switch_to_tab(&self, target: &TargetId) -> Result<Session, AdapterError> {
        Session::attach(Arc::clone(self.client_inner()), target).await
    }

    /// Ids of every open page target.
    pub async fn get_tabs(&self) -> Result<Vec<TargetId>, AdapterError> {
        let targets = self.client_inner().targets().await?;
        Ok(targets
            .into_iter()
            .filter(|info| info.is_page())
            .map(|info| info.target_id)
            .collect())
    }

    /// Like [`Session::get_tabs`], but an enumeration failure reads as "no tabs".
    pub async fn tabs_or_empty(&self) -> Vec<TargetId> {
        match self.get_tabs().await {
            Ok(tabs) => tabs,
            Err(err) => {
                warn!(target: "cdp-adapter", %err, "tab enumeration failed");
                Vec::new()
            }
        }
    }

    /// Resolves to the next page target created, or `None` once the navigation
    /// timeout passes.
    pub fn watch_new_tab(&self) -> WatchOnce<TargetId> {
        self.events().watch_once(
            methods::TARGET_CREATED,
            None,
            self.config().navigation_timeout(),
            |event| {
                protocol::decode::<TargetCreated>(methods::TARGET_CREATED, event.params.clone())
                    .ok()
                    .filter(|created| created.target_info.is_page())
                    .map(|created| created.target_info.target_id)
            },
        )
    }
}
