//! DOM queries resolved to remote object handles.

use serde_json::{json, Value};
use tracing::debug;

use crate::error::AdapterError;
use crate::protocol::{self, GetPropertiesResult, RemoteObject};
use crate::session::Session;
use crate::wait::Ticker;
use tabwright_core_types::{FrameId, RemoteObjectId};

const VISIBLE_FN: &str = "function() {\
 const rect = this.getBoundingClientRect();\
 const style = window.getComputedStyle(this);\
 return rect.width > 0 && rect.height > 0\
 && style.visibility !== 'hidden' && style.display !== 'none';\
 }";
const TEXT_FN: &str = "function() { return this.innerText ?? this.textContent ?? ''; }";
const ATTRIBUTE_FN: &str = "function(name) { return this.getAttribute(name); }";
const CLICK_FN: &str =
    "function() { this.scrollIntoView({ block: 'center', inline: 'center' }); this.click(); }";

/// Handle to a DOM node living in the page.
///
/// The handle goes stale once its frame navigates away; calls on a stale handle
/// surface the browser's error.
#[derive(Clone, Debug)]
pub struct Element {
    session: Session,
    frame: FrameId,
    object_id: RemoteObjectId,
    description: Option<String>,
}

impl Element {
    fn from_remote(session: &Session, object: RemoteObject) -> Option<Self> {
        let object_id = object.object_id?;
        Some(Self {
            session: session.clone(),
            frame: session.current_frame(),
            object_id,
            description: object.description,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Frame that was current when the element was resolved.
    pub fn frame(&self) -> &FrameId {
        &self.frame
    }

    pub fn object_id(&self) -> &RemoteObjectId {
        &self.object_id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Invoke `declaration` with the element bound to `this`.
    pub async fn call_function(&self, declaration: &str, args: Vec<Value>) -> Result<Value, AdapterError> {
        self.session
            .call_function_on(&self.object_id, declaration, args)
            .await
    }

    pub async fn is_visible(&self) -> Result<bool, AdapterError> {
        Ok(self
            .call_function(VISIBLE_FN, Vec::new())
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    pub async fn text(&self) -> Result<String, AdapterError> {
        let value = self.call_function(TEXT_FN, Vec::new()).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn attribute(&self, name: &str) -> Result<Option<String>, AdapterError> {
        let value = self.call_function(ATTRIBUTE_FN, vec![json!(name)]).await?;
        Ok(value.as_str().map(str::to_string))
    }

    /// Scroll into view and dispatch a DOM click.
    pub async fn click(&self) -> Result<(), AdapterError> {
        self.call_function(CLICK_FN, Vec::new()).await?;
        Ok(())
    }
}

fn selector_literal(selector: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    Value::String(selector.to_string()).to_string()
}

impl Session {
    /// First element matching `selector` in the current frame.
    pub async fn query(&self, selector: &str) -> Result<Element, AdapterError> {
        let object = self
            .evaluate_handle(&format!(
                "document.querySelector({})",
                selector_literal(selector)
            ))
            .await?;
        if object.is_null() {
            return Err(AdapterError::not_found(selector.to_string()));
        }
        Element::from_remote(self, object)
            .ok_or_else(|| AdapterError::not_found(selector.to_string()))
    }

    /// Every element matching `selector`, in document order. Any failure reads as
    /// no match.
    pub async fn query_all(&self, selector: &str) -> Vec<Element> {
        match self.try_query_all(selector).await {
            Ok(elements) => elements,
            Err(err) => {
                debug!(target: "cdp-adapter", selector, %err, "query_all found nothing");
                Vec::new()
            }
        }
    }

    async fn try_query_all(&self, selector: &str) -> Result<Vec<Element>, AdapterError> {
        let array = self
            .evaluate_handle(&format!(
                "Array.from(document.querySelectorAll({}))",
                selector_literal(selector)
            ))
            .await?;
        let Some(array_id) = array.object_id else {
            return Ok(Vec::new());
        };

        let listed = self
            .send(
                "Runtime.getProperties",
                json!({ "objectId": array_id, "ownProperties": true }),
            )
            .await;
        self.release_object(&array_id).await;
        let properties: GetPropertiesResult = protocol::decode("Runtime.getProperties", listed?)?;

        let mut indexed: Vec<(usize, RemoteObject)> = properties
            .result
            .into_iter()
            .filter_map(|prop| Some((prop.name.parse::<usize>().ok()?, prop.value?)))
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed
            .into_iter()
            .filter_map(|(_, object)| Element::from_remote(self, object))
            .collect())
    }

    /// Poll for `selector` until it exists (and is visible, if asked) or the
    /// implicit wait runs out.
    pub async fn find_ready(&self, selector: &str, require_visible: bool) -> Result<Element, AdapterError> {
        let cfg = self.config();
        let ticker = Ticker::new(cfg.implicit_wait(), cfg.poll_interval());
        ticker
            .tick(|| async move {
                let element = self.query(selector).await?;
                if require_visible && !element.is_visible().await? {
                    return Err(AdapterError::invisible(selector.to_string()));
                }
                Ok(element)
            })
            .await
    }

    /// [`Session::find_ready`] for callers that treat a missing element as fatal.
    ///
    /// # Panics
    ///
    /// Panics when the element is not ready within the implicit wait.
    pub async fn expect_ready(&self, selector: &str, require_visible: bool) -> Element {
        match self.find_ready(selector, require_visible).await {
            Ok(element) => element,
            Err(err) => panic!("element {selector:?} never became ready: {err}"),
        }
    }
}
