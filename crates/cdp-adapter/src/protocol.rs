//! Typed views over the protocol payloads the client consumes.
//!
//! Only the fields the client reads are modelled; everything else in a reply is
//! ignored by serde.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdapterError;
use tabwright_core_types::{ExecutionContextId, FrameId, RemoteObjectId, SessionId, TargetId};

/// Decode a command reply or event payload, naming `what` on failure.
pub fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T, AdapterError> {
    serde_json::from_value(value)
        .map_err(|err| AdapterError::decode(format!("unexpected {what} payload: {err}")))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachToTargetResult {
    pub session_id: SessionId,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetResult {
    pub target_id: TargetId,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub target_id: TargetId,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub attached: bool,
    #[serde(default)]
    pub opener_id: Option<TargetId>,
}

impl TargetInfo {
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTargetsResult {
    pub target_infos: Vec<TargetInfo>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigateResult {
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    /// Absent when the navigation was same-document and no load will follow.
    #[serde(default)]
    pub loader_id: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub object_id: Option<RemoteObjectId>,
}

impl RemoteObject {
    pub fn is_null(&self) -> bool {
        self.subtype.as_deref() == Some("null") || self.object_type == "undefined"
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub exception_id: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default)]
    pub column_number: i64,
    #[serde(default)]
    pub exception: Option<RemoteObject>,
}

impl ExceptionDetails {
    pub fn message(&self) -> String {
        self.exception
            .as_ref()
            .and_then(|obj| obj.description.clone())
            .unwrap_or_else(|| self.text.clone())
    }
}

/// Reply shape shared by `Runtime.evaluate` and `Runtime.callFunctionOn`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResult {
    pub result: RemoteObject,
    #[serde(default)]
    pub exception_details: Option<ExceptionDetails>,
}

impl EvaluateResult {
    /// In-page exceptions surface as `Remote` errors with code 0.
    pub fn into_object(self) -> Result<RemoteObject, AdapterError> {
        match self.exception_details {
            Some(details) => {
                let message = details.message();
                let data = serde_json::to_value(&details).unwrap_or(Value::Null);
                Err(AdapterError::remote(0, message)
                    .with_hint("script threw")
                    .with_data(data))
            }
            None => Ok(self.result),
        }
    }

    pub fn into_value(self) -> Result<Value, AdapterError> {
        Ok(self.into_object()?.value.unwrap_or(Value::Null))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PropertyDescriptor {
    pub name: String,
    #[serde(default)]
    pub value: Option<RemoteObject>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GetPropertiesResult {
    pub result: Vec<PropertyDescriptor>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetrics {
    #[serde(default)]
    pub css_content_size: Option<Rect>,
    pub content_size: Rect,
}

impl LayoutMetrics {
    /// Full document size in CSS pixels; older browsers only report `contentSize`.
    pub fn document_size(&self) -> Rect {
        self.css_content_size.unwrap_or(self.content_size)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CaptureScreenshotResult {
    pub data: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEntry {
    #[serde(default)]
    pub id: i64,
    pub url: String,
    #[serde(default)]
    pub user_typed_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub transition_type: String,
}

impl NavigationEntry {
    pub fn blank() -> Self {
        Self {
            url: "about:blank".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationHistory {
    pub current_index: i64,
    #[serde(default)]
    pub entries: Vec<NavigationEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddScriptResult {
    pub identifier: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxData {
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    pub id: ExecutionContextId,
    #[serde(default)]
    pub aux_data: AuxData,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ContextCreated {
    pub context: ExecutionContextDescription,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDestroyed {
    pub execution_context_id: ExecutionContextId,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttached {
    pub frame_id: FrameId,
    #[serde(default)]
    pub parent_frame_id: Option<FrameId>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetached {
    pub frame_id: FrameId,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCreated {
    pub target_info: TargetInfo,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDestroyed {
    pub target_id: TargetId,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachedFromTarget {
    #[serde(default)]
    pub session_id: Option<SessionId>,
    #[serde(default)]
    pub target_id: Option<TargetId>,
}
