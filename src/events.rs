use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cmd::{Headers, HttpMethod, HttpResponseType, NavigateMode, NavigateTarget};
use crate::dom_facts::{DomFacts, DomFactsKind};

/// Inputs to the reducer. `now` is always epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum RuntimeEvent {
    Booted {
        url: String,
        now: i64,
    },
    Tick {
        tick_id: String,
        now: i64,
    },
    HttpRequested {
        url: String,
        method: HttpMethod,
        response_type: HttpResponseType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Headers>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        now: i64,
    },
    NavigateRequested {
        url: String,
        mode: NavigateMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<NavigateTarget>,
        now: i64,
    },
    DomFactsReady {
        request_id: String,
        facts: DomFacts,
        now: i64,
    },
    DomFactsFailed {
        request_id: String,
        kind: DomFactsKind,
        error: String,
        now: i64,
    },
    HttpCompleted {
        request_id: String,
        url: String,
        status: u16,
        #[serde(default)]
        body: Value,
        now: i64,
    },
    HttpFailed {
        request_id: String,
        url: String,
        error: String,
        now: i64,
    },
    NavigateCompleted {
        request_id: String,
        url: String,
        now: i64,
    },
    NavigateFailed {
        request_id: String,
        url: String,
        error: String,
        now: i64,
    },
    StorageLoaded {
        request_id: String,
        key: String,
        #[serde(default)]
        value: Value,
        now: i64,
    },
    StorageFailed {
        request_id: String,
        key: String,
        error: String,
        now: i64,
    },
    StorageSetCompleted {
        request_id: String,
        key: String,
        now: i64,
    },
    StorageSetFailed {
        request_id: String,
        key: String,
        error: String,
        now: i64,
    },
}

pub const EVENT_TYPES: &[&str] = &[
    "Booted",
    "Tick",
    "HttpRequested",
    "NavigateRequested",
    "DomFactsReady",
    "DomFactsFailed",
    "HttpCompleted",
    "HttpFailed",
    "NavigateCompleted",
    "NavigateFailed",
    "StorageLoaded",
    "StorageFailed",
    "StorageSetCompleted",
    "StorageSetFailed",
];

impl RuntimeEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeEvent::Booted { .. } => "Booted",
            RuntimeEvent::Tick { .. } => "Tick",
            RuntimeEvent::HttpRequested { .. } => "HttpRequested",
            RuntimeEvent::NavigateRequested { .. } => "NavigateRequested",
            RuntimeEvent::DomFactsReady { .. } => "DomFactsReady",
            RuntimeEvent::DomFactsFailed { .. } => "DomFactsFailed",
            RuntimeEvent::HttpCompleted { .. } => "HttpCompleted",
            RuntimeEvent::HttpFailed { .. } => "HttpFailed",
            RuntimeEvent::NavigateCompleted { .. } => "NavigateCompleted",
            RuntimeEvent::NavigateFailed { .. } => "NavigateFailed",
            RuntimeEvent::StorageLoaded { .. } => "StorageLoaded",
            RuntimeEvent::StorageFailed { .. } => "StorageFailed",
            RuntimeEvent::StorageSetCompleted { .. } => "StorageSetCompleted",
            RuntimeEvent::StorageSetFailed { .. } => "StorageSetFailed",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            RuntimeEvent::Booted { .. }
            | RuntimeEvent::Tick { .. }
            | RuntimeEvent::HttpRequested { .. }
            | RuntimeEvent::NavigateRequested { .. } => None,
            RuntimeEvent::DomFactsReady { request_id, .. }
            | RuntimeEvent::DomFactsFailed { request_id, .. }
            | RuntimeEvent::HttpCompleted { request_id, .. }
            | RuntimeEvent::HttpFailed { request_id, .. }
            | RuntimeEvent::NavigateCompleted { request_id, .. }
            | RuntimeEvent::NavigateFailed { request_id, .. }
            | RuntimeEvent::StorageLoaded { request_id, .. }
            | RuntimeEvent::StorageFailed { request_id, .. }
            | RuntimeEvent::StorageSetCompleted { request_id, .. }
            | RuntimeEvent::StorageSetFailed { request_id, .. } => Some(request_id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("event: invalid payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event: missing \"type\" tag")]
    MissingType,
}

/// Decodes an event from its JSON wire form.
///
/// Unknown `type` tags are logged and skipped (`Ok(None)`); a recognised tag
/// with malformed fields is an error.
pub fn decode_event(input: &str) -> Result<Option<RuntimeEvent>, EventDecodeError> {
    let value: Value = serde_json::from_str(input)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EventDecodeError::MissingType)?;

    if !EVENT_TYPES.contains(&tag) {
        tracing::warn!(event_type = tag, "[command-runtime] ignoring unknown event type");
        return Ok(None);
    }

    Ok(Some(serde_json::from_value(value)?))
}
