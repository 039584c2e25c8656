use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dom_facts::DomFactsKind;

pub type Headers = BTreeMap<String, String>;
pub type LogContext = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HttpResponseType {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NavigateMode {
    #[default]
    Assign,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum NavigateTarget {
    #[serde(rename = "_self")]
    SameTab,
    #[serde(rename = "_blank")]
    NewTab,
}

/// Effect requests produced by [`crate::update::update`].
///
/// Every variant except `LOG`, `SCHEDULE_TICK` and `CANCEL_TICK` carries a
/// request id that the runner echoes back in the matching completion or
/// failure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum RuntimeCommand {
    #[serde(rename = "LOG")]
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<LogContext>,
    },
    #[serde(rename = "STORE_GET")]
    StoreGet { request_id: String, key: String },
    #[serde(rename = "STORE_SET")]
    StoreSet {
        request_id: String,
        key: String,
        value: Value,
    },
    #[serde(rename = "TAKE_DOM_FACTS")]
    TakeDomFacts {
        request_id: String,
        kind: DomFactsKind,
    },
    #[serde(rename = "HTTP_REQUEST")]
    HttpRequest {
        request_id: String,
        url: String,
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<Headers>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        response_type: HttpResponseType,
    },
    #[serde(rename = "NAVIGATE")]
    Navigate {
        request_id: String,
        url: String,
        mode: NavigateMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<NavigateTarget>,
    },
    #[serde(rename = "SCHEDULE_TICK")]
    ScheduleTick { id: String, interval_ms: u64 },
    #[serde(rename = "CANCEL_TICK")]
    CancelTick { id: String },
}

impl RuntimeCommand {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeCommand::Log { .. } => "LOG",
            RuntimeCommand::StoreGet { .. } => "STORE_GET",
            RuntimeCommand::StoreSet { .. } => "STORE_SET",
            RuntimeCommand::TakeDomFacts { .. } => "TAKE_DOM_FACTS",
            RuntimeCommand::HttpRequest { .. } => "HTTP_REQUEST",
            RuntimeCommand::Navigate { .. } => "NAVIGATE",
            RuntimeCommand::ScheduleTick { .. } => "SCHEDULE_TICK",
            RuntimeCommand::CancelTick { .. } => "CANCEL_TICK",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            RuntimeCommand::StoreGet { request_id, .. }
            | RuntimeCommand::StoreSet { request_id, .. }
            | RuntimeCommand::TakeDomFacts { request_id, .. }
            | RuntimeCommand::HttpRequest { request_id, .. }
            | RuntimeCommand::Navigate { request_id, .. } => Some(request_id),
            RuntimeCommand::Log { .. }
            | RuntimeCommand::ScheduleTick { .. }
            | RuntimeCommand::CancelTick { .. } => None,
        }
    }
}
