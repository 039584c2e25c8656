use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dom_facts::DomFacts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InFlightPurpose {
    DomFacts,
    StorageGet,
    StorageSet,
    HttpRequest,
    Navigate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightRequest {
    pub purpose: InFlightPurpose,
    pub started_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_every_ms: Option<u64>,
}

impl Schedule {
    pub fn has_tick(&self) -> bool {
        self.tick_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// State threaded through every `update` call for the lifetime of a page
/// session.
///
/// `cache` is never evicted; HTTP and navigation results are keyed by request
/// id while storage loads are keyed by storage key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub request_seq: u64,
    pub in_flight: BTreeMap<String, InFlightRequest>,
    pub cache: BTreeMap<String, Value>,
    pub schedule: Schedule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_facts: Option<DomFacts>,
}

impl RuntimeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let model = RuntimeModel::new();
        assert_eq!(model.request_seq, 0);
        assert!(model.is_idle());
        assert!(model.cache.is_empty());
        assert!(!model.schedule.has_tick());
    }

    #[test]
    fn empty_tick_id_counts_as_unscheduled() {
        let schedule = Schedule {
            tick_id: Some(String::new()),
            tick_every_ms: Some(1),
        };
        assert!(!schedule.has_tick());
    }
}
