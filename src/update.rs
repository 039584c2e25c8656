use serde_json::{json, Map, Value};

use crate::cmd::{LogLevel, RuntimeCommand};
use crate::dom_facts::DomFactsKind;
use crate::events::RuntimeEvent;
use crate::model::{InFlightPurpose, InFlightRequest, RuntimeModel, Schedule};
use crate::policy::{
    APP_SETTINGS_STORAGE_KEY, COMMAND_RUNTIME_DEFAULT_TICK_MS, COMMAND_RUNTIME_STORAGE_KEY,
    COMMAND_RUNTIME_TICK_ID,
};

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    pub model: RuntimeModel,
    pub cmds: Vec<RuntimeCommand>,
}

fn allocate_request_id(model: &mut RuntimeModel, prefix: &str) -> String {
    let id = format!("{}:{}", prefix, model.request_seq);
    model.request_seq += 1;
    id
}

fn clear_in_flight(model: &mut RuntimeModel, request_id: &str) {
    model.in_flight.remove(request_id);
}

/// Allocates a request id, records it in `in_flight` and queues the command.
///
/// The entry is written when the command is enqueued, before any runner has
/// seen it, so `in_flight` can describe commands that have not started yet.
fn enqueue_tracked(
    model: &mut RuntimeModel,
    cmds: &mut Vec<RuntimeCommand>,
    prefix: &str,
    purpose: InFlightPurpose,
    now: i64,
    build: impl FnOnce(String) -> RuntimeCommand,
) {
    let request_id = allocate_request_id(model, prefix);
    model.in_flight.insert(
        request_id.clone(),
        InFlightRequest {
            purpose,
            started_at: now,
        },
    );
    cmds.push(build(request_id));
}

fn log(level: LogLevel, message: &str, context: Value) -> RuntimeCommand {
    let context = match context {
        Value::Object(map) => Some(map),
        _ => None,
    };
    RuntimeCommand::Log {
        level,
        message: message.to_string(),
        context,
    }
}

/// Computes the next model and the ordered commands for one event.
pub fn update(model: RuntimeModel, event: RuntimeEvent) -> UpdateResult {
    let mut model = model;
    let mut cmds = Vec::new();

    match event {
        RuntimeEvent::Booted { url, now } => {
            cmds.push(log(
                LogLevel::Info,
                "[command-runtime] Booted",
                json!({ "url": url }),
            ));
            model.url = Some(url);

            for key in [COMMAND_RUNTIME_STORAGE_KEY, APP_SETTINGS_STORAGE_KEY] {
                enqueue_tracked(
                    &mut model,
                    &mut cmds,
                    "storeGet",
                    InFlightPurpose::StorageGet,
                    now,
                    |request_id| RuntimeCommand::StoreGet {
                        request_id,
                        key: key.to_string(),
                    },
                );
            }

            enqueue_tracked(
                &mut model,
                &mut cmds,
                "domFacts",
                InFlightPurpose::DomFacts,
                now,
                |request_id| RuntimeCommand::TakeDomFacts {
                    request_id,
                    kind: DomFactsKind::XComGallery,
                },
            );

            if !model.schedule.has_tick() {
                model.schedule = Schedule {
                    tick_id: Some(COMMAND_RUNTIME_TICK_ID.to_string()),
                    tick_every_ms: Some(COMMAND_RUNTIME_DEFAULT_TICK_MS),
                };
                cmds.push(RuntimeCommand::ScheduleTick {
                    id: COMMAND_RUNTIME_TICK_ID.to_string(),
                    interval_ms: COMMAND_RUNTIME_DEFAULT_TICK_MS,
                });
            }
        }

        RuntimeEvent::HttpRequested {
            url,
            method,
            response_type,
            headers,
            body,
            now,
        } => {
            enqueue_tracked(
                &mut model,
                &mut cmds,
                "http",
                InFlightPurpose::HttpRequest,
                now,
                |request_id| RuntimeCommand::HttpRequest {
                    request_id,
                    url,
                    method,
                    headers,
                    body,
                    response_type,
                },
            );
        }

        RuntimeEvent::NavigateRequested {
            url,
            mode,
            target,
            now,
        } => {
            enqueue_tracked(
                &mut model,
                &mut cmds,
                "navigate",
                InFlightPurpose::Navigate,
                now,
                |request_id| RuntimeCommand::Navigate {
                    request_id,
                    url,
                    mode,
                    target,
                },
            );
        }

        // The recurring tick was installed at boot; a tick never reschedules.
        RuntimeEvent::Tick { now, .. } => {
            enqueue_tracked(
                &mut model,
                &mut cmds,
                "domFacts",
                InFlightPurpose::DomFacts,
                now,
                |request_id| RuntimeCommand::TakeDomFacts {
                    request_id,
                    kind: DomFactsKind::XComGallery,
                },
            );
        }

        RuntimeEvent::DomFactsReady {
            request_id,
            facts,
            now,
        } => {
            clear_in_flight(&mut model, &request_id);

            cmds.push(log(
                LogLevel::Debug,
                "[command-runtime] Dom facts updated",
                json!({
                    "requestId": request_id,
                    "kind": facts.kind,
                    "hasXegOverlay": facts.has_xeg_overlay,
                    "hasXComMediaViewer": facts.has_xcom_media_viewer,
                    "mediaElementsCount": facts.media_elements_count,
                }),
            ));

            let mut saved = Map::new();
            saved.insert(
                "lastFacts".into(),
                serde_json::to_value(&facts).unwrap_or(Value::Null),
            );
            saved.insert("savedAt".into(), Value::from(now));
            model.last_facts = Some(facts);

            enqueue_tracked(
                &mut model,
                &mut cmds,
                "storeSet",
                InFlightPurpose::StorageSet,
                now,
                |request_id| RuntimeCommand::StoreSet {
                    request_id,
                    key: COMMAND_RUNTIME_STORAGE_KEY.to_string(),
                    value: Value::Object(saved),
                },
            );
        }

        RuntimeEvent::HttpCompleted {
            request_id,
            url,
            status,
            body,
            now,
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Debug,
                "[command-runtime] HTTP request completed",
                json!({ "requestId": request_id, "url": url, "status": status }),
            ));
            model.cache.insert(
                request_id,
                json!({ "url": url, "status": status, "body": body, "completedAt": now }),
            );
        }

        RuntimeEvent::HttpFailed {
            request_id,
            url,
            error,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Warn,
                "[command-runtime] HTTP request failed",
                json!({ "requestId": request_id, "url": url, "error": error }),
            ));
        }

        RuntimeEvent::NavigateCompleted {
            request_id,
            url,
            now,
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Info,
                "[command-runtime] Navigation completed",
                json!({ "requestId": request_id, "url": url }),
            ));
            model
                .cache
                .insert(request_id, json!({ "url": url, "completedAt": now }));
        }

        RuntimeEvent::NavigateFailed {
            request_id,
            url,
            error,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Warn,
                "[command-runtime] Navigation failed",
                json!({ "requestId": request_id, "url": url, "error": error }),
            ));
        }

        RuntimeEvent::DomFactsFailed {
            request_id,
            kind,
            error,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Warn,
                "[command-runtime] TAKE_DOM_FACTS failed",
                json!({ "requestId": request_id, "kind": kind, "error": error }),
            ));
        }

        RuntimeEvent::StorageLoaded {
            request_id,
            key,
            value,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Debug,
                "[command-runtime] Storage loaded",
                json!({ "requestId": request_id, "key": key }),
            ));
            model.cache.insert(key, value);
        }

        RuntimeEvent::StorageFailed {
            request_id,
            key,
            error,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Warn,
                "[command-runtime] Storage failed",
                json!({ "requestId": request_id, "key": key, "error": error }),
            ));
        }

        RuntimeEvent::StorageSetCompleted {
            request_id, key, ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Debug,
                "[command-runtime] Storage set completed",
                json!({ "requestId": request_id, "key": key }),
            ));
        }

        RuntimeEvent::StorageSetFailed {
            request_id,
            key,
            error,
            ..
        } => {
            clear_in_flight(&mut model, &request_id);
            cmds.push(log(
                LogLevel::Warn,
                "[command-runtime] Storage set failed",
                json!({ "requestId": request_id, "key": key, "error": error }),
            ));
        }
    }

    UpdateResult { model, cmds }
}
