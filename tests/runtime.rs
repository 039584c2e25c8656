use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use serde_json::json;

use xeg_runtime::cmd::{HttpMethod, HttpResponseType, LogContext, LogLevel, NavigateMode};
use xeg_runtime::dom_facts::{extract_facts, DomFacts, DomFactsKind, DomFactsProvider};
use xeg_runtime::events::RuntimeEvent;
use xeg_runtime::http::{HttpRequest, HttpResponse, HttpTransport};
use xeg_runtime::logging::LogSink;
use xeg_runtime::navigation::{NavigateRequest, NavigationError, Navigator};
use xeg_runtime::policy::{APP_SETTINGS_STORAGE_KEY, COMMAND_RUNTIME_STORAGE_KEY};
use xeg_runtime::runtime::{Adapters, Clock, Runtime, RuntimeDeps, Timeouts};
use xeg_runtime::storage::{KeyValueStore, MemoryStore};

const PAGE: &str = r#"<div data-testid="tweetPhoto"><img src="https://pbs.twimg.com/media/A"></div>"#;

struct FixedClock(AtomicI64);

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingLog {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingLog {
    fn messages(&self, level: LogLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl LogSink for RecordingLog {
    fn log(&self, level: LogLevel, message: &str, _context: Option<&LogContext>) -> Result<()> {
        self.lines.lock().push((level, message.to_string()));
        Ok(())
    }
}

struct StaticFacts;

impl DomFactsProvider for StaticFacts {
    fn take(&self, kind: DomFactsKind) -> Result<DomFacts> {
        Ok(extract_facts(kind, Some("https://x.com/home"), PAGE))
    }
}

struct HangingFacts;

impl DomFactsProvider for HangingFacts {
    fn take(&self, _kind: DomFactsKind) -> Result<DomFacts> {
        thread::sleep(Duration::from_secs(2));
        bail!("too late")
    }
}

struct EchoHttp;

impl HttpTransport for EchoHttp {
    fn request(&self, request: &HttpRequest) -> Result<HttpResponse> {
        if request.url.contains("offline") {
            bail!("connection refused");
        }
        Ok(HttpResponse {
            status: 200,
            body: json!({ "echo": request.url }),
        })
    }
}

struct PickyNavigator;

impl Navigator for PickyNavigator {
    fn navigate(&self, request: &NavigateRequest) -> Result<()> {
        if request.mode == NavigateMode::Open {
            return Err(NavigationError::PopupBlocked.into());
        }
        Ok(())
    }
}

struct Harness {
    runtime: Runtime,
    store: Arc<MemoryStore>,
    log: Arc<RecordingLog>,
}

fn harness(dom_facts: Arc<dyn DomFactsProvider>, timeouts: Timeouts) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let log = Arc::new(RecordingLog::default());
    let runtime = Runtime::new(RuntimeDeps {
        adapters: Adapters {
            storage: store.clone(),
            http: Arc::new(EchoHttp),
            navigator: Arc::new(PickyNavigator),
            dom_facts,
            log: log.clone(),
        },
        timeouts,
        clock: Arc::new(FixedClock(AtomicI64::new(1_000))),
        workers: 2,
    })
    .unwrap();
    Harness {
        runtime,
        store,
        log,
    }
}

fn boot(runtime: &Runtime) {
    runtime
        .dispatch(RuntimeEvent::Booted {
            url: "https://x.com/home".into(),
            now: 1,
        })
        .unwrap();
}

#[test]
fn boot_settles_and_persists_facts() {
    let h = harness(Arc::new(StaticFacts), Timeouts::default());
    h.store
        .set(APP_SETTINGS_STORAGE_KEY, &json!({"theme": "dark"}))
        .unwrap();

    boot(&h.runtime);
    assert!(h.runtime.run_until_idle(Duration::from_secs(5)));

    let model = h.runtime.model();
    assert!(model.in_flight.is_empty());
    assert_eq!(model.cache[APP_SETTINGS_STORAGE_KEY], json!({"theme": "dark"}));
    assert!(model.cache.contains_key(COMMAND_RUNTIME_STORAGE_KEY));
    let facts = model.last_facts.expect("facts recorded");
    assert_eq!(facts.media_elements_count, 1);
    assert_eq!(model.request_seq, 4);

    let saved = h.store.snapshot();
    let persisted = &saved[COMMAND_RUNTIME_STORAGE_KEY];
    assert_eq!(persisted["lastFacts"]["mediaElementsCount"], 1);
    assert!(persisted["savedAt"].is_i64());

    let info = h.log.messages(LogLevel::Info);
    assert_eq!(info, vec!["[command-runtime] Booted".to_string()]);
    assert!(h
        .log
        .messages(LogLevel::Debug)
        .contains(&"[command-runtime] Storage set completed".to_string()));
}

#[test]
fn hung_adapter_times_out() {
    let timeouts = Timeouts {
        dom_facts: Duration::from_millis(50),
        ..Timeouts::default()
    };
    let h = harness(Arc::new(HangingFacts), timeouts);
    boot(&h.runtime);
    assert!(h.runtime.run_until_idle(Duration::from_secs(5)));

    let model = h.runtime.model();
    assert!(model.last_facts.is_none());
    assert!(model.in_flight.is_empty());
    assert!(h
        .log
        .messages(LogLevel::Warn)
        .contains(&"[command-runtime] TAKE_DOM_FACTS failed".to_string()));
}

#[test]
fn http_and_navigation_results_are_cached_by_request_id() {
    let h = harness(Arc::new(StaticFacts), Timeouts::default());
    let handle = h.runtime.handle();
    for url in ["https://api.example/ok", "https://offline.example/"] {
        handle
            .dispatch(RuntimeEvent::HttpRequested {
                url: url.into(),
                method: HttpMethod::Get,
                response_type: HttpResponseType::Json,
                headers: None,
                body: None,
                now: 5,
            })
            .unwrap();
    }
    for mode in [NavigateMode::Assign, NavigateMode::Open] {
        handle
            .dispatch(RuntimeEvent::NavigateRequested {
                url: "https://x.com/alice".into(),
                mode,
                target: None,
                now: 6,
            })
            .unwrap();
    }
    assert!(h.runtime.run_until_idle(Duration::from_secs(5)));

    let model = h.runtime.model();
    assert_eq!(model.cache["http:0"]["status"], 200);
    assert_eq!(model.cache["http:0"]["body"]["echo"], "https://api.example/ok");
    assert!(!model.cache.contains_key("http:1"));
    assert_eq!(model.cache["navigate:2"]["url"], "https://x.com/alice");
    assert!(!model.cache.contains_key("navigate:3"));

    let warnings = h.log.messages(LogLevel::Warn);
    assert!(warnings.contains(&"[command-runtime] HTTP request failed".to_string()));
    assert!(warnings.contains(&"[command-runtime] Navigation failed".to_string()));
}

#[test]
fn dispatch_json_skips_unknown_types() {
    let h = harness(Arc::new(StaticFacts), Timeouts::default());
    let handle = h.runtime.handle();
    assert!(!handle
        .dispatch_json(r#"{"type":"GalleryOpened","now":1}"#)
        .unwrap());
    assert!(handle
        .dispatch_json(r#"{"type":"Tick","tickId":"command-runtime:main","now":2}"#)
        .unwrap());
    assert!(handle.dispatch_json(r#"{"type":"Tick"}"#).is_err());

    assert!(h.runtime.process_pending() >= 1);
    assert!(h.runtime.run_until_idle(Duration::from_secs(5)));
    assert!(h.runtime.model().last_facts.is_some());
}

#[test]
fn tick_requests_facts_without_rescheduling() {
    let h = harness(Arc::new(StaticFacts), Timeouts::default());
    let handle = h.runtime.handle();
    handle
        .dispatch(RuntimeEvent::Tick {
            tick_id: "manual".into(),
            now: 1,
        })
        .unwrap();
    assert!(h.runtime.run_until_idle(Duration::from_secs(5)));
    let model = h.runtime.model();
    assert_eq!(model.request_seq, 2);
    assert!(model.schedule.tick_id.is_none());
    assert!(model.last_facts.is_some());
}

#[test]
fn stopped_runtime_rejects_events() {
    let mut h = harness(Arc::new(StaticFacts), Timeouts::default());
    let handle = h.runtime.handle();
    h.runtime.stop();
    assert!(handle.is_stopped());
    assert!(handle
        .dispatch(RuntimeEvent::Booted {
            url: "https://x.com/home".into(),
            now: 1,
        })
        .is_err());
    assert!(!h.runtime.run_until_idle(Duration::from_millis(10)));
}

#[test]
fn run_returns_after_stop() {
    let mut h = harness(Arc::new(StaticFacts), Timeouts::default());
    let handle = h.runtime.handle();
    boot(&h.runtime);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.stop();
    });
    h.runtime.run();
    stopper.join().unwrap();
    assert!(h.runtime.is_stopped());
    assert!(h.runtime.model().url.is_some());
}
