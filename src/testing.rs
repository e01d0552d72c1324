//! In-memory doubles for driving the stores and the sync layer without a
//! browser: a recording HTTP transport, a virtual clock and a harness that
//! wires them into an `AppContext` running on a `LocalPool`.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use crate::network::{ApiConfig, HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::scheduling::{TaskSpawner, TimerHandle, TimerService};
use crate::state::{AppContext, PlatformServices};
use crate::storage::{MemoryStorage, PersistenceAdapter};
use crate::sync::SyncSettings;

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

struct Route {
    method: HttpMethod,
    url_suffix: String,
    response: HttpResponse,
}

struct TransportLog {
    requests: Vec<HttpRequest>,
    queued: VecDeque<Result<HttpResponse, TransportError>>,
    routes: Vec<Route>,
    fallback: HttpResponse,
}

/// Records every request and answers from (in order) a one-shot queue,
/// per-route responses, then a fallback (`200 {}` by default).
#[derive(Clone)]
pub struct RecordingTransport {
    log: Rc<RefCell<TransportLog>>,
}

impl Default for RecordingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            log: Rc::new(RefCell::new(TransportLog {
                requests: Vec::new(),
                queued: VecDeque::new(),
                routes: Vec::new(),
                fallback: HttpResponse {
                    status: 200,
                    body: "{}".to_string(),
                },
            })),
        }
    }

    /// Answer every unmatched request with this response.
    pub fn respond_with(&self, status: u16, body: &str) {
        self.log.borrow_mut().fallback = HttpResponse {
            status,
            body: body.to_string(),
        };
    }

    /// Answer requests whose URL ends with `url_suffix`.
    pub fn route(&self, method: HttpMethod, url_suffix: &str, status: u16, body: &str) {
        self.log.borrow_mut().routes.push(Route {
            method,
            url_suffix: url_suffix.to_string(),
            response: HttpResponse {
                status,
                body: body.to_string(),
            },
        });
    }

    /// Answer the next request with this response, then fall back.
    pub fn push_response(&self, status: u16, body: &str) {
        self.log.borrow_mut().queued.push_back(Ok(HttpResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn fail_next(&self, message: &str) {
        self.log
            .borrow_mut()
            .queued
            .push_back(Err(TransportError::Network(message.to_string())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.borrow().requests.clone()
    }

    pub fn requests_to(&self, method: HttpMethod, url_suffix: &str) -> Vec<HttpRequest> {
        self.log
            .borrow()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.ends_with(url_suffix))
            .cloned()
            .collect()
    }

    pub fn body_json(&self, index: usize) -> Option<serde_json::Value> {
        let log = self.log.borrow();
        let body = log.requests.get(index)?.body.as_ref()?;
        serde_json::from_str(body).ok()
    }

    pub fn clear(&self) {
        self.log.borrow_mut().requests.clear();
    }
}

impl HttpTransport for RecordingTransport {
    fn send(&self, request: HttpRequest) -> LocalBoxFuture<'static, Result<HttpResponse, TransportError>> {
        let mut log = self.log.borrow_mut();
        let result = match log.queued.pop_front() {
            Some(result) => result,
            None => {
                let routed = log
                    .routes
                    .iter()
                    .find(|r| r.method == request.method && request.url.ends_with(&r.url_suffix))
                    .map(|r| r.response.clone());
                Ok(routed.unwrap_or_else(|| log.fallback.clone()))
            }
        };
        log.requests.push(request);
        futures::future::ready(result).boxed_local()
    }
}

// ---------------------------------------------------------------------------
// Virtual clock
// ---------------------------------------------------------------------------

enum Callback {
    Once(Box<dyn FnOnce()>),
    Repeat(Box<dyn FnMut()>),
}

struct Scheduled {
    due: f64,
    period: Option<u32>,
    callback: Callback,
}

#[derive(Default)]
struct ClockState {
    now: f64,
    next_id: u32,
    timers: BTreeMap<u32, Scheduled>,
    running: Option<u32>,
    running_cleared: bool,
}

/// Timers that only move when the test calls `advance`.  Callbacks run
/// synchronously inside `advance`, in due order.
#[derive(Clone, Default)]
pub struct ManualTimers {
    state: Rc<RefCell<ClockState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.state.borrow().now
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn advance(&self, ms: u32) {
        let target = self.now() + ms as f64;
        loop {
            let next = {
                let state = self.state.borrow();
                state
                    .timers
                    .iter()
                    .filter(|(_, t)| t.due <= target)
                    .min_by(|a, b| a.1.due.total_cmp(&b.1.due).then(a.0.cmp(b.0)))
                    .map(|(id, _)| *id)
            };
            let Some(id) = next else { break };

            let timer = {
                let mut state = self.state.borrow_mut();
                let Some(timer) = state.timers.remove(&id) else { break };
                state.now = state.now.max(timer.due);
                state.running = Some(id);
                state.running_cleared = false;
                timer
            };

            match timer.callback {
                Callback::Once(callback) => callback(),
                Callback::Repeat(mut callback) => {
                    callback();
                    let mut state = self.state.borrow_mut();
                    if !state.running_cleared {
                        let period = timer.period.unwrap_or(1).max(1);
                        state.timers.insert(
                            id,
                            Scheduled {
                                due: timer.due + period as f64,
                                period: timer.period,
                                callback: Callback::Repeat(callback),
                            },
                        );
                    }
                }
            }
            self.state.borrow_mut().running = None;
        }
        self.state.borrow_mut().now = target;
    }

    fn schedule(&self, delay: u32, period: Option<u32>, callback: Callback) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now + delay as f64;
        state.timers.insert(id, Scheduled { due, period, callback });
        TimerHandle(id)
    }
}

impl TimerService for ManualTimers {
    fn now_ms(&self) -> f64 {
        self.now()
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        self.schedule(delay_ms, None, Callback::Once(callback))
    }

    fn set_interval(&self, period_ms: u32, callback: Box<dyn FnMut()>) -> TimerHandle {
        self.schedule(period_ms, Some(period_ms), Callback::Repeat(callback))
    }

    fn clear(&self, handle: TimerHandle) {
        let mut state = self.state.borrow_mut();
        if state.timers.remove(&handle.0).is_none() && state.running == Some(handle.0) {
            state.running_cleared = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

impl TaskSpawner for LocalSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawn_local(task) {
            log::error!("Failed to spawn task on local pool: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A complete application context on in-memory services.
pub struct TestHarness {
    pub pool: LocalPool,
    pub storage: MemoryStorage,
    pub transport: RecordingTransport,
    pub timers: ManualTimers,
    pub context: Rc<AppContext>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_storage(MemoryStorage::new())
    }

    /// Reuse an existing cache, e.g. to simulate a page reload.
    pub fn with_storage(storage: MemoryStorage) -> Self {
        Self::build(storage, RecordingTransport::new(), SyncSettings::default())
    }

    pub fn build(storage: MemoryStorage, transport: RecordingTransport, settings: SyncSettings) -> Self {
        let pool = LocalPool::new();
        let timers = ManualTimers::new();
        let services = PlatformServices {
            storage: Rc::new(storage.clone()),
            transport: Rc::new(transport.clone()),
            timers: Rc::new(timers.clone()),
            spawner: Rc::new(pool.spawner()),
            api_config: ApiConfig::from_url("http://studio.test"),
            settings,
        };
        let context = AppContext::create(services);
        Self {
            pool,
            storage,
            transport,
            timers,
            context,
        }
    }

    pub fn persistence(&self) -> PersistenceAdapter {
        self.context.persistence().clone()
    }

    /// Move the clock forward and run whatever became ready.
    pub fn advance(&mut self, ms: u32) {
        self.timers.advance(ms);
        self.pool.run_until_stalled();
    }

    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    pub fn run_until<F: std::future::Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
