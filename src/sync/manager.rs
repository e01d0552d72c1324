use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

use crate::network::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::scheduling::{DebouncePolicy, Debouncer, TaskSpawner, TimerHandle, TimerService};

pub type PreparePayload = Rc<dyn Fn() -> Option<Value>>;
pub type ShouldSync = Rc<dyn Fn() -> bool>;
pub type OnSyncSuccess = Rc<dyn Fn(&HttpResponse)>;
pub type OnSyncError = Rc<dyn Fn(&SyncError)>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("sync rejected with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to serialize sync payload: {0}")]
    Serialize(String),
}

/// What to send, where, and when.
#[derive(Clone)]
pub struct SyncConfig {
    pub name: String,
    pub endpoint: String,
    pub method: HttpMethod,
    /// `None` (or JSON `null`) means there is nothing to sync right now.
    pub prepare_payload: PreparePayload,
    pub debounce: Option<DebouncePolicy>,
    /// Period of the background sync timer, if any.
    pub sync_on_interval: Option<u32>,
    pub sync_on_exit: bool,
    pub should_sync: Option<ShouldSync>,
    pub on_sync_success: Option<OnSyncSuccess>,
    pub on_sync_error: Option<OnSyncError>,
}

impl SyncConfig {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        prepare_payload: impl Fn() -> Option<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            method: HttpMethod::Post,
            prepare_payload: Rc::new(prepare_payload),
            debounce: None,
            sync_on_interval: None,
            sync_on_exit: false,
            should_sync: None,
            on_sync_success: None,
            on_sync_error: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn debounce(mut self, policy: DebouncePolicy) -> Self {
        self.debounce = Some(policy);
        self
    }

    pub fn sync_on_interval(mut self, period_ms: u32) -> Self {
        self.sync_on_interval = Some(period_ms);
        self
    }

    pub fn sync_on_exit(mut self, enabled: bool) -> Self {
        self.sync_on_exit = enabled;
        self
    }

    pub fn should_sync(mut self, guard: impl Fn() -> bool + 'static) -> Self {
        self.should_sync = Some(Rc::new(guard));
        self
    }

    pub fn on_sync_success(mut self, callback: impl Fn(&HttpResponse) + 'static) -> Self {
        self.on_sync_success = Some(Rc::new(callback));
        self
    }

    pub fn on_sync_error(mut self, callback: impl Fn(&SyncError) + 'static) -> Self {
        self.on_sync_error = Some(Rc::new(callback));
        self
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("debounce", &self.debounce)
            .field("sync_on_interval", &self.sync_on_interval)
            .field("sync_on_exit", &self.sync_on_exit)
            .finish_non_exhaustive()
    }
}

enum Prepared {
    Skip,
    Request(HttpRequest),
    Failed(SyncError),
}

struct Inner {
    config: SyncConfig,
    transport: Rc<dyn HttpTransport>,
    timers: Rc<dyn TimerService>,
    spawner: Rc<dyn TaskSpawner>,
    debouncer: RefCell<Option<Debouncer>>,
    pending_timer: Cell<Option<TimerHandle>>,
    interval_timer: Cell<Option<TimerHandle>>,
    waiters: RefCell<Vec<oneshot::Sender<bool>>>,
    in_flight: Cell<u32>,
    disposed: Cell<bool>,
}

impl Inner {
    fn prepare(&self, keepalive: bool) -> Prepared {
        let config = &self.config;
        if let Some(should_sync) = &config.should_sync {
            if !should_sync() {
                log::debug!("[{}] sync skipped by guard", config.name);
                return Prepared::Skip;
            }
        }
        let payload = match (config.prepare_payload)() {
            Some(payload) if !payload.is_null() => payload,
            _ => {
                log::debug!("[{}] nothing to sync", config.name);
                return Prepared::Skip;
            }
        };
        match serde_json::to_string(&payload) {
            Ok(body) => Prepared::Request(
                HttpRequest::new(config.method, config.endpoint.clone())
                    .with_body(body)
                    .with_keepalive(keepalive),
            ),
            Err(e) => Prepared::Failed(SyncError::Serialize(e.to_string())),
        }
    }

    fn report_error(&self, error: &SyncError) {
        log::warn!("[{}] sync failed: {}", self.config.name, error);
        if let Some(callback) = &self.config.on_sync_error {
            callback(error);
        }
    }

    fn complete(&self, result: Result<HttpResponse, TransportError>) -> bool {
        match result {
            Ok(resp) if resp.is_success() => {
                log::debug!("[{}] synced ({})", self.config.name, resp.status);
                if let Some(callback) = &self.config.on_sync_success {
                    callback(&resp);
                }
                true
            }
            Ok(resp) => {
                self.report_error(&SyncError::Status {
                    status: resp.status,
                    body: resp.body,
                });
                false
            }
            Err(e) => {
                self.report_error(&SyncError::Transport(e));
                false
            }
        }
    }

    fn cancel_pending(&self) -> Vec<oneshot::Sender<bool>> {
        if let Some(handle) = self.pending_timer.take() {
            self.timers.clear(handle);
        }
        if let Some(debouncer) = self.debouncer.borrow_mut().as_mut() {
            debouncer.finish();
        }
        std::mem::take(&mut *self.waiters.borrow_mut())
    }
}

/// Prepare synchronously and issue the request right away; the returned
/// future only waits for the response.
fn begin(inner: &Rc<Inner>, keepalive: bool) -> LocalBoxFuture<'static, bool> {
    let request = match inner.prepare(keepalive) {
        Prepared::Skip => return future::ready(true).boxed_local(),
        Prepared::Failed(error) => {
            inner.report_error(&error);
            return future::ready(false).boxed_local();
        }
        Prepared::Request(request) => request,
    };

    inner.in_flight.set(inner.in_flight.get() + 1);
    let pending = inner.transport.send(request);
    let inner = inner.clone();
    async move {
        let result = pending.await;
        inner.in_flight.set(inner.in_flight.get().saturating_sub(1));
        inner.complete(result)
    }
    .boxed_local()
}

/// Run a sync and hand its outcome to everyone who was waiting on it.
fn begin_for_waiters(inner: &Rc<Inner>, keepalive: bool, waiters: Vec<oneshot::Sender<bool>>) {
    let task = begin(inner, keepalive);
    inner.spawner.spawn(
        async move {
            let ok = task.await;
            for waiter in waiters {
                let _ = waiter.send(ok);
            }
        }
        .boxed_local(),
    );
}

fn fire_debounced(inner: Rc<Inner>) {
    inner.pending_timer.set(None);
    if let Some(debouncer) = inner.debouncer.borrow_mut().as_mut() {
        debouncer.finish();
    }
    let waiters = std::mem::take(&mut *inner.waiters.borrow_mut());
    begin_for_waiters(&inner, false, waiters);
}

/// Debounced, best-effort push of locally computed state to one endpoint.
///
/// Clones share the same timers and in-flight bookkeeping.  A failed sync is
/// reported through `on_sync_error` and otherwise dropped: the next trigger is
/// the retry.
#[derive(Clone)]
pub struct SyncManager {
    inner: Rc<Inner>,
}

impl SyncManager {
    /// Building a manager never syncs; it only arms the interval timer.
    pub fn new(
        config: SyncConfig,
        transport: Rc<dyn HttpTransport>,
        timers: Rc<dyn TimerService>,
        spawner: Rc<dyn TaskSpawner>,
    ) -> Self {
        let debouncer = config.debounce.map(Debouncer::new);
        let interval = config.sync_on_interval;
        let manager = Self {
            inner: Rc::new(Inner {
                config,
                transport,
                timers,
                spawner,
                debouncer: RefCell::new(debouncer),
                pending_timer: Cell::new(None),
                interval_timer: Cell::new(None),
                waiters: RefCell::new(Vec::new()),
                in_flight: Cell::new(0),
                disposed: Cell::new(false),
            }),
        };
        if let Some(period) = interval {
            manager.start_interval(period);
        }
        manager
    }

    fn start_interval(&self, period_ms: u32) {
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        let handle = self.inner.timers.set_interval(
            period_ms,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if !inner.disposed.get() {
                        let task = begin(&inner, false);
                        inner.spawner.spawn(task.map(|_| ()).boxed_local());
                    }
                }
            }),
        );
        self.inner.interval_timer.set(Some(handle));
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Sync now.  Resolves `true` on success or when there was nothing to
    /// send, `false` on any failure.  Never panics.
    pub fn sync(&self) -> LocalBoxFuture<'static, bool> {
        begin(&self.inner, false)
    }

    /// Sync now without waiting for the response.
    pub fn fire_and_forget_sync(&self) {
        let task = begin(&self.inner, false);
        self.inner.spawner.spawn(task.map(|_| ()).boxed_local());
    }

    /// Coalesce calls into one trailing sync, forced once `max_wait` has
    /// passed since the first call of the burst.  Every caller of the burst
    /// gets that sync's outcome.  Without a debounce policy this is `sync()`.
    pub fn debounced_sync(&self) -> LocalBoxFuture<'static, bool> {
        let inner = &self.inner;
        if inner.disposed.get() {
            log::debug!("[{}] debounced sync after dispose ignored", inner.config.name);
            return future::ready(false).boxed_local();
        }

        let now = inner.timers.now_ms();
        let wait = match inner.debouncer.borrow_mut().as_mut() {
            Some(debouncer) => debouncer.call(now),
            None => return self.sync(),
        };

        let (tx, rx) = oneshot::channel();
        inner.waiters.borrow_mut().push(tx);

        if let Some(handle) = inner.pending_timer.take() {
            inner.timers.clear(handle);
        }
        let weak = Rc::downgrade(inner);
        let handle = inner.timers.set_timeout(
            wait,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    fire_debounced(inner);
                }
            }),
        );
        inner.pending_timer.set(Some(handle));

        async move { rx.await.unwrap_or(false) }.boxed_local()
    }

    /// Page is closing: drop the pending debounce and send immediately with
    /// keep-alive.  Only managers configured with `sync_on_exit` do anything.
    pub fn flush_on_exit(&self) -> bool {
        let inner = &self.inner;
        if !inner.config.sync_on_exit || inner.disposed.get() {
            return false;
        }
        let waiters = inner.cancel_pending();
        begin_for_waiters(inner, true, waiters);
        true
    }

    /// Stop all timers.  Pending debounced callers resolve `false`; requests
    /// already sent still complete and report.  Idempotent.
    pub fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.replace(true) {
            return;
        }
        drop(inner.cancel_pending());
        if let Some(handle) = inner.interval_timer.take() {
            inner.timers.clear(handle);
        }
        log::debug!("[{}] sync manager disposed", inner.config.name);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_flight.get() > 0
    }

    pub fn has_pending_sync(&self) -> bool {
        self.inner.pending_timer.get().is_some()
    }
}

impl fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncManager")
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.in_flight.get())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}
