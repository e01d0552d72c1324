//! Scheduling primitives for the sync layer.
//!
//! • `Debouncer` – pure trailing-debounce-with-max-wait policy.  It only does
//!   arithmetic on timestamps, so the coalescing rules are testable without
//!   timers or HTTP.
//! • `TimerService` – set/clear timeouts and intervals.  `BrowserTimers`
//!   drives them with `gloo-timers`; tests use a virtual clock.
//! • `TaskSpawner` – where fire-and-forget futures run.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use gloo_timers::future::TimeoutFuture;

/// Coalescing window for a debounced sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    /// Quiet period after the last call before the sync fires.
    pub delay_ms: u32,
    /// Upper bound on how long a continuous burst can postpone the sync.
    pub max_wait_ms: u32,
}

impl DebouncePolicy {
    /// `max_wait_ms` is raised to `delay_ms` when smaller.
    pub fn new(delay_ms: u32, max_wait_ms: u32) -> Self {
        Self {
            delay_ms,
            max_wait_ms: max_wait_ms.max(delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    policy: DebouncePolicy,
    burst_started_at: Option<f64>,
}

impl Debouncer {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            burst_started_at: None,
        }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    /// Register a call made at `now_ms` and return how many milliseconds to
    /// wait before firing: `delay` after this call, but never later than
    /// `max_wait` after the first call of the burst.
    pub fn call(&mut self, now_ms: f64) -> u32 {
        let started = *self.burst_started_at.get_or_insert(now_ms);
        let trailing = now_ms + self.policy.delay_ms as f64;
        let forced = started + self.policy.max_wait_ms as f64;
        let deadline = trailing.min(forced);
        (deadline - now_ms).max(0.0).ceil() as u32
    }

    pub fn is_pending(&self) -> bool {
        self.burst_started_at.is_some()
    }

    /// End the current burst (the timer fired, was flushed or cancelled).
    pub fn finish(&mut self) {
        self.burst_started_at = None;
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u32);

pub trait TimerService {
    /// Milliseconds since an arbitrary, monotonic-enough origin.
    fn now_ms(&self) -> f64;
    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle;
    fn set_interval(&self, period_ms: u32, callback: Box<dyn FnMut()>) -> TimerHandle;
    /// Clearing an unknown or already fired handle is a no-op.
    fn clear(&self, handle: TimerHandle);
}

/// Browser timers built on `gloo-timers` futures.  Each timer is a spawned
/// task plus a cancellation flag, so clearing never drops a JS closure while
/// it may still be running.
#[derive(Default)]
pub struct BrowserTimers {
    next_id: Cell<u32>,
    active: Rc<RefCell<HashMap<u32, Rc<Cell<bool>>>>>,
}

impl BrowserTimers {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> (TimerHandle, Rc<Cell<bool>>) {
        let id = self.next_id.get().wrapping_add(1);
        self.next_id.set(id);
        let cancelled = Rc::new(Cell::new(false));
        self.active.borrow_mut().insert(id, cancelled.clone());
        (TimerHandle(id), cancelled)
    }
}

impl TimerService for BrowserTimers {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn set_timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        let (handle, cancelled) = self.register();
        let active = self.active.clone();
        wasm_bindgen_futures::spawn_local(async move {
            TimeoutFuture::new(delay_ms).await;
            active.borrow_mut().remove(&handle.0);
            if !cancelled.get() {
                callback();
            }
        });
        handle
    }

    fn set_interval(&self, period_ms: u32, mut callback: Box<dyn FnMut()>) -> TimerHandle {
        let (handle, cancelled) = self.register();
        wasm_bindgen_futures::spawn_local(async move {
            loop {
                TimeoutFuture::new(period_ms).await;
                if cancelled.get() {
                    break;
                }
                callback();
            }
        });
        handle
    }

    fn clear(&self, handle: TimerHandle) {
        if let Some(cancelled) = self.active.borrow_mut().remove(&handle.0) {
            cancelled.set(true);
        }
    }
}

// ---------------------------------------------------------------------------
// Task spawning
// ---------------------------------------------------------------------------

pub trait TaskSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Runs tasks on the browser microtask queue.
pub struct BrowserSpawner;

impl TaskSpawner for BrowserSpawner {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Replays `calls` against a single rescheduled timer the way the sync
    /// manager uses the debouncer, returning the times at which it fired.
    fn simulate(policy: DebouncePolicy, calls: &[u32]) -> Vec<f64> {
        let mut debouncer = Debouncer::new(policy);
        let mut deadline: Option<f64> = None;
        let mut fires = Vec::new();
        for &at in calls {
            let at = at as f64;
            if let Some(due) = deadline {
                if due <= at {
                    fires.push(due);
                    debouncer.finish();
                    deadline = None;
                }
            }
            let wait = debouncer.call(at);
            deadline = Some(at + wait as f64);
        }
        if let Some(due) = deadline {
            fires.push(due);
        }
        fires
    }

    fn call_times(gaps: &[u32]) -> Vec<u32> {
        let mut at = 0;
        let mut times = vec![0];
        for gap in gaps {
            at += gap;
            times.push(at);
        }
        times
    }

    #[test]
    fn single_call_waits_for_delay() {
        let mut debouncer = Debouncer::new(DebouncePolicy::new(300, 1000));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.call(10.0), 300);
        assert!(debouncer.is_pending());
    }

    #[test]
    fn later_calls_are_capped_by_max_wait() {
        let mut debouncer = Debouncer::new(DebouncePolicy::new(300, 1000));
        assert_eq!(debouncer.call(0.0), 300);
        assert_eq!(debouncer.call(250.0), 300);
        assert_eq!(debouncer.call(800.0), 200);
        assert_eq!(debouncer.call(999.0), 1);
    }

    #[test]
    fn finish_starts_a_fresh_burst() {
        let mut debouncer = Debouncer::new(DebouncePolicy::new(300, 1000));
        debouncer.call(0.0);
        debouncer.finish();
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.call(5000.0), 300);
    }

    #[test]
    fn max_wait_is_never_below_delay() {
        let policy = DebouncePolicy::new(500, 100);
        assert_eq!(policy.max_wait_ms, 500);
    }

    #[test]
    fn continuous_burst_fires_at_max_wait() {
        let policy = DebouncePolicy::new(100, 1000);
        let gaps = vec![50; 40];
        let fires = simulate(policy, &call_times(&gaps));
        assert_eq!(fires.first().copied(), Some(1000.0));
    }

    proptest! {
        #[test]
        fn burst_within_max_wait_fires_once_after_last_call(
            gaps in proptest::collection::vec(0u32..100, 0..20)
        ) {
            let policy = DebouncePolicy::new(100, 100 * 21);
            let calls = call_times(&gaps);
            let last = *calls.last().unwrap() as f64;
            let fires = simulate(policy, &calls);
            prop_assert_eq!(fires, vec![last + 100.0]);
        }

        #[test]
        fn long_burst_fires_before_it_ends(
            gaps in proptest::collection::vec(1u32..100, 30..60)
        ) {
            let policy = DebouncePolicy::new(100, 500);
            let calls = call_times(&gaps);
            let last = *calls.last().unwrap() as f64;
            prop_assume!(last > 500.0);
            let fires = simulate(policy, &calls);
            prop_assert!(fires.len() >= 2);
            prop_assert!(fires[0] <= 500.0);
            prop_assert!(fires[0] < last);
        }
    }
}
