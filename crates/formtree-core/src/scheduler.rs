#![forbid(unsafe_code)]

//! Time source, debounce timers and a local task queue.
//!
//! The form never sleeps and never spawns threads. Debounced work is parked
//! as a timer keyed by a string; re-arming a key replaces the pending timer
//! (latest wins). Async validation runs as local tasks polled by
//! [`Scheduler::run_until_stalled`]. The host drives both by calling
//! [`Scheduler::tick`] from its event loop, with either the system clock or a
//! [`ManualClock`] that tests advance explicitly.
//!
//! # Invariants
//!
//! 1. At most one timer per key is pending.
//! 2. Timers fire in deadline order; ties fire in arming order.
//! 3. A timer armed while timers are firing is not fired by the same tick
//!    unless it is already due.
//! 4. Spawned tasks are polled immediately and then on every tick until they
//!    complete; nested calls to `run_until_stalled` are no-ops.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::task::{self, ArcWake};
use web_time::Instant;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A manually advanced clock for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Monotonic time since the clock was created.
#[derive(Debug, Clone)]
pub enum Clock {
    System { origin: Instant },
    Manual(ManualClock),
}

impl Default for Clock {
    fn default() -> Self {
        Self::system()
    }
}

impl Clock {
    #[must_use]
    pub fn system() -> Self {
        Self::System {
            origin: Instant::now(),
        }
    }

    #[must_use]
    pub fn manual(clock: &ManualClock) -> Self {
        Self::Manual(clock.clone())
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        match self {
            Self::System { origin } => origin.elapsed(),
            Self::Manual(clock) => clock.now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct Timer {
    key: String,
    deadline: Duration,
    seq: u64,
    task: Box<dyn FnOnce()>,
}

struct SchedulerInner {
    clock: Clock,
    timers: RefCell<Vec<Timer>>,
    next_seq: Cell<u64>,
    tasks: RefCell<FuturesUnordered<LocalBoxFuture<'static, ()>>>,
    incoming: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    running: Cell<bool>,
}

/// Debounce timers plus a local task queue. Cloning shares the queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

/// What one [`Scheduler::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub timers_fired: usize,
    pub tasks_completed: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Clock::system())
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                clock,
                timers: RefCell::new(Vec::new()),
                next_seq: Cell::new(0),
                tasks: RefCell::new(FuturesUnordered::new()),
                incoming: RefCell::new(Vec::new()),
                running: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    /// Arm (or re-arm) the timer for `key`.
    pub fn debounce(&self, key: impl Into<String>, delay: Duration, task: impl FnOnce() + 'static) {
        let key = key.into();
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        let deadline = self.now() + delay;

        let mut timers = self.inner.timers.borrow_mut();
        let replaced = timers.len();
        timers.retain(|t| t.key != key);
        if timers.len() != replaced {
            tracing::trace!(key = %key, "debounce timer restarted");
        }
        timers.push(Timer {
            key,
            deadline,
            seq,
            task: Box::new(task),
        });
    }

    /// Drop the pending timer for `key`. Returns whether one existed.
    pub fn cancel(&self, key: &str) -> bool {
        let mut timers = self.inner.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|t| t.key != key);
        timers.len() != before
    }

    /// Drop every pending timer. Returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let mut timers = self.inner.timers.borrow_mut();
        let count = timers.len();
        timers.clear();
        count
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.borrow().len()
    }

    #[must_use]
    pub fn has_timer(&self, key: &str) -> bool {
        self.inner.timers.borrow().iter().any(|t| t.key == key)
    }

    /// Earliest pending deadline, for hosts that sleep until the next tick.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.timers.borrow().iter().map(|t| t.deadline).min()
    }

    /// Queue a local task and poll it right away.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        self.inner.incoming.borrow_mut().push(Box::pin(task));
        self.run_until_stalled();
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.tasks.borrow().len() + self.inner.incoming.borrow().len()
    }

    /// Fire due timers, then poll tasks until none can make progress.
    pub fn tick(&self) -> TickReport {
        let now = self.now();
        let mut report = TickReport::default();
        while let Some(timer) = self.take_due(now) {
            tracing::trace!(key = %timer.key, "debounce timer fired");
            (timer.task)();
            report.timers_fired += 1;
        }
        report.tasks_completed = self.run_until_stalled();
        report
    }

    fn take_due(&self, now: Duration) -> Option<Timer> {
        let mut timers = self.inner.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| (t.deadline, t.seq))
            .map(|(i, _)| i)?;
        Some(timers.remove(index))
    }

    /// Poll every queued task until all are blocked or done. Returns the
    /// number of tasks that completed.
    pub fn run_until_stalled(&self) -> usize {
        if self.inner.running.replace(true) {
            return 0;
        }
        let flag = Arc::new(WakeFlag(AtomicBool::new(false)));
        let waker = task::waker(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        let mut completed = 0;
        loop {
            let fresh: Vec<_> = self.inner.incoming.borrow_mut().drain(..).collect();
            {
                let tasks = self.inner.tasks.borrow();
                for task in fresh {
                    tasks.push(task);
                }
            }
            flag.0.store(false, Ordering::Relaxed);
            let polled = self.inner.tasks.borrow_mut().poll_next_unpin(&mut cx);
            match polled {
                Poll::Ready(Some(())) => completed += 1,
                Poll::Ready(None) | Poll::Pending => {
                    let woken = flag.0.swap(false, Ordering::Relaxed);
                    if !woken && self.inner.incoming.borrow().is_empty() {
                        break;
                    }
                }
            }
        }
        self.inner.running.set(false);
        completed
    }
}

/// Records that some task asked to be polled again.
struct WakeFlag(AtomicBool);

impl ArcWake for WakeFlag {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.store(true, Ordering::Relaxed);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .field("pending_timers", &self.pending_timers())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}
