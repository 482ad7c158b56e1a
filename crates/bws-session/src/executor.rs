//! Background execution port.
//!
//! The session runs on a single logical interaction thread. Blocking work
//! (network calls, motion comparison) and delayed actions are handed to an
//! [`Executor`], which reports back by posting an [`Event`] into the
//! session's event queue. Results for handles that were cancelled or
//! unsubscribed in the meantime are dropped at delivery through
//! [`Executor::settle`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bws_client::UploadOutcome;
use bws_core::{BwsError, BwsToken};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ports::Frame;

/// Identifies one scheduled timer or background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

/// Delayed actions the session schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timer {
    FaceDetectionTimeout,
    MotionDetectionTimeout,
    /// Replay the current image pair after an upload failure.
    RetryPair,
    /// Start a new capture sequence after a failed verify/enroll call.
    RestartSequence,
}

/// Successful result of a background job.
#[derive(Debug)]
pub enum TaskOutput {
    Token(BwsToken),
    Uploaded(UploadOutcome),
    Finalized,
    Motion(bool),
}

pub type BackgroundWork = Box<dyn FnOnce() -> Result<TaskOutput, BwsError> + Send + 'static>;

/// Input to the session's state machine.
#[derive(Debug)]
pub enum Event {
    Frame(Frame),
    TimerFired {
        handle: TaskHandle,
        timer: Timer,
    },
    TaskFinished {
        handle: TaskHandle,
        result: Result<TaskOutput, BwsError>,
    },
    /// The job panicked instead of returning.
    TaskPanicked {
        handle: TaskHandle,
        message: String,
    },
}

pub trait Executor {
    /// Schedule `timer` to fire once after `delay`.
    fn run_after_delay(&mut self, delay: Duration, timer: Timer) -> TaskHandle;
    /// Cancel a pending timer. Unknown or fired handles are ignored.
    fn cancel(&mut self, handle: TaskHandle);
    fn cancel_all(&mut self);
    /// Run `work` off the interaction thread.
    fn run_in_background(&mut self, work: BackgroundWork) -> TaskHandle;
    /// Stop listening for a job's result. The job itself keeps running.
    fn unsubscribe(&mut self, handle: TaskHandle);
    fn unsubscribe_all(&mut self);
    /// Claim delivery of the event for `handle`. Returns false when the
    /// handle was cancelled, unsubscribed or already delivered.
    fn settle(&mut self, handle: TaskHandle) -> bool;
}

/// Dispatch a job result in callback order: `on_complete` first, then
/// `on_success` or `on_error`. An error from `on_complete` replaces the
/// job's own outcome and goes to `on_error`.
pub fn deliver<C, T, R>(
    result: Result<T, BwsError>,
    ctx: &mut C,
    on_complete: impl FnOnce(&mut C) -> Result<(), BwsError>,
    on_success: impl FnOnce(&mut C, T) -> R,
    on_error: impl FnOnce(&mut C, BwsError) -> R,
) -> R {
    if let Err(e) = on_complete(ctx) {
        return on_error(ctx, e);
    }
    match result {
        Ok(value) => on_success(ctx, value),
        Err(e) => on_error(ctx, e),
    }
}

/// [`Executor`] on a tokio runtime. Timers are tokio tasks, background work
/// runs on the blocking pool, and both report through an unbounded channel.
pub struct TokioExecutor {
    runtime: tokio::runtime::Handle,
    events: mpsc::UnboundedSender<Event>,
    next_handle: u64,
    timers: HashMap<TaskHandle, JoinHandle<()>>,
    subscribed: HashSet<TaskHandle>,
}

impl TokioExecutor {
    pub fn new(runtime: tokio::runtime::Handle, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            runtime,
            events,
            next_handle: 0,
            timers: HashMap::new(),
            subscribed: HashSet::new(),
        }
    }

    /// Executor on the runtime of the calling context. Panics outside a runtime.
    pub fn current(events: mpsc::UnboundedSender<Event>) -> Self {
        Self::new(tokio::runtime::Handle::current(), events)
    }

    fn allocate(&mut self) -> TaskHandle {
        self.next_handle += 1;
        TaskHandle(self.next_handle)
    }
}

impl Executor for TokioExecutor {
    fn run_after_delay(&mut self, delay: Duration, timer: Timer) -> TaskHandle {
        let handle = self.allocate();
        let tx = self.events.clone();
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::TimerFired { handle, timer });
        });
        self.timers.insert(handle, join);
        handle
    }

    fn cancel(&mut self, handle: TaskHandle) {
        if let Some(join) = self.timers.remove(&handle) {
            join.abort();
        }
    }

    fn cancel_all(&mut self) {
        for (_, join) in self.timers.drain() {
            join.abort();
        }
    }

    fn run_in_background(&mut self, work: BackgroundWork) -> TaskHandle {
        let handle = self.allocate();
        let tx = self.events.clone();
        let job = self.runtime.spawn_blocking(work);
        self.runtime.spawn(async move {
            let event = match job.await {
                Ok(result) => Event::TaskFinished { handle, result },
                Err(e) => Event::TaskPanicked {
                    handle,
                    message: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
        self.subscribed.insert(handle);
        handle
    }

    fn unsubscribe(&mut self, handle: TaskHandle) {
        self.subscribed.remove(&handle);
    }

    fn unsubscribe_all(&mut self) {
        self.subscribed.clear();
    }

    fn settle(&mut self, handle: TaskHandle) -> bool {
        self.timers.remove(&handle).is_some() || self.subscribed.remove(&handle)
    }
}
