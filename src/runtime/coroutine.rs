//! Coroutines
//!
//! A coroutine is one execution stack plus its scheduling state: whether it
//! is ready to run, what it is waiting for when it is not, the queue of
//! events addressed to it, and the continuation to invoke when its wait is
//! satisfied. Continuations are taken out of the slot before they run, so a
//! coroutine can be resumed at most once per suspension.

use crate::atom::Atom;
use crate::runtime::error::Exception;
use crate::runtime::message::{CreateCoroutinePayload, EventMsg, PageParams, RequestId};
use crate::runtime::stack::ExecutionStack;
use crate::runtime::timer::TimerId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

static NEXT_CID: AtomicU64 = AtomicU64::new(1);

/// Cap on undelivered events queued per coroutine.
const MAX_PENDING_EVENTS: usize = 64;

/// Process-unique coroutine identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoroutineId(u64);

impl CoroutineId {
    /// Allocate the next id.
    pub fn fresh() -> Self {
        CoroutineId(NEXT_CID.fetch_add(1, Ordering::Relaxed))
    }

    /// The id as a plain integer, for wire responses.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CoroutineId {
    fn from(raw: u64) -> Self {
        CoroutineId(raw)
    }
}

impl fmt::Display for CoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "co{}", self.0)
    }
}

/// Scheduling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Eligible for a step on the next pass.
    Ready,
    /// Currently executing a step.
    Running,
    /// Suspended; waiting for the event in the wait slot.
    Stopped,
    /// Finished; about to leave the scheduler.
    Exited,
}

/// What a stopped coroutine is waiting for.
#[derive(Debug, Clone)]
pub enum WaitSpec {
    /// A one-shot timer coming due.
    Timer(TimerId),
    /// The completion event of an outstanding request.
    Request(RequestId),
}

impl WaitSpec {
    /// Whether `msg` satisfies this wait. Timer waits are satisfied by the
    /// timer hub, never by a queued event.
    pub fn matches(&self, msg: &EventMsg) -> bool {
        match self {
            WaitSpec::Timer(_) => false,
            WaitSpec::Request(rid) => msg.request_id.as_ref() == Some(rid),
        }
    }
}

/// Continuation invoked when a suspended coroutine's wait is satisfied.
///
/// Receives the event that satisfied the wait, or `None` for timer resumes.
pub type Continuation =
    Box<dyn FnOnce(&mut crate::runtime::scheduler::OpCtx<'_>, Option<EventMsg>) + Send>;

/// One schedulable unit of execution.
pub struct Coroutine {
    /// Identity.
    pub cid: CoroutineId,
    /// The frame stack and execution flags.
    pub stack: ExecutionStack,
    /// Scheduling state.
    pub state: CoroutineState,
    /// Paused coroutines keep their state but are skipped by the scheduler.
    pub paused: bool,
    /// Coroutine to notify when this one finishes.
    pub curator: Option<CoroutineId>,
    /// Continuation for the current suspension, if any.
    pub continuation: Option<Continuation>,
    /// What the continuation is waiting for.
    pub wait: Option<WaitSpec>,
    /// Events delivered but not yet consumed.
    pub events: VecDeque<EventMsg>,
    /// Final result, once produced (by `exit` or the root's question).
    pub result: Option<Value>,
    /// Category of the uncaught exception that ended execution, if any.
    pub error_except: Option<Atom>,
    /// Whether the coroutine receives idle broadcasts.
    pub observe_idle: bool,
    /// Renderer page parameters.
    pub page: PageParams,
    /// Initial request data; becomes the root frame's question variable.
    pub request: Option<Value>,
    /// Element id to execute instead of the root body.
    pub body_id: Option<String>,
    /// Set after the renderer has been told about the first completed run.
    pub first_run_done: bool,
}

impl Coroutine {
    /// Build a coroutine from a creation payload.
    pub fn new(cid: CoroutineId, payload: CreateCoroutinePayload, max_depth: usize) -> Self {
        let CreateCoroutinePayload {
            vdom,
            curator,
            request,
            page,
            body_id,
            observe_idle,
        } = payload;
        Coroutine {
            cid,
            stack: ExecutionStack::new(vdom, max_depth),
            state: CoroutineState::Ready,
            paused: false,
            curator,
            continuation: None,
            wait: None,
            events: VecDeque::new(),
            result: None,
            error_except: None,
            observe_idle,
            page,
            request,
            body_id,
            first_run_done: false,
        }
    }

    /// Suspend: record the wait and continuation, move to `Stopped`.
    ///
    /// Only a running coroutine with no outstanding continuation may yield;
    /// violating either is a runtime bug and panics.
    pub fn yield_with(&mut self, wait: WaitSpec, continuation: Continuation) {
        assert_eq!(
            self.state,
            CoroutineState::Running,
            "yield from a coroutine that is not running"
        );
        assert!(
            self.continuation.is_none(),
            "yield with a continuation already pending"
        );
        self.wait = Some(wait);
        self.continuation = Some(continuation);
        self.state = CoroutineState::Stopped;
    }

    /// Queue an event for later dispatch. The queue is bounded; once full,
    /// the oldest undelivered event is dropped to make room.
    pub fn deliver(&mut self, msg: EventMsg) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            if let Some(dropped) = self.events.pop_front() {
                debug!(cid = %self.cid, kind = %dropped.kind, "event queue full, oldest dropped");
            }
        }
        self.events.push_back(msg);
    }

    /// Record an uncaught exception as this coroutine's terminal status.
    pub fn record_uncaught(&mut self, exception: &Exception) {
        self.error_except = Some(exception.category);
    }
}
