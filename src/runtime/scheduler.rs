//! Cooperative scheduler
//!
//! One scheduler per instance, never shared across threads. A scheduling
//! pass gives every ready coroutine exactly one step, then dispatches due
//! timers and queued events to the suspended ones, then broadcasts idle if
//! nothing has happened for a while. Within a coroutine, steps follow strict
//! document order; across coroutines the pass iterates ids in ascending
//! order, which makes interleaving deterministic for tests.

use crate::atom::Atom;
use crate::runtime::coroutine::{Coroutine, CoroutineId, CoroutineState, WaitSpec};
use crate::runtime::fetcher::{Fetcher, FetchToken};
use crate::runtime::message::{event, CreateCoroutinePayload, EventMsg, InstanceMsg};
use crate::runtime::ops;
use crate::runtime::renderer::{NullRenderer, RendererLink};
use crate::runtime::timer::{Clock, TimerHub};
use crate::runtime::RuntimeConfig;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Everything an element operation may touch besides its own coroutine.
pub struct OpCtx<'a> {
    /// The coroutine being stepped.
    pub co: &'a mut Coroutine,
    /// Instance-wide services.
    pub services: &'a mut SchedServices,
}

/// Routes events to coroutines living in other instances.
pub trait EventRouter: Send + Sync {
    /// Deliver `msg` to `target`, wherever it lives. `false` if unroutable.
    fn route(&self, target: CoroutineId, msg: EventMsg) -> bool;

    /// Record that `target` lives at `endpoint`.
    fn register(&self, target: CoroutineId, endpoint: &str);

    /// Forget a coroutine's route.
    fn unregister(&self, target: CoroutineId);
}

/// Router for a process with a single instance; nothing is routable.
#[derive(Debug, Default)]
pub struct NullRouter;

impl EventRouter for NullRouter {
    fn route(&self, _target: CoroutineId, _msg: EventMsg) -> bool {
        false
    }

    fn register(&self, _target: CoroutineId, _endpoint: &str) {}

    fn unregister(&self, _target: CoroutineId) {}
}

/// Instance-wide services shared by every coroutine in the scheduler.
pub struct SchedServices {
    /// Armed one-shot timers.
    pub timers: TimerHub,
    /// The instance clock.
    pub clock: Clock,
    /// Content fetcher, if the host attached one.
    pub fetcher: Option<Arc<dyn Fetcher>>,
    /// This instance's mailbox, for completions routed back to it.
    pub events: UnboundedSender<InstanceMsg>,
    /// This instance's endpoint URI.
    pub endpoint: String,
    /// Renderer connection.
    pub renderer: Arc<dyn RendererLink>,
    /// Cross-instance event router.
    pub router: Arc<dyn EventRouter>,
    fetches: HashMap<CoroutineId, Vec<FetchToken>>,
}

impl SchedServices {
    /// Remember an in-flight fetch so it can be cancelled with its owner.
    pub fn track_fetch(&mut self, owner: CoroutineId, token: FetchToken) {
        self.fetches.entry(owner).or_default().push(token);
    }

    /// Forget a completed fetch.
    pub fn untrack_fetch(&mut self, owner: CoroutineId, token: FetchToken) {
        if let Some(tokens) = self.fetches.get_mut(&owner) {
            tokens.retain(|t| *t != token);
            if tokens.is_empty() {
                self.fetches.remove(&owner);
            }
        }
    }

    fn cancel_fetches(&mut self, owner: CoroutineId) {
        let Some(tokens) = self.fetches.remove(&owner) else {
            return;
        };
        if let Some(fetcher) = &self.fetcher {
            for token in tokens {
                fetcher.cancel_async(token);
            }
        }
    }
}

/// Terminal record of a coroutine that has left the scheduler.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The final result, when execution produced one.
    pub result: Option<Value>,
    /// Category of the uncaught exception, when execution ended with one.
    pub error: Option<Atom>,
    /// Whether the coroutine was killed rather than running to completion.
    pub killed: bool,
}

/// The per-instance scheduler.
pub struct Scheduler {
    coroutines: BTreeMap<CoroutineId, Coroutine>,
    services: SchedServices,
    config: RuntimeConfig,
    outcomes: HashMap<CoroutineId, Outcome>,
    last_busy: Duration,
}

impl Scheduler {
    /// A scheduler with no fetcher, a null renderer, and a null router.
    pub fn new(
        config: RuntimeConfig,
        endpoint: String,
        events: UnboundedSender<InstanceMsg>,
        clock: Clock,
    ) -> Self {
        let last_busy = clock.now();
        Scheduler {
            coroutines: BTreeMap::new(),
            services: SchedServices {
                timers: TimerHub::default(),
                clock,
                fetcher: None,
                events,
                endpoint,
                renderer: Arc::new(NullRenderer),
                router: Arc::new(NullRouter),
                fetches: HashMap::new(),
            },
            config,
            outcomes: HashMap::new(),
            last_busy,
        }
    }

    /// Attach a fetcher.
    pub fn set_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.services.fetcher = Some(fetcher);
    }

    /// Attach a renderer.
    pub fn set_renderer(&mut self, renderer: Arc<dyn RendererLink>) {
        self.services.renderer = renderer;
    }

    /// Attach a cross-instance router.
    pub fn set_router(&mut self, router: Arc<dyn EventRouter>) {
        self.services.router = router;
    }

    /// The instance clock.
    pub fn clock(&self) -> Clock {
        self.services.clock.clone()
    }

    /// Number of live coroutines.
    pub fn len(&self) -> usize {
        self.coroutines.len()
    }

    /// Whether no coroutine is live.
    pub fn is_empty(&self) -> bool {
        self.coroutines.is_empty()
    }

    /// Whether `cid` is live here.
    pub fn contains(&self, cid: CoroutineId) -> bool {
        self.coroutines.contains_key(&cid)
    }

    /// Terminal record of a finished coroutine.
    pub fn outcome(&self, cid: CoroutineId) -> Option<&Outcome> {
        self.outcomes.get(&cid)
    }

    /// Kinds of the events queued on a coroutine, in arrival order.
    pub fn pending_event_kinds(&self, cid: CoroutineId) -> Vec<Atom> {
        self.coroutines
            .get(&cid)
            .map(|co| co.events.iter().map(|msg| msg.kind).collect())
            .unwrap_or_default()
    }

    /// Admit a new coroutine.
    pub fn create_coroutine(&mut self, payload: CreateCoroutinePayload) -> CoroutineId {
        let cid = CoroutineId::fresh();
        let co = Coroutine::new(cid, payload, self.config.max_stack_depth);
        self.services.router.register(cid, &self.services.endpoint);
        self.coroutines.insert(cid, co);
        debug!(%cid, "coroutine created");
        cid
    }

    /// Exclude a coroutine from scheduling. `false` if unknown.
    pub fn pause(&mut self, cid: CoroutineId) -> bool {
        match self.coroutines.get_mut(&cid) {
            Some(co) => {
                co.paused = true;
                true
            }
            None => false,
        }
    }

    /// Undo a pause. `false` if unknown.
    pub fn unpause(&mut self, cid: CoroutineId) -> bool {
        match self.coroutines.get_mut(&cid) {
            Some(co) => {
                co.paused = false;
                true
            }
            None => false,
        }
    }

    /// Terminate a coroutine, unwinding its stack. `false` if unknown.
    ///
    /// The curator sees `corState:exited` but no `callState`; a killed call
    /// has no outcome to report.
    pub fn kill(&mut self, cid: CoroutineId) -> bool {
        let Some(mut co) = self.coroutines.remove(&cid) else {
            return false;
        };
        debug!(%cid, "coroutine killed");
        {
            let mut ctx = OpCtx {
                co: &mut co,
                services: &mut self.services,
            };
            ops::unwind(&mut ctx);
        }
        co.state = CoroutineState::Exited;
        self.services.timers.cancel_owned_by(cid);
        self.services.cancel_fetches(cid);
        self.services.router.unregister(cid);
        self.outcomes.insert(
            cid,
            Outcome {
                result: None,
                error: None,
                killed: true,
            },
        );
        if let Some(curator) = co.curator {
            self.send_to(curator, EventMsg::cor_state_exited(cid));
        }
        true
    }

    /// Queue an event for one coroutine.
    pub fn deliver_event(&mut self, target: CoroutineId, msg: EventMsg) {
        match self.coroutines.get_mut(&target) {
            Some(co) => co.deliver(msg),
            None => debug!(%target, kind = %msg.kind, "event for unknown coroutine dropped"),
        }
    }

    /// Deliver to a coroutine here, or hand the event to the router.
    fn send_to(&mut self, target: CoroutineId, msg: EventMsg) {
        if self.coroutines.contains_key(&target) {
            self.deliver_event(target, msg);
            return;
        }
        if !self.services.router.route(target, msg) {
            debug!(%target, "event unroutable, dropped");
        }
    }

    /// One scheduling pass. Returns whether any work was done.
    pub fn schedule_pass(&mut self) -> bool {
        let mut busy = false;
        let cids: Vec<CoroutineId> = self.coroutines.keys().copied().collect();

        for cid in &cids {
            let Some(co) = self.coroutines.get_mut(cid) else {
                continue;
            };
            if co.paused || co.state != CoroutineState::Ready {
                continue;
            }
            co.state = CoroutineState::Running;
            {
                let mut ctx = OpCtx {
                    co,
                    services: &mut self.services,
                };
                ops::execute_step(&mut ctx);
            }
            busy = true;
            self.after_step(*cid);
        }

        busy |= self.dispatch_timers();
        busy |= self.dispatch_events(&cids);

        let now = self.services.clock.now();
        if busy {
            self.last_busy = now;
        } else if now.saturating_sub(self.last_busy) >= self.config.idle_timeout() {
            self.broadcast_idle();
            self.last_busy = now;
        }
        busy
    }

    fn dispatch_timers(&mut self) -> bool {
        let clock = self.services.clock.clone();
        let fired = self.services.timers.due(&clock);
        let mut busy = false;
        enum Wakeup {
            Hold,
            Resume,
            Stale,
        }
        for (timer, owner) in fired {
            let wakeup = match self.coroutines.get(&owner) {
                Some(co) if co.paused => Wakeup::Hold,
                Some(co)
                    if co.state == CoroutineState::Stopped
                        && matches!(co.wait, Some(WaitSpec::Timer(t)) if t == timer) =>
                {
                    Wakeup::Resume
                }
                _ => Wakeup::Stale,
            };
            match wakeup {
                // Hold the wakeup until the owner is unpaused.
                Wakeup::Hold => self.services.timers.requeue(timer, owner),
                Wakeup::Resume => {
                    self.resume(owner, None);
                    busy = true;
                }
                Wakeup::Stale => debug!(%owner, "stale timer dropped"),
            }
        }
        busy
    }

    fn dispatch_events(&mut self, cids: &[CoroutineId]) -> bool {
        let mut busy = false;
        for cid in cids {
            let Some(co) = self.coroutines.get_mut(cid) else {
                continue;
            };
            if co.paused || co.state != CoroutineState::Stopped {
                continue;
            }
            let Some(wait) = co.wait.clone() else {
                continue;
            };
            let matched = co.events.iter().position(|msg| wait.matches(msg));
            if let Some(index) = matched {
                let msg = co.events.remove(index);
                self.resume(*cid, msg);
                busy = true;
            }
        }
        busy
    }

    /// Invoke a suspended coroutine's continuation.
    fn resume(&mut self, cid: CoroutineId, msg: Option<EventMsg>) {
        let Some(co) = self.coroutines.get_mut(&cid) else {
            return;
        };
        debug_assert_eq!(co.state, CoroutineState::Stopped);
        co.wait = None;
        let Some(continuation) = co.continuation.take() else {
            co.state = CoroutineState::Ready;
            return;
        };
        co.state = CoroutineState::Running;
        {
            let mut ctx = OpCtx {
                co,
                services: &mut self.services,
            };
            continuation(&mut ctx, msg);
        }
        self.after_step(cid);
    }

    /// Post-step bookkeeping: yielded coroutines stay stopped, finished ones
    /// leave the scheduler, everything else goes back to ready.
    fn after_step(&mut self, cid: CoroutineId) {
        let Some(co) = self.coroutines.get_mut(&cid) else {
            return;
        };
        if co.state == CoroutineState::Stopped {
            return;
        }
        if co.stack.finished() {
            self.finish(cid);
            return;
        }
        co.state = CoroutineState::Ready;
    }

    /// A coroutine ran to completion: record the outcome, announce the page,
    /// notify the curator, and release every resource it owned.
    fn finish(&mut self, cid: CoroutineId) {
        let Some(mut co) = self.coroutines.remove(&cid) else {
            return;
        };
        co.state = CoroutineState::Exited;
        if let Some(exception) = co.stack.take_except() {
            warn!(%cid, %exception, "coroutine finished with an uncaught exception");
            co.record_uncaught(&exception);
        }

        if !co.first_run_done {
            co.first_run_done = true;
            if let Err(err) = self.services.renderer.page_load(cid, &co.page) {
                warn!(%cid, %err, "renderer rejected the page");
            }
        }

        self.outcomes.insert(
            cid,
            Outcome {
                result: co.result.clone(),
                error: co.error_except,
                killed: false,
            },
        );
        debug!(%cid, error = ?co.error_except, "coroutine finished");

        if let Some(curator) = co.curator {
            let call_state = match co.error_except {
                Some(category) => EventMsg::call_state_except(cid, category),
                None => {
                    EventMsg::call_state_success(cid, co.result.clone().unwrap_or_default())
                }
            };
            self.send_to(curator, call_state);
            self.send_to(curator, EventMsg::cor_state_exited(cid));
        }

        self.services.timers.cancel_owned_by(cid);
        self.services.cancel_fetches(cid);
        self.services.router.unregister(cid);
    }

    fn broadcast_idle(&mut self) {
        let idle = event::idle();
        for co in self.coroutines.values_mut() {
            // One pending idle per coroutine; quiet periods do not stack.
            let already_queued = co.events.iter().any(|msg| msg.kind == idle);
            if co.observe_idle && !co.paused && !already_queued {
                co.deliver(EventMsg::idle());
            }
        }
    }
}
