//! Instances and the process-wide instance registry
//!
//! An instance is one scheduler plus one mailbox, owned by one thread.
//! Other threads hold an [`InstanceHandle`] and talk to it exclusively
//! through typed messages; a control request carries a oneshot reply channel
//! unless it uses the no-return id, in which case no response is produced.
//! [`InstanceManager`] is the process-wide registry that spins instances up
//! by endpoint, hands out their handles, and routes cross-instance events by
//! coroutine id.

use crate::runtime::coroutine::CoroutineId;
use crate::runtime::error::{CoreError, CoreResult, TransportError, TransportResult};
use crate::runtime::fetcher::Fetcher;
use crate::runtime::message::{
    event, CreateCoroutinePayload, EventMsg, InstanceMsg, MsgData, MsgTarget, Operation,
    RequestId, RequestMsg, ResponseMsg, RetCode,
};
use crate::runtime::renderer::RendererLink;
use crate::runtime::scheduler::{EventRouter, Outcome, Scheduler};
use crate::runtime::timer::Clock;
use crate::runtime::RuntimeConfig;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Cloneable reference to a running instance.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    endpoint: String,
    sender: UnboundedSender<InstanceMsg>,
}

impl InstanceHandle {
    /// The instance's endpoint URI.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post a message to the instance's mailbox.
    pub fn send(&self, msg: InstanceMsg) -> TransportResult<()> {
        self.sender
            .send(msg)
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Send a control request and block for the response.
    ///
    /// A no-return request id skips the reply channel and a synthetic Ok is
    /// returned as soon as the request is queued.
    pub fn request(&self, msg: RequestMsg) -> TransportResult<ResponseMsg> {
        let request_id = msg.request_id.clone();
        if request_id.is_no_return() {
            self.send(InstanceMsg::Request { msg, reply: None })?;
            return Ok(ResponseMsg::ok(request_id, &self.endpoint, 0, MsgData::Void));
        }
        let (tx, rx) = oneshot::channel();
        self.send(InstanceMsg::Request {
            msg,
            reply: Some(tx),
        })?;
        rx.blocking_recv().map_err(|_| TransportError::ChannelClosed)
    }
}

/// One scheduler plus its mailbox, owned by one thread.
pub struct Instance {
    scheduler: Scheduler,
    inbox: UnboundedReceiver<InstanceMsg>,
    endpoint: String,
    config: RuntimeConfig,
    shutdown_requested: bool,
}

impl Instance {
    /// Build an instance on the real clock.
    pub fn new(endpoint: impl Into<String>, config: RuntimeConfig) -> (Self, InstanceHandle) {
        Self::with_clock(endpoint, config, Clock::real())
    }

    /// Build an instance on an explicit clock. Tests pass a simulated one
    /// and drive it with [`tick`].
    ///
    /// [`tick`]: Instance::tick
    pub fn with_clock(
        endpoint: impl Into<String>,
        config: RuntimeConfig,
        clock: Clock,
    ) -> (Self, InstanceHandle) {
        let endpoint = endpoint.into();
        let (sender, inbox) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(config.clone(), endpoint.clone(), sender.clone(), clock);
        let handle = InstanceHandle {
            endpoint: endpoint.clone(),
            sender,
        };
        (
            Instance {
                scheduler,
                inbox,
                endpoint,
                config,
                shutdown_requested: false,
            },
            handle,
        )
    }

    /// Attach a fetcher.
    pub fn set_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.scheduler.set_fetcher(fetcher);
    }

    /// Attach a renderer.
    pub fn set_renderer(&mut self, renderer: Arc<dyn RendererLink>) {
        self.scheduler.set_renderer(renderer);
    }

    /// Attach a cross-instance router.
    pub fn set_router(&mut self, router: Arc<dyn EventRouter>) {
        self.scheduler.set_router(router);
    }

    /// The instance clock.
    pub fn clock(&self) -> Clock {
        self.scheduler.clock()
    }

    /// Admit a coroutine directly, bypassing the mailbox. Embedders driving
    /// the instance on their own thread use this instead of a request.
    pub fn create_coroutine(&mut self, payload: CreateCoroutinePayload) -> CoroutineId {
        self.scheduler.create_coroutine(payload)
    }

    /// Terminal record of a finished coroutine.
    pub fn outcome(&self, cid: CoroutineId) -> Option<&Outcome> {
        self.scheduler.outcome(cid)
    }

    /// Number of live coroutines.
    pub fn coroutine_count(&self) -> usize {
        self.scheduler.len()
    }

    /// Kinds of the events queued on a coroutine, in arrival order.
    pub fn pending_event_kinds(&self, cid: CoroutineId) -> Vec<crate::atom::Atom> {
        self.scheduler.pending_event_kinds(cid)
    }

    /// Drain the mailbox, then run one scheduling pass. Returns whether any
    /// work was done.
    pub fn tick(&mut self) -> bool {
        let mut busy = false;
        while let Ok(msg) = self.inbox.try_recv() {
            self.handle(msg);
            busy = true;
        }
        if self.scheduler.schedule_pass() {
            busy = true;
        }
        busy
    }

    /// Run until shutdown is requested and every coroutine has drained.
    pub fn run(mut self) {
        info!(endpoint = %self.endpoint, "instance running");
        loop {
            let busy = self.tick();
            if self.shutdown_requested && self.scheduler.is_empty() {
                break;
            }
            if !busy {
                std::thread::sleep(self.config.schedule_sleep());
            }
        }
        info!(endpoint = %self.endpoint, "instance stopped");
    }

    fn handle(&mut self, msg: InstanceMsg) {
        match msg {
            InstanceMsg::Event { target, msg } => self.scheduler.deliver_event(target, msg),
            InstanceMsg::Request { msg, reply } => {
                let response = self.handle_request(msg);
                if let Some(reply) = reply {
                    if reply.send(response).is_err() {
                        debug!("requester went away before the response");
                    }
                }
            }
        }
    }

    fn handle_request(&mut self, msg: RequestMsg) -> ResponseMsg {
        let request_id = msg.request_id.clone();
        let Some(op) = Operation::parse(&msg.operation) else {
            warn!(operation = %msg.operation, "unknown operation");
            return ResponseMsg::status(request_id, &self.endpoint, RetCode::BadRequest);
        };
        match (op, msg.target) {
            (Operation::CreateCoroutine, MsgTarget::Instance) => match msg.data {
                MsgData::Create(payload) => {
                    let cid = self.scheduler.create_coroutine(*payload);
                    ResponseMsg::ok(request_id, &self.endpoint, cid.as_u64(), MsgData::Void)
                }
                _ => ResponseMsg::status(request_id, &self.endpoint, RetCode::BadRequest),
            },
            (Operation::ShutdownInstance, MsgTarget::Instance) => {
                self.shutdown_requested = true;
                ResponseMsg::ok(request_id, &self.endpoint, 0, MsgData::Void)
            }
            (Operation::KillCoroutine, MsgTarget::Coroutine(cid)) => {
                let found = self.scheduler.kill(cid);
                self.coroutine_response(request_id, found)
            }
            (Operation::PauseCoroutine, MsgTarget::Coroutine(cid)) => {
                let found = self.scheduler.pause(cid);
                self.coroutine_response(request_id, found)
            }
            (Operation::ResumeCoroutine, MsgTarget::Coroutine(cid)) => {
                let found = self.scheduler.unpause(cid);
                self.coroutine_response(request_id, found)
            }
            (Operation::CallMethod, MsgTarget::Coroutine(cid)) => {
                if !self.scheduler.contains(cid) {
                    return ResponseMsg::status(request_id, &self.endpoint, RetCode::NotFound);
                }
                let mut call = EventMsg::new(event::call_method());
                call.request_id = Some(request_id.clone());
                call.data = match msg.data {
                    MsgData::Value(value) => Some(value),
                    _ => None,
                };
                self.scheduler.deliver_event(cid, call);
                ResponseMsg::ok(request_id, &self.endpoint, 0, MsgData::Void)
            }
            // Operation addressed at the wrong kind of target.
            _ => ResponseMsg::status(request_id, &self.endpoint, RetCode::BadRequest),
        }
    }

    fn coroutine_response(&self, request_id: RequestId, found: bool) -> ResponseMsg {
        if found {
            ResponseMsg::ok(request_id, &self.endpoint, 0, MsgData::Void)
        } else {
            ResponseMsg::status(request_id, &self.endpoint, RetCode::NotFound)
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Process-wide registry of instances and coroutine routes.
pub struct InstanceManager {
    instances: RwLock<HashMap<String, InstanceHandle>>,
    routes: RwLock<HashMap<CoroutineId, String>>,
}

static MANAGER: Lazy<InstanceManager> = Lazy::new(|| InstanceManager {
    instances: RwLock::new(HashMap::new()),
    routes: RwLock::new(HashMap::new()),
});

/// Router backed by the global registry's coroutine route table.
struct GlobalRouter;

impl EventRouter for GlobalRouter {
    fn route(&self, target: CoroutineId, msg: EventMsg) -> bool {
        let manager = InstanceManager::global();
        let Some(endpoint) = manager.routes.read().get(&target).cloned() else {
            return false;
        };
        let Some(handle) = manager.instances.read().get(&endpoint).cloned() else {
            return false;
        };
        handle.send(InstanceMsg::Event { target, msg }).is_ok()
    }

    fn register(&self, target: CoroutineId, endpoint: &str) {
        InstanceManager::global()
            .routes
            .write()
            .insert(target, endpoint.to_string());
    }

    fn unregister(&self, target: CoroutineId) {
        InstanceManager::global().routes.write().remove(&target);
    }
}

impl InstanceManager {
    /// The process-wide registry.
    pub fn global() -> &'static InstanceManager {
        &MANAGER
    }

    /// The handle registered at `endpoint`, if any.
    pub fn lookup(&self, endpoint: &str) -> Option<InstanceHandle> {
        self.instances.read().get(endpoint).cloned()
    }

    /// Start (or return the already running) instance for `app`/`run`.
    ///
    /// The instance gets its own OS thread; this call blocks until the new
    /// thread has built its scheduler and handed its handle back.
    pub fn create_or_get(
        &self,
        app: &str,
        run: &str,
        config: RuntimeConfig,
    ) -> CoreResult<InstanceHandle> {
        if !valid_name(app) || !valid_name(run) {
            return Err(CoreError::Config(format!(
                "invalid instance name: {app:?}/{run:?}"
            )));
        }
        let endpoint = format!("edpt://localhost/{app}/{run}");
        let mut instances = self.instances.write();
        if let Some(handle) = instances.get(&endpoint) {
            return Ok(handle.clone());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let thread_endpoint = endpoint.clone();
        std::thread::Builder::new()
            .name(format!("sprig-{app}-{run}"))
            .spawn(move || {
                let (mut instance, handle) = Instance::new(thread_endpoint, config);
                instance.set_router(Arc::new(GlobalRouter));
                if ready_tx.send(handle).is_err() {
                    return;
                }
                instance.run();
            })
            .map_err(|e| CoreError::InstanceStart(e.to_string()))?;

        let handle = ready_rx
            .blocking_recv()
            .map_err(|_| CoreError::InstanceStart("instance thread died during startup".into()))?;
        instances.insert(endpoint, handle.clone());
        Ok(handle)
    }

    /// Schedule a coroutine in the instance behind `handle` and block for
    /// its id.
    pub fn schedule_in(
        &self,
        handle: &InstanceHandle,
        payload: CreateCoroutinePayload,
        source_uri: &str,
    ) -> TransportResult<CoroutineId> {
        let msg = RequestMsg {
            target: MsgTarget::Instance,
            operation: Operation::CreateCoroutine.as_str().to_string(),
            request_id: RequestId::generate(),
            source_uri: source_uri.to_string(),
            data: MsgData::Create(Box::new(payload)),
        };
        let response = handle.request(msg)?;
        match response.ret_code {
            RetCode::Ok => Ok(CoroutineId::from(response.result_value)),
            code => Err(TransportError::BadRequest(format!(
                "createCoroutine answered {}",
                code.code()
            ))),
        }
    }

    /// Ask the instance to shut down once drained, and drop it from the
    /// registry.
    pub fn shutdown(&self, handle: &InstanceHandle, source_uri: &str) -> TransportResult<()> {
        let msg = RequestMsg {
            target: MsgTarget::Instance,
            operation: Operation::ShutdownInstance.as_str().to_string(),
            request_id: RequestId::generate(),
            source_uri: source_uri.to_string(),
            data: MsgData::Void,
        };
        handle.request(msg)?;
        self.instances.write().remove(handle.endpoint());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::vdom::VDomBuilder;

    fn instance() -> (Instance, InstanceHandle) {
        Instance::with_clock(
            "edpt://localhost/test/inst",
            RuntimeConfig::default(),
            Clock::simulated(),
        )
    }

    fn request(op: &str, target: MsgTarget, data: MsgData) -> RequestMsg {
        RequestMsg {
            target,
            operation: op.to_string(),
            request_id: RequestId::generate(),
            source_uri: "edpt://localhost/test/driver".to_string(),
            data,
        }
    }

    #[test]
    fn unknown_operation_is_a_bad_request() {
        let (mut inst, _handle) = instance();
        let response =
            inst.handle_request(request("mysteryOp", MsgTarget::Instance, MsgData::Void));
        assert_eq!(response.ret_code, RetCode::BadRequest);
    }

    #[test]
    fn create_without_payload_is_a_bad_request() {
        let (mut inst, _handle) = instance();
        let response = inst.handle_request(request(
            "createCoroutine",
            MsgTarget::Instance,
            MsgData::Value(Value::null()),
        ));
        assert_eq!(response.ret_code, RetCode::BadRequest);
    }

    #[test]
    fn create_returns_the_new_coroutine_id() {
        let (mut inst, _handle) = instance();
        let mut b = VDomBuilder::new();
        b.open("hvml").close();
        let payload = CreateCoroutinePayload::new(std::sync::Arc::new(b.build()));
        let response = inst.handle_request(request(
            "createCoroutine",
            MsgTarget::Instance,
            MsgData::Create(Box::new(payload)),
        ));
        assert_eq!(response.ret_code, RetCode::Ok);
        assert!(inst.scheduler.contains(CoroutineId::from(response.result_value)));
    }

    #[test]
    fn coroutine_ops_answer_not_found_for_strangers() {
        let (mut inst, _handle) = instance();
        let ghost = MsgTarget::Coroutine(CoroutineId::fresh());
        for op in ["killCoroutine", "pauseCoroutine", "resumeCoroutine", "callMethod"] {
            let response = inst.handle_request(request(op, ghost, MsgData::Void));
            assert_eq!(response.ret_code, RetCode::NotFound, "{op}");
        }
    }

    #[test]
    fn operations_reject_mismatched_targets() {
        let (mut inst, _handle) = instance();
        let response = inst.handle_request(request(
            "shutdownInstance",
            MsgTarget::Coroutine(CoroutineId::fresh()),
            MsgData::Void,
        ));
        assert_eq!(response.ret_code, RetCode::BadRequest);
        assert!(!inst.shutdown_requested);
    }

    #[test]
    fn name_validation() {
        assert!(valid_name("app-1_x"));
        assert!(!valid_name(""));
        assert!(!valid_name("bad/name"));
    }
}
