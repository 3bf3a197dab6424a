//! Instance registry, control requests over the mailbox, and cross-instance
//! event routing.

use parking_lot::Mutex;
use sprig::runtime::{
    Clock, CoreError, CreateCoroutinePayload, CoroutineId, EventMsg, EventRouter, Instance,
    InstanceHandle, InstanceManager, InstanceMsg, MsgData, MsgTarget, RequestId, RequestMsg,
    RetCode, RuntimeConfig,
};
use sprig::{Value, VDomBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const DRIVER: &str = "edpt://localhost/routing/driver";

fn sleeper() -> CreateCoroutinePayload {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("sleep", &[("with", "600")]).close();
    CreateCoroutinePayload::new(Arc::new(b.build()))
}

fn exiting(with: &str) -> CreateCoroutinePayload {
    let mut b = VDomBuilder::new();
    b.open("hvml").leaf("exit", &[("with", with)]).close();
    CreateCoroutinePayload::new(Arc::new(b.build()))
}

fn request(operation: &str, target: MsgTarget, data: MsgData) -> RequestMsg {
    RequestMsg {
        target,
        operation: operation.to_string(),
        request_id: RequestId::generate(),
        source_uri: DRIVER.to_string(),
        data,
    }
}

#[test]
fn create_or_get_is_idempotent_per_endpoint() {
    let manager = InstanceManager::global();
    let first = manager
        .create_or_get("routing-idem", "main", RuntimeConfig::default())
        .unwrap();
    let second = manager
        .create_or_get("routing-idem", "main", RuntimeConfig::default())
        .unwrap();
    assert_eq!(first.endpoint(), second.endpoint());
    assert_eq!(first.endpoint(), "edpt://localhost/routing-idem/main");
    assert!(manager.lookup(first.endpoint()).is_some());
    manager.shutdown(&first, DRIVER).unwrap();
}

#[test]
fn invalid_names_are_rejected() {
    let manager = InstanceManager::global();
    let err = manager
        .create_or_get("bad/app", "main", RuntimeConfig::default())
        .unwrap_err();
    assert!(matches!(err, CoreError::Config(_)));
    assert!(manager
        .create_or_get("app", "", RuntimeConfig::default())
        .is_err());
}

#[test]
fn remote_coroutine_lifecycle_over_requests() {
    let manager = InstanceManager::global();
    let handle = manager
        .create_or_get("routing-life", "main", RuntimeConfig::default())
        .unwrap();
    let cid = manager.schedule_in(&handle, sleeper(), DRIVER).unwrap();

    let target = MsgTarget::Coroutine(cid);
    let pause = handle
        .request(request("pauseCoroutine", target, MsgData::Void))
        .unwrap();
    assert_eq!(pause.ret_code, RetCode::Ok);

    let resume = handle
        .request(request("resumeCoroutine", target, MsgData::Void))
        .unwrap();
    assert_eq!(resume.ret_code, RetCode::Ok);

    let kill = handle
        .request(request("killCoroutine", target, MsgData::Void))
        .unwrap();
    assert_eq!(kill.ret_code, RetCode::Ok);

    let again = handle
        .request(request("killCoroutine", target, MsgData::Void))
        .unwrap();
    assert_eq!(again.ret_code, RetCode::NotFound);

    let unknown = handle
        .request(request("rewindHistory", MsgTarget::Instance, MsgData::Void))
        .unwrap();
    assert_eq!(unknown.ret_code, RetCode::BadRequest);

    let malformed = handle
        .request(request(
            "createCoroutine",
            MsgTarget::Instance,
            MsgData::Value(Value::null()),
        ))
        .unwrap();
    assert_eq!(malformed.ret_code, RetCode::BadRequest);

    manager.shutdown(&handle, DRIVER).unwrap();
    assert!(manager.lookup(handle.endpoint()).is_none());

    // The thread drains and exits; the mailbox closes behind it.
    for _ in 0..200 {
        if handle
            .request(request("pauseCoroutine", target, MsgData::Void))
            .is_err()
        {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("instance mailbox never closed after shutdown");
}

/// Router mapping coroutines to handles through an endpoint table, the way
/// the process-global one does, but fully under the test's control.
#[derive(Default)]
struct TestRouter {
    routes: Mutex<HashMap<CoroutineId, String>>,
    handles: Mutex<HashMap<String, InstanceHandle>>,
}

impl EventRouter for TestRouter {
    fn route(&self, target: CoroutineId, msg: EventMsg) -> bool {
        let Some(endpoint) = self.routes.lock().get(&target).cloned() else {
            return false;
        };
        let Some(handle) = self.handles.lock().get(&endpoint).cloned() else {
            return false;
        };
        handle.send(InstanceMsg::Event { target, msg }).is_ok()
    }

    fn register(&self, target: CoroutineId, endpoint: &str) {
        self.routes.lock().insert(target, endpoint.to_string());
    }

    fn unregister(&self, target: CoroutineId) {
        self.routes.lock().remove(&target);
    }
}

#[test]
fn curator_in_another_instance_sees_call_and_cor_state() {
    let router = Arc::new(TestRouter::default());
    let (mut inst_a, handle_a) = Instance::with_clock(
        "edpt://localhost/routing/a",
        RuntimeConfig::default(),
        Clock::simulated(),
    );
    let (mut inst_b, handle_b) = Instance::with_clock(
        "edpt://localhost/routing/b",
        RuntimeConfig::default(),
        Clock::simulated(),
    );
    inst_a.set_router(router.clone());
    inst_b.set_router(router.clone());
    router
        .handles
        .lock()
        .insert(handle_a.endpoint().to_string(), handle_a.clone());
    router
        .handles
        .lock()
        .insert(handle_b.endpoint().to_string(), handle_b.clone());

    // Curator lives in A and stays alive; the worker runs in B.
    let curator = inst_a.create_coroutine(sleeper());
    let mut worker_payload = exiting("7");
    worker_payload.curator = Some(curator);
    let worker = inst_b.create_coroutine(worker_payload);

    for _ in 0..32 {
        if inst_b.outcome(worker).is_some() {
            break;
        }
        inst_b.tick();
    }
    let outcome = inst_b.outcome(worker).expect("worker finished").clone();
    assert_eq!(outcome.result, Some(Value::integer(7)));

    inst_a.tick();
    let kinds: Vec<&str> = inst_a
        .pending_event_kinds(curator)
        .iter()
        .map(|a| a.as_str())
        .collect();
    assert_eq!(kinds, vec!["callState", "corState"]);
}

#[test]
fn unroutable_curator_events_are_dropped() {
    // No router attached: the worker still finishes cleanly.
    let (mut inst, _handle) = Instance::with_clock(
        "edpt://localhost/routing/lonely",
        RuntimeConfig::default(),
        Clock::simulated(),
    );
    let mut payload = exiting("1");
    payload.curator = Some(CoroutineId::fresh());
    let worker = inst.create_coroutine(payload);
    for _ in 0..32 {
        inst.tick();
    }
    let outcome = inst.outcome(worker).expect("finished").clone();
    assert_eq!(outcome.result, Some(Value::integer(1)));
}
