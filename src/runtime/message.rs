//! Control requests, responses, and coroutine events
//!
//! Instances talk to each other through typed messages over their mailboxes.
//! A [`RequestMsg`] addresses either an instance or one coroutine inside it,
//! names an operation, and may attach a reply channel; a [`ResponseMsg`]
//! comes back with an HTTP-flavored status code. [`EventMsg`] is the smaller
//! currency delivered to an individual coroutine's event queue.

use crate::atom::Atom;
use crate::runtime::coroutine::CoroutineId;
use crate::value::Value;
use crate::vdom::VDom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Sentinel request id for fire-and-forget requests.
const NO_RETURN: &str = "noreturn";

/// Identifier correlating a request with its response or completion event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// A fresh unique id.
    pub fn generate() -> Self {
        RequestId(uuid::Uuid::new_v4().to_string())
    }

    /// The fire-and-forget sentinel; no response will be produced for it.
    pub fn no_return() -> Self {
        RequestId(NO_RETURN.to_string())
    }

    /// Whether this is the fire-and-forget sentinel.
    pub fn is_no_return(&self) -> bool {
        self.0 == NO_RETURN
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

/// Who a request is addressed to within the receiving instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgTarget {
    /// The instance itself.
    Instance,
    /// One coroutine inside the instance.
    Coroutine(CoroutineId),
}

/// The control operations an instance understands.
///
/// Requests carry the operation as a string; parsing happens at the handler
/// so an unknown name can be answered with a bad-request response instead of
/// being unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Schedule a new coroutine from a payload.
    CreateCoroutine,
    /// Terminate a coroutine, unwinding its stack.
    KillCoroutine,
    /// Exclude a coroutine from scheduling.
    PauseCoroutine,
    /// Undo a pause.
    ResumeCoroutine,
    /// Stop accepting work; the instance exits when drained.
    ShutdownInstance,
    /// Invoke a method exposed by a coroutine.
    CallMethod,
}

impl Operation {
    /// Parse an operation name.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "createCoroutine" => Operation::CreateCoroutine,
            "killCoroutine" => Operation::KillCoroutine,
            "pauseCoroutine" => Operation::PauseCoroutine,
            "resumeCoroutine" => Operation::ResumeCoroutine,
            "shutdownInstance" => Operation::ShutdownInstance,
            "callMethod" => Operation::CallMethod,
            _ => return None,
        })
    }

    /// The operation's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CreateCoroutine => "createCoroutine",
            Operation::KillCoroutine => "killCoroutine",
            Operation::PauseCoroutine => "pauseCoroutine",
            Operation::ResumeCoroutine => "resumeCoroutine",
            Operation::ShutdownInstance => "shutdownInstance",
            Operation::CallMethod => "callMethod",
        }
    }
}

/// How the renderer should host a coroutine's page, if at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    /// No page.
    #[default]
    Null,
    /// The plain, inline page.
    Plain,
    /// A widget slot inside a group.
    Widget,
    /// A standalone window.
    Window,
}

/// Renderer page parameters attached to a coroutine at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageParams {
    /// Hosting mode.
    pub page_type: PageType,
    /// Workspace name, when the renderer supports several.
    pub workspace: Option<String>,
    /// Group the page belongs to (widget pages).
    pub group: Option<String>,
    /// Page name within its workspace or group.
    pub page_name: Option<String>,
    /// CSS-like class hint.
    pub class: Option<String>,
    /// Window or widget title.
    pub title: Option<String>,
    /// Free-form layout style hint.
    pub layout_style: Option<String>,
}

/// Everything needed to start a coroutine in a (possibly remote) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCoroutinePayload {
    /// The program tree. Immutable, so instances share one copy.
    pub vdom: Arc<VDom>,
    /// Coroutine to notify when this one finishes.
    pub curator: Option<CoroutineId>,
    /// Initial request data, exposed as the root question variable.
    pub request: Option<Value>,
    /// Renderer page parameters.
    pub page: PageParams,
    /// Element id to execute instead of the whole body.
    pub body_id: Option<String>,
    /// Whether the coroutine wants idle broadcasts.
    pub observe_idle: bool,
}

impl CreateCoroutinePayload {
    /// A payload with defaults for everything but the program.
    pub fn new(vdom: Arc<VDom>) -> Self {
        CreateCoroutinePayload {
            vdom,
            curator: None,
            request: None,
            page: PageParams::default(),
            body_id: None,
            observe_idle: false,
        }
    }
}

/// Data attached to a request or response.
#[derive(Debug, Clone)]
pub enum MsgData {
    /// Nothing.
    Void,
    /// A plain value.
    Value(Value),
    /// A coroutine-creation payload.
    Create(Box<CreateCoroutinePayload>),
}

/// A control request.
#[derive(Debug)]
pub struct RequestMsg {
    /// Addressee within the receiving instance.
    pub target: MsgTarget,
    /// Operation name; parsed by the handler.
    pub operation: String,
    /// Correlation id; the no-return sentinel suppresses the response.
    pub request_id: RequestId,
    /// Endpoint URI of the sender.
    pub source_uri: String,
    /// Operation payload.
    pub data: MsgData,
}

/// Response status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetCode {
    /// Success.
    Ok,
    /// Malformed or unrecognized request.
    BadRequest,
    /// The addressed coroutine or resource does not exist.
    NotFound,
    /// Recognized operation with no implementation here.
    NotImplemented,
}

impl RetCode {
    /// Numeric code.
    pub fn code(&self) -> u16 {
        match self {
            RetCode::Ok => 200,
            RetCode::BadRequest => 400,
            RetCode::NotFound => 404,
            RetCode::NotImplemented => 501,
        }
    }
}

/// A control response.
#[derive(Debug)]
pub struct ResponseMsg {
    /// Correlation id copied from the request.
    pub request_id: RequestId,
    /// Endpoint URI of the responder.
    pub source_uri: String,
    /// Status.
    pub ret_code: RetCode,
    /// Small scalar result (e.g. a created coroutine id).
    pub result_value: u64,
    /// Structured result.
    pub data: MsgData,
}

impl ResponseMsg {
    /// A success response.
    pub fn ok(request_id: RequestId, source_uri: &str, result_value: u64, data: MsgData) -> Self {
        ResponseMsg {
            request_id,
            source_uri: source_uri.to_string(),
            ret_code: RetCode::Ok,
            result_value,
            data,
        }
    }

    /// A non-success response with no payload.
    pub fn status(request_id: RequestId, source_uri: &str, ret_code: RetCode) -> Self {
        ResponseMsg {
            request_id,
            source_uri: source_uri.to_string(),
            ret_code,
            result_value: 0,
            data: MsgData::Void,
        }
    }
}

/// Well-known event type and subtype atoms.
pub mod event {
    use crate::atom::Atom;

    /// `callState` events report a finished call's outcome to the curator.
    pub fn call_state() -> Atom {
        Atom::intern("callState")
    }

    /// `corState` events report coroutine lifecycle transitions.
    pub fn cor_state() -> Atom {
        Atom::intern("corState")
    }

    /// `fetchResult` events complete an outstanding fetch.
    pub fn fetch_result() -> Atom {
        Atom::intern("fetchResult")
    }

    /// `idle` is broadcast when the instance has had no work for a while.
    pub fn idle() -> Atom {
        Atom::intern("idle")
    }

    /// `callMethod` delivers a method invocation to a coroutine.
    pub fn call_method() -> Atom {
        Atom::intern("callMethod")
    }

    /// Subtype: the call produced a result.
    pub fn sub_success() -> Atom {
        Atom::intern("success")
    }

    /// Subtype: the call ended with an uncaught exception.
    pub fn sub_except() -> Atom {
        Atom::intern("except")
    }

    /// Subtype: the coroutine has exited.
    pub fn sub_exited() -> Atom {
        Atom::intern("exited")
    }
}

/// An event delivered to one coroutine's queue.
#[derive(Debug, Clone)]
pub struct EventMsg {
    /// Event type.
    pub kind: Atom,
    /// Event subtype.
    pub sub: Option<Atom>,
    /// Correlation id, when the event completes a request.
    pub request_id: Option<RequestId>,
    /// Payload.
    pub data: Option<Value>,
    /// Coroutine the event is about, when there is one.
    pub source: Option<CoroutineId>,
}

impl EventMsg {
    /// A bare event of the given type.
    pub fn new(kind: Atom) -> Self {
        EventMsg {
            kind,
            sub: None,
            request_id: None,
            data: None,
            source: None,
        }
    }

    /// `callState:success` carrying the finished coroutine's result.
    pub fn call_state_success(source: CoroutineId, result: Value) -> Self {
        let mut msg = EventMsg::new(event::call_state());
        msg.sub = Some(event::sub_success());
        msg.source = Some(source);
        msg.data = Some(result);
        msg
    }

    /// `callState:except` carrying the uncaught exception's category name.
    pub fn call_state_except(source: CoroutineId, category: Atom) -> Self {
        let mut msg = EventMsg::new(event::call_state());
        msg.sub = Some(event::sub_except());
        msg.source = Some(source);
        msg.data = Some(Value::string(category.as_str()));
        msg
    }

    /// `corState:exited` for a coroutine that has left the scheduler.
    pub fn cor_state_exited(source: CoroutineId) -> Self {
        let mut msg = EventMsg::new(event::cor_state());
        msg.sub = Some(event::sub_exited());
        msg.source = Some(source);
        msg
    }

    /// A fetch completion correlated by request id.
    pub fn fetch_result(request_id: RequestId, sub: Atom, data: Option<Value>) -> Self {
        let mut msg = EventMsg::new(event::fetch_result());
        msg.sub = Some(sub);
        msg.request_id = Some(request_id);
        msg.data = data;
        msg
    }

    /// The idle broadcast.
    pub fn idle() -> Self {
        EventMsg::new(event::idle())
    }
}

/// What flows through an instance's mailbox.
#[derive(Debug)]
pub enum InstanceMsg {
    /// A control request, with an optional reply channel.
    Request {
        /// The request.
        msg: RequestMsg,
        /// Where to send the response; `None` for no-return requests.
        reply: Option<oneshot::Sender<ResponseMsg>>,
    },
    /// An event for one coroutine.
    Event {
        /// The coroutine to deliver to.
        target: CoroutineId,
        /// The event.
        msg: EventMsg,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_round_trip() {
        for op in [
            Operation::CreateCoroutine,
            Operation::KillCoroutine,
            Operation::PauseCoroutine,
            Operation::ResumeCoroutine,
            Operation::ShutdownInstance,
            Operation::CallMethod,
        ] {
            assert_eq!(Operation::parse(op.as_str()), Some(op));
        }
        assert_eq!(Operation::parse("rewindHistory"), None);
    }

    #[test]
    fn no_return_sentinel() {
        assert!(RequestId::no_return().is_no_return());
        assert!(!RequestId::generate().is_no_return());
    }

    #[test]
    fn status_codes() {
        assert_eq!(RetCode::Ok.code(), 200);
        assert_eq!(RetCode::BadRequest.code(), 400);
        assert_eq!(RetCode::NotFound.code(), 404);
        assert_eq!(RetCode::NotImplemented.code(), 501);
    }
}
