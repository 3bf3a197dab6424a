//! External content fetching
//!
//! The runtime never performs I/O itself; a host-provided [`Fetcher`] does.
//! An element that needs remote content asks the fetcher to start a request
//! and yields. The fetcher, on whatever thread or executor it likes, calls
//! [`FetchContext::complete`], which turns the outcome into a `fetchResult`
//! event routed back to the owning coroutine's instance mailbox.

use crate::runtime::coroutine::CoroutineId;
use crate::runtime::error::Exception;
use crate::runtime::message::{event, EventMsg, InstanceMsg, RequestId};
use crate::value::Value;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Handle to one in-flight fetch, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchToken(pub u64);

/// HTTP-ish request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// Retrieve.
    Get,
    /// Submit `params` as the body.
    Post,
}

/// A request handed to the fetcher.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Target URL.
    pub url: String,
    /// Method.
    pub method: FetchMethod,
    /// Query or body parameters.
    pub params: Option<Value>,
    /// Give up after this long.
    pub timeout: Duration,
}

/// A successful fetch outcome.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Protocol status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

/// Completion route for one fetch: knows which coroutine asked and how to
/// reach its instance.
pub struct FetchContext {
    /// The requesting coroutine.
    pub owner: CoroutineId,
    /// Correlation id the owner is waiting on.
    pub request_id: RequestId,
    /// The owner's instance mailbox.
    pub events: UnboundedSender<InstanceMsg>,
}

impl FetchContext {
    /// Deliver the outcome as a `fetchResult` event.
    ///
    /// A dead mailbox means the instance is gone; the completion is dropped
    /// with a log line, which is the correct fate for it.
    pub fn complete(self, outcome: Result<FetchResponse, Exception>) {
        let msg = match outcome {
            Ok(response) => {
                let body = Value::string(String::from_utf8_lossy(&response.body).into_owned());
                EventMsg::fetch_result(self.request_id, event::sub_success(), Some(body))
            }
            Err(exception) => EventMsg::fetch_result(
                self.request_id,
                event::sub_except(),
                Some(Value::string(exception.category.as_str())),
            ),
        };
        if self
            .events
            .send(InstanceMsg::Event {
                target: self.owner,
                msg,
            })
            .is_err()
        {
            debug!(owner = %self.owner, "fetch completed after its instance exited");
        }
    }
}

/// Host-provided asynchronous fetcher.
pub trait Fetcher: Send + Sync {
    /// Start a request; completion arrives through `ctxt`.
    fn request_async(&self, request: FetchRequest, ctxt: FetchContext) -> FetchToken;

    /// Abandon an in-flight request. The fetcher must not complete it after
    /// this returns.
    fn cancel_async(&self, token: FetchToken);
}
