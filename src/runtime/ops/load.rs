//! `load`: fetch external content, suspending until it arrives
//!
//! `from` names the URL. The frame starts an asynchronous fetch through the
//! instance's fetcher and yields waiting on the request id; the completion
//! event's body becomes the frame's question variable, so parents see the
//! fetched content as the clause result. A failed fetch re-raises its
//! category as a pending exception instead.

use super::ElementOps;
use crate::runtime::coroutine::WaitSpec;
use crate::runtime::error::Exception;
use crate::runtime::fetcher::{FetchContext, FetchMethod, FetchRequest, FetchToken};
use crate::runtime::message::{event, RequestId};
use crate::runtime::scheduler::OpCtx;
use crate::vdom::NodeId;
use std::any::Any;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

struct LoadCtxt {
    #[allow(dead_code)]
    token: FetchToken,
}

pub(super) struct LoadOps;

impl ElementOps for LoadOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let url = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("from"))
            .and_then(|v| v.as_str().map(str::to_string))
            .ok_or_else(|| Exception::bad_value("load requires a from attribute"))?;
        let fetcher = ctx
            .services
            .fetcher
            .clone()
            .ok_or_else(|| Exception::entity_not_found("no fetcher attached"))?;

        let request_id = RequestId::generate();
        let params = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("with").cloned());
        let request = FetchRequest {
            url: url.clone(),
            method: FetchMethod::Get,
            params,
            timeout: DEFAULT_TIMEOUT,
        };
        let fetch_ctxt = FetchContext {
            owner: ctx.co.cid,
            request_id: request_id.clone(),
            events: ctx.services.events.clone(),
        };
        let token = fetcher.request_async(request, fetch_ctxt);
        ctx.services.track_fetch(ctx.co.cid, token);
        debug!(cid = %ctx.co.cid, url, "load started");

        let cid = ctx.co.cid;
        ctx.co.yield_with(
            WaitSpec::Request(request_id),
            Box::new(move |ctx, msg| {
                ctx.services.untrack_fetch(cid, token);
                let Some(msg) = msg else { return };
                if msg.sub == Some(event::sub_except()) {
                    let category = msg
                        .data
                        .as_ref()
                        .and_then(|v| v.as_str())
                        .unwrap_or("brokenPipe");
                    ctx.co
                        .stack
                        .raise(Exception::bare(crate::atom::Atom::intern(category)));
                } else if let Some(frame) = ctx.co.stack.top_mut() {
                    frame.question = msg.data.unwrap_or_default();
                }
            }),
        );
        Ok(Some(Box::new(LoadCtxt { token })))
    }

    fn select_child(&self, _ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        None
    }
}
