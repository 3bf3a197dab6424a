//! `exit`: terminate the coroutine
//!
//! The exited latch is set the moment the frame is pushed, before the `with`
//! attribute is even looked at. Validation can therefore raise an exception
//! and the coroutine still terminates; nothing downstream of `exit` runs
//! either way.

use super::ElementOps;
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::vdom::NodeId;
use std::any::Any;
use tracing::debug;

pub(super) struct ExitOps;

impl ElementOps for ExitOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        if ctx.co.stack.exited {
            return Ok(None);
        }
        ctx.co.stack.exited = true;

        let with = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("with").cloned());
        match with {
            Some(value) => {
                debug!(%value, "exit with result");
                ctx.co.result = Some(value);
                Ok(None)
            }
            None => Err(Exception::bad_value("exit requires a with attribute")),
        }
    }

    fn select_child(&self, _ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        None
    }
}
