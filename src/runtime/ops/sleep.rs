//! `sleep`: suspend for a duration
//!
//! `with` must evaluate to a positive integer number of seconds. The frame
//! arms a one-shot timer and yields; the scheduler resumes the coroutine
//! when the timer comes due, after which the frame simply pops. Children of
//! a sleep are never executed.

use super::ElementOps;
use crate::runtime::coroutine::WaitSpec;
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::runtime::timer::TimerId;
use crate::vdom::NodeId;
use std::any::Any;
use std::time::Duration;
use tracing::debug;

struct SleepCtxt {
    timer: TimerId,
}

pub(super) struct SleepOps;

impl ElementOps for SleepOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let seconds = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("with"))
            .and_then(|v| v.cast_to_i64())
            .ok_or_else(|| Exception::invalid_value("sleep requires an integer with attribute"))?;
        if seconds <= 0 {
            return Err(Exception::invalid_value(
                "sleep interval must be a positive number of seconds",
            ));
        }
        let clock = ctx.services.clock.clone();
        let timer = ctx
            .services
            .timers
            .arm(&clock, ctx.co.cid, Duration::from_secs(seconds as u64));
        debug!(cid = %ctx.co.cid, seconds, "sleeping");
        // Nothing to do at wakeup; the frame pops on the next step.
        ctx.co.yield_with(WaitSpec::Timer(timer), Box::new(|_, _| {}));
        Ok(Some(Box::new(SleepCtxt { timer })))
    }

    fn select_child(&self, _ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        None
    }

    fn on_popping(&self, ctx: &mut OpCtx<'_>) -> bool {
        // Disarm in case the frame is unwound before the timer fires.
        let timer = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.ctxt_ref::<SleepCtxt>())
            .map(|c| c.timer);
        if let Some(timer) = timer {
            ctx.services.timers.cancel(timer);
        }
        true
    }
}
