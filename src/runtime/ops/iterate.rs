//! `iterate`: run the body once per item
//!
//! `on` provides the items (an array, or a single value treated as a
//! one-item list). Each pass sets the frame's question variable to the
//! current item; when the body finishes, popping is refused and the frame
//! reruns with the next item. The rerun plants the re-entry anchor so any
//! frames below drain back to this one before the next pass starts.

use super::{walk_children, ElementOps};
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::value::Value;
use crate::vdom::NodeId;
use std::any::Any;
use tracing::trace;

struct IterateCtxt {
    items: Vec<Value>,
    index: usize,
}

pub(super) struct IterateOps;

impl ElementOps for IterateOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let on = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("on").cloned())
            .ok_or_else(|| Exception::invalid_value("iterate requires an on attribute"))?;
        let items = match on.as_array() {
            Some(items) => items.to_vec(),
            None => vec![on],
        };
        if let (Some(first), Some(frame)) = (items.first().cloned(), ctx.co.stack.top_mut()) {
            frame.question = first;
        }
        Ok(Some(Box::new(IterateCtxt { items, index: 0 })))
    }

    fn select_child(&self, ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        let empty = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.ctxt_ref::<IterateCtxt>())
            .map_or(true, |c| c.items.is_empty());
        if empty {
            return None;
        }
        walk_children(ctx, self)
    }

    fn on_popping(&self, ctx: &mut OpCtx<'_>) -> bool {
        ctx.co
            .stack
            .top()
            .and_then(|frame| frame.ctxt_ref::<IterateCtxt>())
            .map_or(true, |c| c.index + 1 >= c.items.len())
    }

    fn rerun(&self, ctx: &mut OpCtx<'_>) -> bool {
        let own_index = match ctx.co.stack.depth().checked_sub(1) {
            Some(index) => index,
            None => return false,
        };
        let next = {
            let frame = match ctx.co.stack.top_mut() {
                Some(frame) => frame,
                None => return false,
            };
            match frame.ctxt_mut::<IterateCtxt>() {
                Some(c) if c.index + 1 < c.items.len() => {
                    c.index += 1;
                    c.items[c.index].clone()
                }
                _ => return false,
            }
        };
        trace!(%next, "iterate advancing");
        if let Some(frame) = ctx.co.stack.top_mut() {
            frame.question = next;
            frame.child_cursor = None;
            frame.result_from_child = None;
        }
        ctx.co.stack.back_anchor = Some(own_index);
        true
    }
}
