//! Element operations and the execution engine
//!
//! Every element tag maps to one implementation of [`ElementOps`], the
//! four-hook protocol a frame goes through: `after_pushed` when the frame is
//! created, `select_child` while it walks its children, `on_popping` when it
//! is about to leave the stack, and `rerun` when popping is refused and the
//! body should run again. [`execute_step`] advances a coroutine by exactly
//! one of these steps, which is the unit of scheduling.

mod catch;
mod container;
mod exit;
mod iterate;
mod load;
mod match_clause;
mod sleep;

use crate::runtime::error::Exception;
use crate::runtime::frame::NextStep;
use crate::runtime::scheduler::OpCtx;
use crate::value::Value;
use crate::vdom::{NodeId, NodeKind, Tag};
use std::any::Any;
use std::sync::Arc;
use tracing::{trace, warn};

/// The hooks an element's execution goes through.
///
/// Implementations are stateless; per-frame state lives in the frame's
/// context slot, created by `after_pushed` and dropped when the frame pops.
pub trait ElementOps: Sync {
    /// Runs once when the frame is pushed. Returns the frame's context, or
    /// an exception to record as pending. A frame left without context
    /// selects no children and falls straight through to popping.
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception>;

    /// The next child to execute, in document order. `None` moves the frame
    /// to its popping step.
    fn select_child(&self, ctx: &mut OpCtx<'_>) -> Option<NodeId>;

    /// Runs when the frame is about to pop. Returning `false` asks for a
    /// rerun instead; the pop proceeds anyway if [`rerun`] then declines.
    ///
    /// [`rerun`]: ElementOps::rerun
    fn on_popping(&self, ctx: &mut OpCtx<'_>) -> bool {
        let _ = ctx;
        true
    }

    /// Reset the frame for another run of its body. Returning `true` sends
    /// the frame back to child selection.
    fn rerun(&self, ctx: &mut OpCtx<'_>) -> bool {
        let _ = ctx;
        false
    }

    /// Whether this element participates in exception handling. For
    /// everything else, a pending exception suppresses `after_pushed`.
    fn handles_exception(&self) -> bool {
        false
    }

    /// Observer for text content encountered during child selection.
    fn on_content(&self, ctx: &mut OpCtx<'_>, text: &str) {
        let _ = ctx;
        trace!(text, "content node skipped");
    }

    /// Observer for comments encountered during child selection.
    fn on_comment(&self, ctx: &mut OpCtx<'_>, text: &str) {
        let _ = ctx;
        trace!(text, "comment node skipped");
    }
}

/// The operations for a tag.
pub fn dispatch(tag: Tag) -> &'static dyn ElementOps {
    match tag {
        Tag::Catch => &catch::CatchOps,
        Tag::Test => &test::TestOps,
        Tag::Match => &match_clause::MatchOps,
        Tag::Exit => &exit::ExitOps,
        Tag::Sleep => &sleep::SleepOps,
        Tag::Iterate => &iterate::IterateOps,
        Tag::Load => &load::LoadOps,
        Tag::Hvml | Tag::Other(_) => &container::ContainerOps,
    }
}

/// Document-order child walk shared by container-like elements.
///
/// Returns the next element child after the frame's cursor, invoking the
/// content/comment observers for the nodes it skips. A frame without context
/// yields nothing, and a set re-entry anchor belonging to a frame further up
/// the stack drains this frame instead of letting it descend.
pub(crate) fn walk_children(ctx: &mut OpCtx<'_>, ops: &dyn ElementOps) -> Option<NodeId> {
    {
        let stack = &mut ctx.co.stack;
        let own_index = stack.depth().checked_sub(1)?;
        stack.top()?.ctxt.as_ref()?;
        match stack.back_anchor {
            Some(anchor) if anchor == own_index => stack.back_anchor = None,
            Some(_) => return None,
            None => {}
        }
    }
    let vdom = Arc::clone(ctx.co.stack.vdom());
    loop {
        let next = {
            let frame = ctx.co.stack.top()?;
            match frame.child_cursor {
                None => vdom.first_child(frame.pos),
                Some(prev) => vdom.next_sibling(prev),
            }
        };
        let id = next?;
        ctx.co.stack.top_mut()?.child_cursor = Some(id);
        match vdom.kind(id) {
            NodeKind::Element(_) => return Some(id),
            NodeKind::Content(text) => ops.on_content(ctx, text),
            NodeKind::Comment(text) => ops.on_comment(ctx, text),
            NodeKind::Document => {}
        }
    }
}

/// Advance the coroutine by one step.
pub fn execute_step(ctx: &mut OpCtx<'_>) {
    if !ctx.co.stack.started() {
        start_root(ctx);
        return;
    }
    let (tag, step) = match ctx.co.stack.top() {
        Some(frame) => (frame.tag, frame.next_step),
        None => return,
    };
    let ops = dispatch(tag);
    match step {
        NextStep::SelectChild => {
            if ctx.co.stack.exited {
                if let Some(frame) = ctx.co.stack.top_mut() {
                    frame.next_step = NextStep::OnPopping;
                }
                return;
            }
            match ops.select_child(ctx) {
                Some(child) => push_element(ctx, child),
                None => {
                    if let Some(frame) = ctx.co.stack.top_mut() {
                        frame.next_step = NextStep::OnPopping;
                    }
                }
            }
        }
        NextStep::OnPopping => {
            let done = ops.on_popping(ctx);
            let may_rerun = !ctx.co.stack.exited && ctx.co.stack.except.is_none();
            if !done && may_rerun && ops.rerun(ctx) {
                if let Some(frame) = ctx.co.stack.top_mut() {
                    frame.next_step = NextStep::SelectChild;
                }
                return;
            }
            let popped = ctx.co.stack.pop_frame();
            if let Some(result) = ctx.co.stack.propagate_result(&popped) {
                // An uncaught exception is the terminal status; the root's
                // question is not a result then.
                if ctx.co.result.is_none() && ctx.co.stack.except.is_none() {
                    ctx.co.result = Some(result);
                }
            }
        }
    }
}

/// Push the frame for the element at `pos` and run its push hook.
pub(crate) fn push_element(ctx: &mut OpCtx<'_>, pos: NodeId) {
    let tag = match ctx.co.stack.vdom().element(pos) {
        Some(el) => el.tag,
        None => return,
    };
    let ops = dispatch(tag);
    if let Err(exception) = ctx.co.stack.push_frame(pos, tag) {
        ctx.co.stack.raise(exception);
        return;
    }
    if ctx.co.stack.except.is_some() && !ops.handles_exception() {
        // Pending exception: the element is traversed but not executed, so
        // a later catch in document order can still be reached.
        trace!(%tag, "push hook suppressed by pending exception");
        return;
    }
    match ops.after_pushed(ctx) {
        Ok(ctxt) => {
            if let Some(frame) = ctx.co.stack.top_mut() {
                frame.ctxt = ctxt;
            }
        }
        Err(exception) => {
            ctx.co.stack.raise(exception);
            if let Some(frame) = ctx.co.stack.top_mut() {
                frame.next_step = NextStep::OnPopping;
            }
        }
    }
}

/// First step of a fresh coroutine: push its entry element.
fn start_root(ctx: &mut OpCtx<'_>) {
    let vdom = Arc::clone(ctx.co.stack.vdom());
    let entry = match ctx.co.body_id.as_deref() {
        Some(id) => match vdom.find_element_by_id(id) {
            Some(node) => Some(node),
            None => {
                warn!(body_id = id, "no element with that id, executing the root");
                vdom.root_element()
            }
        },
        None => vdom.root_element(),
    };
    match entry {
        Some(root) => {
            push_element(ctx, root);
            if let Some(request) = ctx.co.request.clone() {
                if let Some(frame) = ctx.co.stack.top_mut() {
                    frame.question = request;
                }
            }
        }
        None => {
            ctx.co.stack.mark_started();
            ctx.co.stack.raise(Exception::no_data("program has no root element"));
            ctx.co.stack.exited = true;
        }
    }
}

/// Pop every live frame, running popping hooks, without selecting children
/// or honoring reruns. Used when a coroutine is killed.
pub(crate) fn unwind(ctx: &mut OpCtx<'_>) {
    while ctx.co.stack.depth() > 0 {
        let tag = match ctx.co.stack.top() {
            Some(frame) => frame.tag,
            None => break,
        };
        let ops = dispatch(tag);
        let _ = ops.on_popping(ctx);
        let _ = ctx.co.stack.pop_frame();
    }
}

/// Evaluate a comma-separated match rule against a question value.
///
/// `*` matches anything; each term is tried as a JSON literal first (so `2`
/// matches the integer two and `2.0` does as well), falling back to string
/// comparison against the question's text rendition.
pub(crate) fn rule_matches(rule: &str, question: &Value) -> bool {
    let rule = rule.trim();
    if rule == "*" {
        return true;
    }
    rule.split(',').any(|term| {
        let term = term.trim();
        if term.is_empty() {
            return false;
        }
        let literal = crate::value::evaluate_literal(term);
        literal.loose_eq(question) || term == question.to_string()
    })
}
