//! `match`: one clause of a `test`
//!
//! The `for` rule is evaluated against the parent test's question variable
//! at push time. A matching clause inherits the question and runs its body;
//! a non-matching clause runs nothing. With `exclusively`, a matching clause
//! raises the stop flag in the parent test's context when it pops, which
//! stops the test from trying further clauses.

use super::test::TestCtxt;
use super::{rule_matches, walk_children, ElementOps};
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::value::Value;
use crate::vdom::{NodeId, Tag};
use std::any::Any;
use tracing::trace;

struct MatchCtxt {
    matched: bool,
    exclusively: bool,
}

pub(super) struct MatchOps;

impl ElementOps for MatchOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let (parent_tag, question) = match ctx.co.stack.parent_mut() {
            Some(parent) => (parent.tag, parent.question.clone()),
            None => (Tag::Hvml, Value::null()),
        };
        if parent_tag != Tag::Test {
            return Err(Exception::entity_not_found(
                "match is only meaningful inside a test",
            ));
        }
        // The rule text is read raw off the element so comma lists and
        // unquoted terms keep their source spelling.
        let rule = {
            let frame = ctx.co.stack.top().ok_or_else(|| {
                Exception::entity_not_found("match pushed without a frame")
            })?;
            ctx.co
                .stack
                .vdom()
                .element(frame.pos)
                .and_then(|el| el.attr_raw("for"))
                .map(str::to_string)
        };
        let matched = match rule.as_deref() {
            Some(rule) => rule_matches(rule, &question),
            // No rule behaves as the wildcard clause.
            None => true,
        };
        let exclusively = ctx
            .co
            .stack
            .top()
            .is_some_and(|frame| frame.has_attr("exclusively"));
        trace!(matched, exclusively, "match clause evaluated");
        if matched {
            if let Some(frame) = ctx.co.stack.top_mut() {
                frame.question = question;
            }
        }
        Ok(Some(Box::new(MatchCtxt {
            matched,
            exclusively,
        })))
    }

    fn select_child(&self, ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        let matched = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.ctxt_ref::<MatchCtxt>())
            .is_some_and(|c| c.matched);
        if !matched {
            return None;
        }
        walk_children(ctx, self)
    }

    fn on_popping(&self, ctx: &mut OpCtx<'_>) -> bool {
        // Exclusivity is signalled out of band, not through the result
        // channel; a question that happens to be boolean true must not
        // suppress the remaining clauses.
        let exclusive_hit = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.ctxt_ref::<MatchCtxt>())
            .is_some_and(|c| c.matched && c.exclusively);
        if exclusive_hit {
            if let Some(test) = ctx
                .co
                .stack
                .parent_mut()
                .and_then(|parent| parent.ctxt_mut::<TestCtxt>())
            {
                test.stop = true;
            }
        }
        true
    }
}
