//! `catch`: consume a pending exception
//!
//! A catch frame is pushed like any sibling, but it is the one element whose
//! push hook runs while an exception is pending. If the pending category is
//! named by the `for` attribute (space-separated list, `*` or no attribute
//! at all matches anything), the exception is taken out of the pending slot
//! and the catch body runs with the exception's data payload, or its
//! category name when it carries none, as its question variable. A
//! non-matching catch leaves the exception pending for a later handler.

use super::{walk_children, ElementOps};
use crate::atom::Atom;
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::value::Value;
use crate::vdom::NodeId;
use std::any::Any;
use tracing::debug;

struct CatchCtxt;

fn category_matches(rule: Option<&str>, category: Atom) -> bool {
    match rule {
        None => true,
        Some(rule) => {
            let rule = rule.trim();
            if rule.is_empty() || rule == "*" {
                return true;
            }
            rule.split_whitespace()
                .any(|term| term == "*" || Atom::try_string(term) == Some(category))
        }
    }
}

pub(super) struct CatchOps;

impl ElementOps for CatchOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let category = match &ctx.co.stack.except {
            Some(pending) => pending.category,
            // No exception in flight: the body does not run.
            None => return Ok(None),
        };
        let rule = ctx
            .co
            .stack
            .top()
            .and_then(|frame| frame.attr("for"))
            .and_then(|v| v.as_str().map(str::to_string));
        if !category_matches(rule.as_deref(), category) {
            debug!(%category, rule = rule.as_deref(), "catch does not handle this category");
            return Ok(None);
        }
        let caught = ctx
            .co
            .stack
            .take_except()
            .unwrap_or_else(|| Exception::bare(category));
        debug!(%category, "exception caught");
        let question = caught
            .data
            .unwrap_or_else(|| Value::string(category.as_str()));
        if let Some(frame) = ctx.co.stack.top_mut() {
            frame.question = question;
        }
        Ok(Some(Box::new(CatchCtxt)))
    }

    fn select_child(&self, ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        walk_children(ctx, self)
    }

    fn handles_exception(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_wildcard_rules_match() {
        let cat = Atom::intern("badValue");
        assert!(category_matches(None, cat));
        assert!(category_matches(Some("*"), cat));
        assert!(category_matches(Some(""), cat));
    }

    #[test]
    fn space_separated_list_matches_members_only() {
        let cat = Atom::intern("invalidValue");
        assert!(category_matches(Some("badValue invalidValue"), cat));
        assert!(!category_matches(Some("badValue noData"), cat));
        assert!(category_matches(Some("badValue *"), cat));
    }

    #[test]
    fn unknown_category_names_never_match() {
        // try_string avoids interning arbitrary rule text.
        let cat = Atom::intern("memoryFailure");
        assert!(!category_matches(Some("surely-never-interned-a7"), cat));
    }
}
