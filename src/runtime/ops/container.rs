//! Generic container operations
//!
//! The root element and any tag without specialized behavior execute as a
//! plain container: walk the children in document order, then pop. The
//! frame's question variable starts as the parent's, so data flows down
//! through neutral elements unchanged.

use super::{walk_children, ElementOps};
use crate::runtime::error::Exception;
use crate::runtime::scheduler::OpCtx;
use crate::vdom::NodeId;
use std::any::Any;

struct ContainerCtxt;

pub(super) struct ContainerOps;

impl ElementOps for ContainerOps {
    fn after_pushed(&self, ctx: &mut OpCtx<'_>) -> Result<Option<Box<dyn Any + Send>>, Exception> {
        let inherited = ctx
            .co
            .stack
            .parent_mut()
            .map(|parent| parent.question.clone());
        if let (Some(question), Some(frame)) = (inherited, ctx.co.stack.top_mut()) {
            frame.question = question;
        }
        Ok(Some(Box::new(ContainerCtxt)))
    }

    fn select_child(&self, ctx: &mut OpCtx<'_>) -> Option<NodeId> {
        walk_children(ctx, self)
    }
}
