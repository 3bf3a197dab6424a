//! Stack frames
//!
//! One frame per element currently being executed. The frame records where it
//! sits in the tree, which step runs next when the coroutine gets its turn,
//! the element's evaluated attributes, and the per-element scratch state its
//! operations hang off the `ctxt` slot.

use crate::value::Value;
use crate::vdom::{NodeId, Tag};
use std::any::Any;
use std::collections::HashMap;

/// Which step the frame performs when execution reaches it next.
///
/// Suspension and resumption work by leaving the frame on the stack with the
/// right step recorded here, so a resumed coroutine re-enters exactly where
/// it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// Pick (and push) the next child, or move to popping when exhausted.
    SelectChild,
    /// Run the element's popping hook and leave the stack.
    OnPopping,
}

/// One live element on the execution stack.
pub struct StackFrame {
    /// The element this frame executes. Set exactly once, at push.
    pub pos: NodeId,
    /// Tag identity, cached for dispatch.
    pub tag: Tag,
    /// Per-element operation state. `None` means the element's push hook was
    /// skipped or produced nothing; child selection then yields no children.
    pub ctxt: Option<Box<dyn Any + Send>>,
    /// The next step to execute for this frame.
    pub next_step: NextStep,
    /// Attribute values, evaluated once at push.
    pub attrs: HashMap<String, Value>,
    /// Last child handed out by selection; the walk resumes after it.
    pub child_cursor: Option<NodeId>,
    /// The frame's question variable (`$?` seen by children).
    pub question: Value,
    /// Result reported by the most recently popped child.
    pub result_from_child: Option<Value>,
}

impl StackFrame {
    /// A fresh frame positioned at `pos`, ready for its push hook.
    pub fn new(pos: NodeId, tag: Tag) -> Self {
        StackFrame {
            pos,
            tag,
            ctxt: None,
            next_step: NextStep::SelectChild,
            attrs: HashMap::new(),
            child_cursor: None,
            question: Value::null(),
            result_from_child: None,
        }
    }

    /// Evaluated value of the named attribute.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// Whether the attribute is present at all (even with an empty value).
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Downcast the context slot.
    pub fn ctxt_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.ctxt.as_mut()?.downcast_mut::<T>()
    }

    /// Downcast the context slot immutably.
    pub fn ctxt_ref<T: 'static>(&self) -> Option<&T> {
        self.ctxt.as_ref()?.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackFrame")
            .field("pos", &self.pos)
            .field("tag", &self.tag)
            .field("next_step", &self.next_step)
            .field("has_ctxt", &self.ctxt.is_some())
            .field("question", &self.question)
            .finish()
    }
}
