//! The execution stack
//!
//! A coroutine's progress through its tree is a stack of frames, one per
//! element on the path from the root to the element being executed. The
//! bottom of the stack is the most recently pushed frame. The stack also
//! carries the coroutine-wide execution flags: the pending exception, the
//! exited latch, and the re-entry anchor used by repeating elements.

use crate::runtime::error::Exception;
use crate::runtime::frame::StackFrame;
use crate::value::{evaluate_literal, Value};
use crate::vdom::{NodeId, Tag, VDom};
use std::sync::Arc;
use tracing::warn;

/// The frame stack plus coroutine-wide execution flags.
pub struct ExecutionStack {
    vdom: Arc<VDom>,
    frames: Vec<StackFrame>,
    /// The pending exception, if one has been raised and not yet consumed.
    pub except: Option<Exception>,
    /// Latched by `exit`; once set, no new children are selected anywhere.
    pub exited: bool,
    /// Stack index a repeating element marks before rerunning its body.
    /// Child selection below the anchor restarts instead of resuming.
    pub back_anchor: Option<usize>,
    max_depth: usize,
    started: bool,
}

impl ExecutionStack {
    /// A stack ready to execute `vdom`, with no frames pushed yet.
    pub fn new(vdom: Arc<VDom>, max_depth: usize) -> Self {
        ExecutionStack {
            vdom,
            frames: Vec::new(),
            except: None,
            exited: false,
            back_anchor: None,
            max_depth,
            started: false,
        }
    }

    /// The tree this stack executes.
    pub fn vdom(&self) -> &Arc<VDom> {
        &self.vdom
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether execution has started and run to completion.
    ///
    /// An unstarted stack is also empty, but it is not finished; the first
    /// scheduling step pushes the root element.
    pub fn finished(&self) -> bool {
        self.started && self.frames.is_empty()
    }

    /// Whether the root element has ever been pushed.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Mark execution as started even though nothing was pushed. Only used
    /// for programs with no entry element, so they can finish immediately.
    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }

    /// The executing frame.
    pub fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    /// The executing frame, mutably.
    pub fn top_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut()
    }

    /// The executing frame's parent frame, mutably.
    pub fn parent_mut(&mut self) -> Option<&mut StackFrame> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        self.frames.get_mut(len - 2)
    }

    /// Record a pending exception. If one is already pending the first wins;
    /// the newcomer is logged and dropped.
    pub fn raise(&mut self, exception: Exception) {
        match &self.except {
            None => self.except = Some(exception),
            Some(first) => {
                warn!(
                    pending = %first.category,
                    dropped = %exception.category,
                    "exception raised while another is pending"
                );
            }
        }
    }

    /// Take the pending exception, if any.
    pub fn take_except(&mut self) -> Option<Exception> {
        self.except.take()
    }

    /// Push a fresh frame for the element at `pos`, evaluating its attributes.
    ///
    /// Attribute text is evaluated exactly once here: JSON literals become
    /// values, `$?` becomes the result of the preceding sibling (or the
    /// parent's question variable when no sibling has run yet), everything
    /// else stays a string. Exceeding the depth limit raises `memoryFailure`
    /// and pushes nothing.
    pub fn push_frame(&mut self, pos: NodeId, tag: Tag) -> Result<(), Exception> {
        if self.frames.len() >= self.max_depth {
            return Err(Exception::memory_failure(format!(
                "execution stack exceeded {} frames",
                self.max_depth
            )));
        }
        let mut frame = StackFrame::new(pos, tag);
        let vdom = Arc::clone(&self.vdom);
        if let Some(element) = vdom.element(pos) {
            for (name, raw) in &element.attrs {
                let value = if raw.trim() == "$?" {
                    self.top()
                        .map(|parent| {
                            parent
                                .result_from_child
                                .clone()
                                .unwrap_or_else(|| parent.question.clone())
                        })
                        .unwrap_or_default()
                } else {
                    evaluate_literal(raw)
                };
                frame.attrs.insert(name.clone(), value);
            }
        }
        self.frames.push(frame);
        self.started = true;
        Ok(())
    }

    /// Pop the executing frame.
    ///
    /// Popping an empty stack is a runtime bug, not program data, and panics.
    pub fn pop_frame(&mut self) -> StackFrame {
        self.frames.pop().expect("pop on an empty execution stack")
    }

    /// Report a popped frame's question variable to its parent, or as the
    /// stack's final result when the root just popped.
    ///
    /// Returns the final result if the pop emptied the stack.
    pub fn propagate_result(&mut self, popped: &StackFrame) -> Option<Value> {
        match self.top_mut() {
            Some(parent) => {
                parent.result_from_child = Some(popped.question.clone());
                None
            }
            None => Some(popped.question.clone()),
        }
    }

}

impl std::fmt::Debug for ExecutionStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStack")
            .field("depth", &self.frames.len())
            .field("exited", &self.exited)
            .field("except", &self.except.as_ref().map(|e| e.category))
            .field("started", &self.started)
            .finish()
    }
}
