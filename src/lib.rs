//! Sprig – a cooperative coroutine runtime for tree-structured markup programs
//!
//! A program is an immutable tree of elements. Executing it means walking
//! the tree with a stack of frames, one per element on the current path,
//! where each tag contributes its own push/select/pop behavior: `test` and
//! `match` dispatch on data, `catch` consumes exceptions, `sleep` and `load`
//! suspend the coroutine and resume it when a timer fires or content
//! arrives, `exit` latches termination. Many such coroutines share one
//! cooperative scheduler inside an instance; instances live on their own
//! threads and exchange typed messages through the process-wide
//! [`InstanceManager`].
//!
//! [`InstanceManager`]: runtime::InstanceManager

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod atom;
pub mod runtime;
pub mod value;
pub mod vdom;

pub use atom::Atom;
pub use value::{evaluate_literal, Value, ValueKind};
pub use vdom::{Element, NodeId, NodeKind, Tag, VDom, VDomBuilder};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version of the instance control protocol.
pub const PROTOCOL_VERSION: &str = "1.0.0";
