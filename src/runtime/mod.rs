//! The coroutine runtime
//!
//! Execution is organized in three layers. At the bottom, an
//! [`ExecutionStack`] of frames walks one program tree, with per-tag
//! behavior supplied by the element operations in [`ops`]. Above it, a
//! [`Scheduler`] steps many coroutines cooperatively inside one instance.
//! At the top, [`Instance`] pairs a scheduler with a mailbox on its own
//! thread, and [`InstanceManager`] starts instances by endpoint and routes
//! events between them.
//!
//! [`ExecutionStack`]: stack::ExecutionStack
//! [`Scheduler`]: scheduler::Scheduler
//! [`Instance`]: instance::Instance
//! [`InstanceManager`]: instance::InstanceManager

pub mod coroutine;
pub mod error;
pub mod fetcher;
pub mod frame;
pub mod instance;
pub mod message;
pub mod ops;
pub mod renderer;
pub mod scheduler;
pub mod stack;
pub mod timer;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use coroutine::{Coroutine, CoroutineId, CoroutineState, WaitSpec};
pub use error::{CoreError, CoreResult, Exception, TransportError, TransportResult};
pub use instance::{Instance, InstanceHandle, InstanceManager};
pub use message::{
    CreateCoroutinePayload, EventMsg, InstanceMsg, MsgData, MsgTarget, Operation, PageParams,
    PageType, RequestId, RequestMsg, ResponseMsg, RetCode,
};
pub use scheduler::{EventRouter, Outcome, Scheduler};
pub use stack::ExecutionStack;
pub use timer::Clock;

/// Tunables for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long the instance loop sleeps when a pass found no work.
    pub schedule_sleep_ms: u64,
    /// Quiet period before the idle event is broadcast.
    pub idle_timeout_ms: u64,
    /// Frame count at which pushing raises a `memoryFailure` exception.
    pub max_stack_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            schedule_sleep_ms: 10,
            idle_timeout_ms: 100,
            max_stack_depth: 512,
        }
    }
}

impl RuntimeConfig {
    /// Idle loop sleep as a duration.
    pub fn schedule_sleep(&self) -> Duration {
        Duration::from_millis(self.schedule_sleep_ms)
    }

    /// Idle broadcast threshold as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = RuntimeConfig::default();
        assert!(config.schedule_sleep() < config.idle_timeout());
        assert!(config.max_stack_depth >= 64);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = RuntimeConfig {
            schedule_sleep_ms: 5,
            idle_timeout_ms: 50,
            max_stack_depth: 128,
        };
        let text = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.max_stack_depth, 128);
        assert_eq!(back.idle_timeout_ms, 50);
    }
}
