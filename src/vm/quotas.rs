//! Host-pluggable execution policy (spec.md §5): step/stack-depth quotas, wall-clock timeout,
//! and cooperative cancellation.
//!
//! Grounded on the teacher's `ResourceTracker` trait (`LimitedTracker`/`NoLimitTracker`),
//! generalized from allocation-counting to step-counting plus a cancellation channel, since
//! spec.md's resource model additionally covers wall-clock time and host-triggered abort.

use std::time::Duration;

use crate::error::Error;

/// Observes VM execution milestones; a host can implement this for tracing or metrics without
/// the VM depending on any particular logging crate (spec.md §4.5).
pub trait Observer {
    fn on_call(&mut self, _function_name: Option<&str>) {}
    fn on_return(&mut self) {}
    fn on_error(&mut self, _err: &Error) {}
}

/// An `Observer` that does nothing; the default when the host doesn't care.
pub struct NullObserver;

impl Observer for NullObserver {}

/// Polled by the VM between instructions to support host-triggered abort (spec.md §5:
/// "cancellation bypasses `finally`").
pub trait Cancel {
    fn is_cancelled(&self) -> bool;
}

/// A `Cancel` that never cancels.
pub struct NoCancel;

impl Cancel for NoCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Resource limits enforced while a program runs (spec.md §5). `None` means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quotas {
    pub max_steps: Option<u64>,
    pub max_stack_depth: Option<usize>,
    pub timeout: Option<Duration>,
}
