use crate::graph::Node;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Receives execution events from [`Executor::execute_with`](super::Executor::execute_with).
/// Calls are serialized and follow plan order within each graph, also in parallel mode.
/// `depth` is 0 for the top-level graph and grows by one per control-flow body.
pub trait ExecutionObserver: Send {
    fn on_node_executed(&mut self, _node: &Node, _depth: usize, _start_instant: Instant, _end_instant: Instant) {}
    fn on_value_produced(&mut self, _name: &str, _depth: usize, _value: &Value) {}
}

impl ExecutionObserver for () {}

/// Shared flag that stops a run at the next node boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
