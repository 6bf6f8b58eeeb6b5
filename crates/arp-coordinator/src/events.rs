//! Broadcast of committed changes.
//!
//! Events are published only after the store commits. Slow subscribers lag
//! and skip events; publishing never waits on them.

use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{CoordinatorEvent, NodeRun, NodeRunEvent, NodeRunEventKind, Run, RunEvent};

/// Default broadcast buffer size
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn node_run(&self, kind: NodeRunEventKind, node_run: &NodeRun) {
        self.publish(CoordinatorEvent::NodeRun(NodeRunEvent::new(kind, node_run)));
    }

    pub(crate) fn run(&self, run: &Run) {
        self.publish(CoordinatorEvent::Run(RunEvent::new(run)));
    }

    fn publish(&self, event: CoordinatorEvent) {
        // No receivers is not an error
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}
