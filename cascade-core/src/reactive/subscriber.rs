//! Subscription handles for watchers.
//!
//! Every `watch` call creates an effect-priority node and returns a
//! [`Subscription`]. Dropping the handle keeps the watcher alive; call
//! [`Subscription::unsubscribe`] to detach it.

use crate::graph::NodeId;

use super::runtime::Graph;

#[derive(Debug, Clone)]
pub struct Subscription {
    graph: Graph,
    source: NodeId,
    node: NodeId,
}

impl Subscription {
    pub(crate) fn new(graph: Graph, source: NodeId, node: NodeId) -> Self {
        Self { graph, source, node }
    }

    /// The watcher's node.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The node being watched.
    pub fn source_id(&self) -> NodeId {
        self.source
    }

    /// Detach the watcher. Invocations of it still queued in a running step
    /// are skipped.
    pub fn unsubscribe(self) {
        self.graph.unlink(self.source, self.node);
        self.graph.remove_node(self.node);
    }
}
