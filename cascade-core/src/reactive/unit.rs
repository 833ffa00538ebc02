//! Traits shared by events, stores and effects.

use std::sync::Arc;

use crate::graph::{payload_ref, Compute, NodeId, NodeKind};

use super::runtime::Graph;
use super::subscriber::Subscription;

/// Values that can travel through the graph.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T> Data for T where T: Clone + Send + Sync + 'static {}

/// Something that fires payloads of type `Payload`: an event, a store (its
/// committed values) or an effect (its call parameters).
pub trait Unit {
    type Payload: Data;

    fn graph(&self) -> &Graph;

    /// Node whose outputs carry `Payload`.
    fn node_id(&self) -> NodeId;
}

/// Something that accepts payloads of type `T` from `forward` or `sample`.
pub trait Target<T: Data> {
    fn target_graph(&self) -> &Graph;

    /// Node that receives forwarded payloads.
    fn target_node(&self) -> NodeId;
}

/// Attach an effect-priority callback to `source`.
pub(crate) fn watch_node<T, F>(graph: &Graph, source: NodeId, f: F) -> Subscription
where
    T: Data,
    F: Fn(&T) + Send + Sync + 'static,
{
    let compute: Compute = Arc::new(move |_, payload| {
        f(payload_ref::<T>(&payload)?);
        Ok(None)
    });
    let watcher = graph.add_node(NodeKind::Watch, None, Some(compute));
    graph.link(source, watcher);
    Subscription::new(graph.clone(), source, watcher)
}
