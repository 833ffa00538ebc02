//! Graph Nodes
//!
//! This module defines the node types that live in the propagation graph.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::error::{BoxError, Error, NodeRef};
use crate::reactive::Graph;

/// Unique identifier for a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution tier of a node. Lower tiers drain first within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Pass-through relays: events, store entry points, forwards.
    Child = 0,
    /// Reducers and projections.
    Pure = 1,
    Read = 2,
    /// Joins over several stores.
    Barrier = 3,
    /// Snapshot reads of committed state.
    Sampler = 4,
    /// Watchers and effect starts.
    Effect = 5,
}

impl Priority {
    pub const COUNT: usize = 6;

    pub const ALL: [Priority; Priority::COUNT] = [
        Priority::Child,
        Priority::Pure,
        Priority::Read,
        Priority::Barrier,
        Priority::Sampler,
        Priority::Effect,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Child => "child",
            Priority::Pure => "pure",
            Priority::Read => "read",
            Priority::Barrier => "barrier",
            Priority::Sampler => "sampler",
            Priority::Effect => "effect",
        };
        f.write_str(label)
    }
}

/// The kind of node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry point of an event, store or effect. Passes payloads through.
    Source,

    /// A forward link. Passes payloads through and coalesces within a step.
    Relay,

    /// A reducer that commits a new store value.
    Mutator,

    /// A one-input map or filter.
    Projection,

    /// A join over several stores.
    Join,

    /// A sample: reads committed store values when it runs.
    Snapshot,

    /// Hands an effect body to the host runtime.
    EffectStart,

    /// A user callback observing values.
    Watch,
}

impl NodeKind {
    /// Priority a node of this kind runs at unless overridden.
    pub fn default_priority(self) -> Priority {
        match self {
            NodeKind::Source | NodeKind::Relay => Priority::Child,
            NodeKind::Mutator | NodeKind::Projection => Priority::Pure,
            NodeKind::Join => Priority::Barrier,
            NodeKind::Snapshot => Priority::Sampler,
            NodeKind::EffectStart | NodeKind::Watch => Priority::Effect,
        }
    }

    /// Whether pending invocations of this node collapse into one per step.
    pub fn coalesces(self) -> bool {
        self == NodeKind::Relay
    }
}

/// Type-erased value carried between nodes.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A node computation: maps the incoming payload to an outgoing one, or to
/// `None` when nothing should propagate downstream.
pub type Compute = Arc<dyn Fn(&Graph, Payload) -> Result<Option<Payload>, BoxError> + Send + Sync>;

pub(crate) fn payload<T: Send + Sync + 'static>(value: T) -> Payload {
    Arc::new(value)
}

/// Borrow the typed value inside a payload.
pub(crate) fn payload_ref<T: 'static>(payload: &Payload) -> Result<&T, BoxError> {
    payload.downcast_ref::<T>().ok_or_else(|| {
        Box::new(Error::PayloadMismatch {
            expected: std::any::type_name::<T>(),
        }) as BoxError
    })
}

/// Clone the typed value out of a payload.
pub(crate) fn downcast<T: Clone + 'static>(payload: &Payload) -> Result<T, BoxError> {
    payload_ref::<T>(payload).cloned()
}

/// A node in the propagation graph.
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    priority: Priority,
    name: Option<Arc<str>>,

    /// `None` for pass-through nodes.
    compute: Option<Compute>,

    /// Downstream nodes in registration order. The order is the tie-break
    /// between invocations of the same priority.
    subscribers: IndexSet<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind, priority: Priority, compute: Option<Compute>) -> Self {
        Self {
            id,
            kind,
            priority,
            name: None,
            compute,
            subscribers: IndexSet::new(),
        }
    }

    pub fn with_name(mut self, name: Option<Arc<str>>) -> Self {
        self.name = name;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.id, self.name.clone())
    }

    pub fn compute(&self) -> Option<&Compute> {
        self.compute.as_ref()
    }

    pub fn is_pass_through(&self) -> bool {
        self.compute.is_none()
    }

    /// Append a subscriber. Returns `false` if it was already subscribed.
    pub fn add_subscriber(&mut self, node_id: NodeId) -> bool {
        self.subscribers.insert(node_id)
    }

    /// Remove a subscriber, keeping the order of the others.
    pub fn remove_subscriber(&mut self, node_id: NodeId) -> bool {
        self.subscribers.shift_remove(&node_id)
    }

    pub fn subscribers(&self) -> &IndexSet<NodeId> {
        &self.subscribers
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("name", &self.name)
            .field("subscribers", &self.subscribers)
            .finish()
    }
}

/// Read-only view of a node, for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    pub priority: Priority,
    pub name: Option<String>,
    pub subscribers: Vec<NodeId>,
}

impl From<&Node> for NodeInfo {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            kind: node.kind,
            priority: node.priority,
            name: node.name().map(str::to_string),
            subscribers: node.subscribers.iter().copied().collect(),
        }
    }
}
