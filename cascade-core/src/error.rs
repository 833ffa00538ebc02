//! Error types for graph construction and step execution.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error produced by a node's computation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Identity of a node as shown in logs and errors: `name#id` or `#id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub name: Option<Arc<str>>,
}

impl NodeRef {
    pub fn new(id: NodeId, name: Option<Arc<str>>) -> Self {
        Self { id, name }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}{}", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed graph configuration, reported at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// A unit created by one graph was passed to another.
    #[error("{0} belongs to a different graph")]
    ForeignUnit(NodeId),

    /// A forward would close a loop made only of pass-through nodes.
    #[error("forwarding {from} -> {to} creates a cycle with no terminating node")]
    ForwardCycle { from: NodeId, to: NodeId },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A fallible reducer or handler returned an error.
    #[error("handler failed in {node}: {source}")]
    Handler {
        node: NodeRef,
        #[source]
        source: BoxError,
    },

    /// A node computation panicked; the panic was caught at the step boundary.
    #[error("handler panicked in {node}: {message}")]
    Panicked { node: NodeRef, message: String },

    /// A payload reached a node that expected a different type.
    #[error("payload type mismatch: expected {expected}")]
    PayloadMismatch { expected: &'static str },

    /// A step ran more invocations than the configured limit.
    #[error("step exceeded {limit} invocations (last executed {node})")]
    StepLimit { limit: usize, node: NodeRef },

    /// The effect runner could not accept a task.
    #[error("effect runner unavailable: {0}")]
    Runner(String),
}

impl Error {
    /// Whether this error was raised while building the graph rather than
    /// while running a step.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::ForeignUnit(_) | Error::ForwardCycle { .. }
        )
    }
}
