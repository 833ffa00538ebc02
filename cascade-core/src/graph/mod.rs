//! Propagation Graph
//!
//! This module holds the building blocks of the scheduler: nodes and the
//! per-step priority queue.
//!
//! # Overview
//!
//! The graph is a directed graph where:
//!
//! - Nodes are units of work (reducers, maps, joins, samples, watchers) or
//!   pass-through entry points (events, store outputs, forwards)
//! - An edge from A to B means every payload A produces is delivered to B
//!
//! Nodes are not ordered topologically. Instead every node carries a fixed
//! [`Priority`], and a step drains pending invocations strictly by priority
//! and then by enqueue order. That fixed tiering is what makes a step glitch
//! free: all store mutations of a step commit before anything reads them.
//!
//! # Design Decisions
//!
//! 1. Node behaviour is a tagged [`NodeKind`] plus a single `compute`
//!    closure, rather than a trait object per kind.
//!
//! 2. Subscribers are an insertion-ordered set, so registration order is
//!    the deterministic tie-break inside a priority.
//!
//! 3. The graph only stores forward edges. Nothing walks the graph
//!    backwards during a step.

mod node;
mod scheduler;

pub use node::{Compute, Node, NodeId, NodeInfo, NodeKind, Payload, Priority};
pub use scheduler::{Invocation, StepQueue};

pub(crate) use node::{downcast, payload, payload_ref};
