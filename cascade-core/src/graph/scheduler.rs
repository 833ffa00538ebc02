//! Step Queue
//!
//! The queue holds the pending invocations of the step that is currently
//! draining. It has one FIFO bucket per [`Priority`].
//!
//! # Algorithm
//!
//! 1. Seeds and downstream invocations are pushed into the bucket of the
//!    target node's priority.
//! 2. The drain loop always pops the head of the lowest non-empty bucket.
//! 3. Invocations pushed while draining land in their own bucket, so a
//!    low-priority node enqueued late still runs before any higher-priority
//!    node that was already waiting.
//!
//! The result is breadth-within-priority, depth-across-priority: every
//! reducer of a step has committed before any join reads, every join has
//! settled before any sample reads, and side effects run last.

use std::collections::VecDeque;

use super::node::{NodeId, Payload, Priority};

/// A pending execution of one node with one payload.
pub struct Invocation {
    pub node: NodeId,
    pub priority: Priority,
    pub payload: Payload,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("node", &self.node)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Six-bucket priority queue for a single step.
#[derive(Debug, Default)]
pub struct StepQueue {
    buckets: [VecDeque<Invocation>; Priority::COUNT],
}

impl StepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an invocation at the back of its priority bucket.
    ///
    /// With `coalesce` set, an invocation of the same node that is still
    /// pending keeps its position and takes the new payload instead.
    pub fn push(&mut self, node: NodeId, priority: Priority, payload: Payload, coalesce: bool) {
        let bucket = &mut self.buckets[priority.index()];

        if coalesce {
            if let Some(pending) = bucket.iter_mut().find(|inv| inv.node == node) {
                pending.payload = payload;
                return;
            }
        }

        bucket.push_back(Invocation {
            node,
            priority,
            payload,
        });
    }

    /// Pop the head of the lowest non-empty bucket.
    pub fn pop(&mut self) -> Option<Invocation> {
        self.buckets
            .iter_mut()
            .find(|bucket| !bucket.is_empty())
            .and_then(VecDeque::pop_front)
    }

    /// Drop every pending invocation, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.len();
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(VecDeque::is_empty)
    }

    /// Number of pending invocations at the given priority.
    pub fn pending_at(&self, priority: Priority) -> usize {
        self.buckets[priority.index()].len()
    }
}
