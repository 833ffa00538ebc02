//! Forwarding between units.
//!
//! `forward` connects a unit's outputs to a target through a relay node at
//! child priority. Relays are the only nodes that coalesce: if a relay is
//! already queued in the running step, a second payload replaces the first
//! in place.

use crate::error::{Error, Result};
use crate::graph::NodeKind;

use super::runtime::Graph;
use super::unit::{Data, Target, Unit};

impl Graph {
    /// Deliver every payload of `from` to `to`.
    ///
    /// Fails with [`Error::ForwardCycle`] when `to` already leads back to
    /// `from` through nodes that never filter, since such a loop would never
    /// terminate.
    pub fn forward<T, U, G>(&self, from: &U, to: &G) -> Result<()>
    where
        T: Data,
        U: Unit<Payload = T>,
        G: Target<T>,
    {
        self.ensure_owns(from.graph(), from.node_id())?;
        self.ensure_owns(to.target_graph(), to.target_node())?;

        let source = from.node_id();
        let target = to.target_node();
        if self.reaches_through_pass_through(target, source) {
            return Err(Error::ForwardCycle {
                from: source,
                to: target,
            });
        }

        let relay = self.add_node(NodeKind::Relay, None, None);
        self.link(source, relay);
        self.link(relay, target);
        Ok(())
    }
}
