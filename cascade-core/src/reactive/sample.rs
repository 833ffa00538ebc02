//! Sample Implementation
//!
//! `sample` reads a source group whenever a clock fires and emits a snapshot:
//! an owned clone of the values, taken at the moment the sample node runs.
//!
//! By default the node runs at sampler priority, after every reducer and
//! join of the step, so the snapshot reflects the state the step produced.
//! With `.batch(false)` it runs at pure priority instead and may observe
//! values before later reducers of the same step commit.
//!
//! [`Graph::sample_unit`] samples an event, store or effect outcome with
//! itself as the clock. It is a filter/map over the payload that runs at
//! sampler priority.
//!
//! ```rust,ignore
//! graph
//!     .sample(balance.clone(), &withdraw)
//!     .filter(|balance, amount| balance >= amount)
//!     .map(|balance, amount| Transfer { balance, amount: *amount })
//!     .target(&transfer)?;
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::graph::{payload, payload_ref, Compute, NodeId, NodeKind, Priority};

use super::combine::Source;
use super::event::Event;
use super::runtime::Graph;
use super::unit::{Data, Target, Unit};

type Filter<V, C> = Arc<dyn Fn(&V, &C) -> bool + Send + Sync>;
type Mapper<V, C, R> = Arc<dyn Fn(V, &C) -> R + Send + Sync>;

/// Builder returned by [`Graph::sample`].
#[must_use = "a sample does nothing until `into_event` or `target` is called"]
pub struct Sample<S: Source, C, R> {
    graph: Graph,
    source: S,
    clock: NodeId,
    clock_graph: Graph,
    batch: bool,
    name: Option<Arc<str>>,
    filter: Option<Filter<S::Value, C>>,
    map: Mapper<S::Value, C, R>,
}

impl Graph {
    /// Sample `source` whenever `clock` fires.
    pub fn sample<S, U>(&self, source: S, clock: &U) -> Sample<S, U::Payload, S::Value>
    where
        S: Source,
        U: Unit,
    {
        Sample {
            graph: self.clone(),
            source,
            clock: clock.node_id(),
            clock_graph: clock.graph().clone(),
            batch: true,
            name: None,
            filter: None,
            map: Arc::new(|value: S::Value, _: &U::Payload| value),
        }
    }

    /// Sample `source` with itself as the clock.
    ///
    /// The snapshot is empty, so `filter` and `map` work on the payload
    /// alone, which by default is emitted unchanged. Unlike
    /// [`Event::filter_map`] the node runs at sampler priority, after every
    /// reducer the payload's step triggers.
    ///
    /// ```rust,ignore
    /// graph
    ///     .sample_unit(&validate.done_data())
    ///     .filter(|_, verdict| verdict.approved)
    ///     .map(|_, verdict| verdict.amount)
    ///     .target(&approved)?;
    /// ```
    pub fn sample_unit<U: Unit>(&self, source: &U) -> Sample<(), U::Payload, U::Payload> {
        Sample {
            graph: self.clone(),
            source: (),
            clock: source.node_id(),
            clock_graph: source.graph().clone(),
            batch: true,
            name: None,
            filter: None,
            map: Arc::new(|_: (), payload: &U::Payload| payload.clone()),
        }
    }
}

impl<S, C, R> Sample<S, C, R>
where
    S: Source,
    C: Data,
    R: Data,
{
    /// Run at sampler priority (`true`, the default) or at pure priority.
    pub fn batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Drop clock firings for which `predicate` is false.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&S::Value, &C) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }

    /// Build the emitted payload from the snapshot and the clock payload.
    pub fn map<R2, F>(self, f: F) -> Sample<S, C, R2>
    where
        R2: Data,
        F: Fn(S::Value, &C) -> R2 + Send + Sync + 'static,
    {
        Sample {
            graph: self.graph,
            source: self.source,
            clock: self.clock,
            clock_graph: self.clock_graph,
            batch: self.batch,
            name: self.name,
            filter: self.filter,
            map: Arc::new(f),
        }
    }

    /// Emit snapshots on a new event.
    pub fn into_event(self) -> Result<Event<R>> {
        self.check()?;
        let event = Event::create(&self.graph, self.name.clone());
        let output = event.id();
        self.build(output);
        Ok(event)
    }

    /// Deliver snapshots to `target`: an event, a store or an effect.
    pub fn target<T: Target<R>>(self, target: &T) -> Result<()> {
        self.check()?;
        self.graph
            .ensure_owns(target.target_graph(), target.target_node())?;
        self.build(target.target_node());
        Ok(())
    }

    fn check(&self) -> Result<()> {
        self.graph.ensure_owns(&self.clock_graph, self.clock)?;
        self.source.check(&self.graph)
    }

    fn build(self, output: NodeId) {
        let read = self.source.reader();
        let filter = self.filter;
        let map = self.map;
        let compute: Compute = Arc::new(move |_, input| {
            let clock = payload_ref::<C>(&input)?;
            let snapshot = read();
            if let Some(filter) = &filter {
                if !filter(&snapshot, clock) {
                    return Ok(None);
                }
            }
            Ok(Some(payload(map(snapshot, clock))))
        });

        let node = if self.batch {
            self.graph.add_node(NodeKind::Snapshot, self.name, Some(compute))
        } else {
            self.graph
                .add_node_at(NodeKind::Snapshot, Priority::Pure, self.name, Some(compute))
        };
        self.graph.link(self.clock, node);
        self.graph.link(node, output);
    }
}
