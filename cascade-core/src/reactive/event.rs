//! Event Implementation
//!
//! An Event is a stateless trigger. Firing it starts a step (or joins the
//! running one) seeded with the payload.
//!
//! Derived events (`map`, `filter`, `filter_map`) run their function at pure
//! priority and feed a fresh event, so the derived event can also be fired
//! directly.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::{payload, payload_ref, Compute, NodeId, NodeKind};

use super::runtime::Graph;
use super::subscriber::Subscription;
use super::unit::{watch_node, Data, Target, Unit};

/// A trigger carrying payloads of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let graph = Graph::new();
/// let clicked = graph.event::<u32>();
///
/// clicked.watch(|n| println!("clicked {n} times"));
/// clicked.fire(3)?;
/// ```
pub struct Event<T> {
    graph: Graph,
    id: NodeId,
    _payload: PhantomData<fn() -> T>,
}

impl Graph {
    pub fn event<T: Data>(&self) -> Event<T> {
        Event::create(self, None)
    }

    /// Create an event whose name shows up in logs and errors.
    pub fn event_named<T: Data>(&self, name: &str) -> Event<T> {
        Event::create(self, Some(name.into()))
    }
}

impl<T: Data> Event<T> {
    pub(crate) fn create(graph: &Graph, name: Option<Arc<str>>) -> Self {
        let id = graph.add_node(NodeKind::Source, name, None);
        Self {
            graph: graph.clone(),
            id,
            _payload: PhantomData,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Fire the event.
    ///
    /// Outside a step this runs a whole step before returning. Called from a
    /// node that is running, the payload is queued into the current step.
    pub fn fire(&self, value: T) -> Result<()> {
        self.graph.launch([(self.id, payload(value))])
    }

    /// Run `f` at effect priority every time the event fires.
    pub fn watch<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        watch_node(&self.graph, self.id, f)
    }

    pub fn map<R, F>(&self, f: F) -> Event<R>
    where
        R: Data,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        self.filter_map(move |value| Some(f(value)))
    }

    /// Derived event that only fires for payloads matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Event<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter_map(move |value| predicate(value).then(|| value.clone()))
    }

    pub fn filter_map<R, F>(&self, f: F) -> Event<R>
    where
        R: Data,
        F: Fn(&T) -> Option<R> + Send + Sync + 'static,
    {
        let derived = Event::create(&self.graph, None);
        let compute: Compute = Arc::new(move |_, input| {
            let value = payload_ref::<T>(&input)?;
            Ok(f(value).map(payload))
        });
        let projection = self.graph.add_node(NodeKind::Projection, None, Some(compute));
        self.graph.link(self.id, projection);
        self.graph.link(projection, derived.id);
        derived
    }
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            id: self.id,
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Data> Unit for Event<T> {
    type Payload = T;

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T: Data> Target<T> for Event<T> {
    fn target_graph(&self) -> &Graph {
        &self.graph
    }

    fn target_node(&self) -> NodeId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Priority;
    use parking_lot::Mutex;

    #[test]
    fn watchers_see_every_payload() {
        let graph = Graph::new();
        let event = graph.event::<i32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        event.watch(move |value| sink.lock().push(*value));

        event.fire(1).unwrap();
        event.fire(2).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn map_and_filter_derive_new_events() {
        let graph = Graph::new();
        let numbers = graph.event::<i32>();
        let even_labels = numbers
            .filter(|n| n % 2 == 0)
            .map(|n| format!("#{n}"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        even_labels.watch(move |label| sink.lock().push(label.clone()));

        for n in 1..=4 {
            numbers.fire(n).unwrap();
        }
        assert_eq!(*seen.lock(), vec!["#2".to_string(), "#4".to_string()]);
    }

    #[test]
    fn derived_event_can_be_fired_directly() {
        let graph = Graph::new();
        let source = graph.event::<i32>();
        let doubled = source.map(|n| n * 2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        doubled.watch(move |n| sink.lock().push(*n));

        source.fire(2).unwrap();
        doubled.fire(100).unwrap();
        assert_eq!(*seen.lock(), vec![4, 100]);
    }

    #[test]
    fn map_runs_before_watchers_of_the_source() {
        let graph = Graph::new();
        let event = graph.event::<()>();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        event.watch(move |_| log.lock().push("watch"));
        let log = order.clone();
        event.map(move |_| log.lock().push("map"));

        event.fire(()).unwrap();
        assert_eq!(*order.lock(), vec!["map", "watch"]);
    }

    #[test]
    fn named_events_carry_their_name() {
        let graph = Graph::new();
        let event = graph.event_named::<()>("submit");
        let info = graph.node_info(event.id()).unwrap();
        assert_eq!(info.name.as_deref(), Some("submit"));
        assert_eq!(info.priority, Priority::Child);
    }
}
