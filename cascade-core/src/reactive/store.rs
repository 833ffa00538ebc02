//! Store Implementation
//!
//! A Store is a named, versioned cell holding the latest committed value.
//!
//! # How Stores Work
//!
//! 1. Reducers attached with [`Store::on`] run at pure priority. Each one
//!    reads the current value, computes the next one and commits it before
//!    the scheduler moves on, so every later node of the same step sees it.
//!
//! 2. A commit of a value equal to the current one is skipped: no version
//!    bump and nothing fires downstream.
//!
//! 3. A real commit fires the store's own node with the new value. Watchers,
//!    maps and joins subscribe to that node.
//!
//! # Memory Layout
//!
//! Each store consists of:
//! - the store's own node (child priority, fires committed values)
//! - a setter node, used when the store is the target of forward/sample
//! - a shared cell with the value, the initial value and the version

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BoxError, Result};
use crate::graph::{payload, payload_ref, Compute, NodeId, NodeKind, Payload};

use super::event::Event;
use super::runtime::Graph;
use super::subscriber::Subscription;
use super::unit::{watch_node, Data, Target, Unit};

/// Values a store can hold. Equality decides whether a commit is a change.
pub trait StoreValue: Data + PartialEq {}

impl<T> StoreValue for T where T: Data + PartialEq {}

pub(crate) struct StoreCell<T> {
    value: RwLock<T>,
    initial: T,
    version: AtomicU64,
}

impl<T: StoreValue> StoreCell<T> {
    fn new(initial: T) -> Self {
        Self {
            value: RwLock::new(initial.clone()),
            initial,
            version: AtomicU64::new(0),
        }
    }

    pub(crate) fn read(&self) -> T {
        self.value.read().clone()
    }

    /// Commit `next`, returning the payload to fire if it changed the value.
    pub(crate) fn commit(&self, next: T) -> Option<Payload> {
        let mut value = self.value.write();
        if *value == next {
            return None;
        }
        *value = next.clone();
        self.version.fetch_add(1, Ordering::SeqCst);
        Some(payload(next))
    }
}

/// A versioned state cell.
///
/// # Example
///
/// ```rust,ignore
/// let graph = Graph::new();
/// let add = graph.event::<i64>();
/// let total = graph.store(0_i64);
///
/// total.on(&add, |sum, n| sum + n)?;
/// add.fire(5)?;
/// assert_eq!(total.read(), 5);
/// ```
pub struct Store<T> {
    graph: Graph,
    id: NodeId,
    setter: NodeId,
    cell: Arc<StoreCell<T>>,
}

impl Graph {
    pub fn store<T: StoreValue>(&self, initial: T) -> Store<T> {
        Store::create(self, None, initial)
    }

    pub fn store_named<T: StoreValue>(&self, name: &str, initial: T) -> Store<T> {
        Store::create(self, Some(name.into()), initial)
    }
}

impl<T: StoreValue> Store<T> {
    pub(crate) fn create(graph: &Graph, name: Option<Arc<str>>, initial: T) -> Self {
        let cell = Arc::new(StoreCell::new(initial));
        let id = graph.add_node(NodeKind::Source, name.clone(), None);

        let target = Arc::clone(&cell);
        let compute: Compute = Arc::new(move |_, input| {
            let value = payload_ref::<T>(&input)?;
            Ok(target.commit(value.clone()))
        });
        let setter = graph.add_node(NodeKind::Mutator, name, Some(compute));
        graph.link(setter, id);

        Self {
            graph: graph.clone(),
            id,
            setter,
            cell,
        }
    }

    pub(crate) fn cell(&self) -> Arc<StoreCell<T>> {
        Arc::clone(&self.cell)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        self.graph.node_info(self.id).and_then(|info| info.name)
    }

    /// The committed value at this instant.
    ///
    /// This is not step-aware. Called from an effect body after it has
    /// suspended, it returns whatever has been committed since, possibly by
    /// later steps. Use `sample` to carry a consistent snapshot instead.
    pub fn read(&self) -> T {
        self.cell.read()
    }

    /// Number of commits since creation.
    pub fn version(&self) -> u64 {
        self.cell.version.load(Ordering::SeqCst)
    }

    pub fn initial(&self) -> &T {
        &self.cell.initial
    }

    /// Set the value directly, bypassing reducers.
    ///
    /// Meant for initialization and resets. Inside a step on this thread the
    /// value is committed at once and joins that step. From any other thread
    /// the write waits until the running step has finished, so no node ever
    /// sees the store change under it.
    pub fn write(&self, value: T) -> Result<()> {
        self.graph.exclusive(|| match self.cell.commit(value) {
            Some(committed) => self.graph.launch([(self.id, committed)]),
            None => Ok(()),
        })
    }

    /// Update the store with `reducer` whenever `trigger` fires.
    pub fn on<U, F>(&self, trigger: &U, reducer: F) -> Result<&Self>
    where
        U: Unit,
        F: Fn(&T, &U::Payload) -> T + Send + Sync + 'static,
    {
        self.graph.ensure_owns(trigger.graph(), trigger.node_id())?;
        self.attach_reducer::<U::Payload, _>(trigger.node_id(), move |state, input| {
            Ok(reducer(state, input))
        });
        Ok(self)
    }

    /// Like [`Store::on`], but the reducer may fail. A failure aborts the
    /// step it happens in.
    pub fn try_on<U, F, E>(&self, trigger: &U, reducer: F) -> Result<&Self>
    where
        U: Unit,
        F: Fn(&T, &U::Payload) -> std::result::Result<T, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        self.graph.ensure_owns(trigger.graph(), trigger.node_id())?;
        self.attach_reducer::<U::Payload, _>(trigger.node_id(), move |state, input| {
            reducer(state, input).map_err(Into::into)
        });
        Ok(self)
    }

    /// Restore the initial value whenever `trigger` fires.
    pub fn reset<U: Unit>(&self, trigger: &U) -> Result<&Self> {
        self.graph.ensure_owns(trigger.graph(), trigger.node_id())?;
        let initial = self.cell.initial.clone();
        self.attach_reducer::<U::Payload, _>(trigger.node_id(), move |_, _| Ok(initial.clone()));
        Ok(self)
    }

    pub(crate) fn attach_reducer<P, F>(&self, trigger: NodeId, reducer: F)
    where
        P: Data,
        F: Fn(&T, &P) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let cell = Arc::clone(&self.cell);
        let compute: Compute = Arc::new(move |_, input| {
            let input = payload_ref::<P>(&input)?;
            let current = cell.read();
            let next = reducer(&current, input)?;
            Ok(cell.commit(next))
        });
        let name = self
            .graph
            .node_info(self.id)
            .and_then(|info| info.name)
            .map(Arc::<str>::from);
        let mutator = self.graph.add_node(NodeKind::Mutator, name, Some(compute));
        self.graph.link(trigger, mutator);
        self.graph.link(mutator, self.id);
    }

    /// Derived store holding `f` of this store's value.
    pub fn map<R, F>(&self, f: F) -> Store<R>
    where
        R: StoreValue,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let derived = Store::create(&self.graph, None, f(&self.read()));
        let cell = derived.cell();
        let compute: Compute = Arc::new(move |_, input| {
            let value = payload_ref::<T>(&input)?;
            Ok(cell.commit(f(value)))
        });
        let projection = self.graph.add_node(NodeKind::Projection, None, Some(compute));
        self.graph.link(self.id, projection);
        self.graph.link(projection, derived.id);
        derived
    }

    /// Run `f` with the current value now, then at effect priority after
    /// every commit.
    pub fn watch<F>(&self, f: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let subscription = watch_node(&self.graph, self.id, f);
        self.graph
            .launch([(subscription.node_id(), payload(self.read()))])?;
        Ok(subscription)
    }

    /// Event fired with the new value on every commit.
    pub fn updates(&self) -> Event<T> {
        let event = Event::create(&self.graph, None);
        self.graph.link(self.id, event.id());
        event
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            id: self.id,
            setter: self.setter,
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> fmt::Debug for Store<T>
where
    T: StoreValue + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("value", &self.read())
            .field("version", &self.version())
            .finish()
    }
}

impl<T: StoreValue> Unit for Store<T> {
    type Payload = T;

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<T: StoreValue> Target<T> for Store<T> {
    fn target_graph(&self) -> &Graph {
        &self.graph
    }

    fn target_node(&self) -> NodeId {
        self.setter
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
