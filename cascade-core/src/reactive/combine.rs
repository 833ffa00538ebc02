//! Combine Implementation
//!
//! `combine` derives a store from a group of stores. The join node runs at
//! barrier priority, after every reducer of the step has committed, and
//! re-reads all of its sources. However many sources changed in one step,
//! the derived value is computed from their final values and committed at
//! most once with a new value.
//!
//! A [`Source`] is anything that can be read as a group: a single store, a
//! tuple of up to six stores, or a `Vec` of stores of one type. `sample`
//! accepts the same groups, plus the empty group `()`.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::error::{Error, Result};
use crate::graph::{Compute, NodeId, NodeKind};

use super::runtime::Graph;
use super::store::{Store, StoreValue};
use super::unit::{Data, Unit};

/// Reads the current value of a source group.
pub type Reader<T> = Arc<dyn Fn() -> T + Send + Sync>;

/// A group of stores that can be read together.
pub trait Source: Clone + Send + Sync + 'static {
    type Value: Data;

    /// A reader that only holds the stores' cells, never the graph.
    fn reader(&self) -> Reader<Self::Value>;

    /// Nodes that fire when any member commits.
    fn nodes(&self) -> SmallVec<[NodeId; 4]>;

    /// Fail unless every member belongs to `graph`.
    fn check(&self, graph: &Graph) -> Result<()>;
}

impl<T: StoreValue> Source for Store<T> {
    type Value = T;

    fn reader(&self) -> Reader<T> {
        let cell = self.cell();
        Arc::new(move || cell.read())
    }

    fn nodes(&self) -> SmallVec<[NodeId; 4]> {
        smallvec![self.id()]
    }

    fn check(&self, graph: &Graph) -> Result<()> {
        graph.ensure_owns(self.graph(), self.id())
    }
}

/// The empty group. Only useful to `sample`, where the clock payload is all
/// there is to emit.
impl Source for () {
    type Value = ();

    fn reader(&self) -> Reader<()> {
        Arc::new(|| ())
    }

    fn nodes(&self) -> SmallVec<[NodeId; 4]> {
        SmallVec::new()
    }

    fn check(&self, _: &Graph) -> Result<()> {
        Ok(())
    }
}

macro_rules! tuple_source {
    ($($member:ident : $index:tt),+) => {
        impl<$($member: StoreValue),+> Source for ($(Store<$member>,)+) {
            type Value = ($($member,)+);

            fn reader(&self) -> Reader<Self::Value> {
                let cells = ($(self.$index.cell(),)+);
                Arc::new(move || ($(cells.$index.read(),)+))
            }

            fn nodes(&self) -> SmallVec<[NodeId; 4]> {
                smallvec![$(self.$index.id()),+]
            }

            fn check(&self, graph: &Graph) -> Result<()> {
                $(graph.ensure_owns(self.$index.graph(), self.$index.id())?;)+
                Ok(())
            }
        }
    };
}

tuple_source!(A: 0, B: 1);
tuple_source!(A: 0, B: 1, C: 2);
tuple_source!(A: 0, B: 1, C: 2, D: 3);
tuple_source!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_source!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

impl<T: StoreValue> Source for Vec<Store<T>> {
    type Value = Vec<T>;

    fn reader(&self) -> Reader<Vec<T>> {
        let cells: Vec<_> = self.iter().map(Store::cell).collect();
        Arc::new(move || cells.iter().map(|cell| cell.read()).collect())
    }

    fn nodes(&self) -> SmallVec<[NodeId; 4]> {
        self.iter().map(Store::id).collect()
    }

    fn check(&self, graph: &Graph) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Config("a source group needs at least one store".into()));
        }
        self.iter()
            .try_for_each(|store| graph.ensure_owns(store.graph(), store.id()))
    }
}

impl Graph {
    /// Derive a store from `source`, recomputed whenever a member commits.
    ///
    /// ```rust,ignore
    /// let total = graph.combine((price.clone(), quantity.clone()), |(p, q)| p * q)?;
    /// ```
    pub fn combine<S, R, F>(&self, source: S, f: F) -> Result<Store<R>>
    where
        S: Source,
        R: StoreValue,
        F: Fn(S::Value) -> R + Send + Sync + 'static,
    {
        source.check(self)?;
        if source.nodes().is_empty() {
            return Err(Error::Config("combine needs at least one store".into()));
        }

        let read = source.reader();
        let derived = Store::create(self, None, f(read()));
        let cell = derived.cell();
        let compute: Compute = Arc::new(move |_, _| Ok(cell.commit(f(read()))));
        let join = self.add_node(NodeKind::Join, None, Some(compute));

        for node in source.nodes() {
            self.link(node, join);
        }
        self.link(join, derived.id());
        Ok(derived)
    }
}
