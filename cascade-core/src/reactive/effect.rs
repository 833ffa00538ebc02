//! Effect Implementation
//!
//! An Effect wraps an async handler. Calling it is a step like any other
//! fire; the handler's body runs outside the step on the graph's
//! [`EffectRunner`](super::runner::EffectRunner) and settles by launching a
//! new step.
//!
//! # How Effects Work
//!
//! 1. `call(params)` fires the effect's node. Its subscribers run in this
//!    order: the `in_flight` increment (pure), the node that starts the body
//!    (effect), then watchers added with [`Effect::watch`].
//!
//! 2. The body receives the params as an owned value. Anything it needs
//!    from stores should be passed in through `sample`, since a store read
//!    after the body suspends may see later commits.
//!
//! 3. When the body resolves or rejects, a new step fires `finally` with the
//!    outcome. `done`/`fail` and their `*_data` projections derive from it,
//!    and `in_flight` is decremented in that same step.
//!
//! 4. A body that panics is logged and only releases `in_flight`, so
//!    `pending` never sticks at `true`.
//!
//! # States
//!
//! `idle -> pending -> (resolved | rejected) -> idle`, tracked per effect by
//! the `in_flight` counter. Concurrent calls are independent and each one
//! settles with its own params.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{NodeRef, Result};
use crate::graph::{downcast, payload, Compute, NodeId, NodeKind};

use super::event::Event;
use super::runtime::{panic_message, Graph};
use super::store::Store;
use super::subscriber::Subscription;
use super::unit::{watch_node, Data, Target, Unit};

/// A resolved call.
#[derive(Debug, Clone, PartialEq)]
pub struct Done<P, D> {
    pub params: P,
    pub result: D,
}

/// A rejected call.
#[derive(Debug, Clone, PartialEq)]
pub struct Fail<P, E> {
    pub params: P,
    pub error: E,
}

/// Outcome of a call, as fired on [`Effect::finally`].
#[derive(Debug, Clone, PartialEq)]
pub enum Settled<P, D, E> {
    Done(Done<P, D>),
    Fail(Fail<P, E>),
}

impl<P, D, E> Settled<P, D, E> {
    pub fn params(&self) -> &P {
        match self {
            Settled::Done(done) => &done.params,
            Settled::Fail(fail) => &fail.params,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Settled::Done(_))
    }
}

type Handler<P, D, E> =
    Arc<dyn Fn(P) -> BoxFuture<'static, std::result::Result<D, E>> + Send + Sync>;

fn boxed_handler<P, D, E, F, Fut>(handler: F) -> Handler<P, D, E>
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<D, E>> + Send + 'static,
{
    Arc::new(move |params| handler(params).boxed())
}

/// An async side effect with params `P`, result `D` and error `E`.
///
/// # Example
///
/// ```rust,ignore
/// let fetch_user = graph.effect(|id: u64| async move {
///     client.get_user(id).await
/// });
///
/// let user = graph.store(None);
/// user.on(&fetch_user.done_data(), |_, found| Some(found.clone()))?;
/// fetch_user.call(42)?;
/// ```
pub struct Effect<P, D, E> {
    graph: Graph,
    id: NodeId,
    handler: Arc<RwLock<Handler<P, D, E>>>,
    in_flight: Store<usize>,
    pending: Store<bool>,
    finally: Event<Settled<P, D, E>>,
    done: Event<Done<P, D>>,
    fail: Event<Fail<P, E>>,
    done_data: Event<D>,
    fail_data: Event<E>,
}

impl Graph {
    pub fn effect<P, D, E, F, Fut>(&self, handler: F) -> Effect<P, D, E>
    where
        P: Data,
        D: Data,
        E: Data,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<D, E>> + Send + 'static,
    {
        Effect::create(self, None, boxed_handler(handler))
    }

    pub fn effect_named<P, D, E, F, Fut>(&self, name: &str, handler: F) -> Effect<P, D, E>
    where
        P: Data,
        D: Data,
        E: Data,
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<D, E>> + Send + 'static,
    {
        Effect::create(self, Some(name.into()), boxed_handler(handler))
    }

    /// An effect around a synchronous handler. The handler still runs on the
    /// effect runner, never inside the step that called it.
    pub fn effect_sync<P, D, E, F>(&self, handler: F) -> Effect<P, D, E>
    where
        P: Data,
        D: Data,
        E: Data,
        F: Fn(P) -> std::result::Result<D, E> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.effect(move |params| {
            let handler = Arc::clone(&handler);
            async move { handler(params) }
        })
    }
}

impl<P: Data, D: Data, E: Data> Effect<P, D, E> {
    fn create(graph: &Graph, name: Option<Arc<str>>, handler: Handler<P, D, E>) -> Self {
        let id = graph.add_node(NodeKind::Source, name.clone(), None);
        let handler = Arc::new(RwLock::new(handler));

        let in_flight = Store::create(graph, None, 0_usize);
        in_flight.attach_reducer::<P, _>(id, |count, _| Ok(count + 1));
        let pending = in_flight.map(|count| *count > 0);

        let finally = Event::<Settled<P, D, E>>::create(graph, None);
        let aborted = Event::<()>::create(graph, None);

        let start = Self::start_compute(
            NodeRef::new(id, name.clone()),
            Arc::clone(&handler),
            (in_flight.clone(), pending.clone()),
            finally.id(),
            aborted.id(),
        );
        let start = graph.add_node(NodeKind::EffectStart, name, Some(start));
        graph.link(id, start);

        in_flight.attach_reducer::<Settled<P, D, E>, _>(finally.id(), |count, _| {
            Ok(count.saturating_sub(1))
        });
        in_flight.attach_reducer::<(), _>(aborted.id(), |count, _| Ok(count.saturating_sub(1)));

        let done = finally.filter_map(|settled| match settled {
            Settled::Done(done) => Some(done.clone()),
            Settled::Fail(_) => None,
        });
        let fail = finally.filter_map(|settled| match settled {
            Settled::Fail(fail) => Some(fail.clone()),
            Settled::Done(_) => None,
        });
        let done_data = done.map(|done| done.result.clone());
        let fail_data = fail.map(|fail| fail.error.clone());

        Self {
            graph: graph.clone(),
            id,
            handler,
            in_flight,
            pending,
            finally,
            done,
            fail,
            done_data,
            fail_data,
        }
    }

    fn start_compute(
        effect: NodeRef,
        handler: Arc<RwLock<Handler<P, D, E>>>,
        counters: (Store<usize>, Store<bool>),
        finally: NodeId,
        aborted: NodeId,
    ) -> Compute {
        let (in_flight, pending) = (counters.0.cell(), counters.1.cell());
        Arc::new(move |graph: &Graph, input| {
            let params = downcast::<P>(&input)?;
            let handler = Arc::clone(&*handler.read());
            let body = run_body(graph.clone(), effect.clone(), handler, params, finally, aborted);

            if let Err(err) = graph.runner().spawn(body) {
                // No settlement will follow, undo the increment here.
                let remaining = in_flight.read().saturating_sub(1);
                in_flight.commit(remaining);
                pending.commit(remaining > 0);
                return Err(err.into());
            }
            Ok(None)
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Start the effect with `params`.
    ///
    /// Returns once the calling step is done, before the body settles.
    pub fn call(&self, params: P) -> Result<()> {
        self.graph.launch([(self.id, payload(params))])
    }

    /// Run `f` with the params of every call, after the body was started.
    pub fn watch<F>(&self, f: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        watch_node(&self.graph, self.id, f)
    }

    /// Replace the handler. Calls already running keep the old one.
    pub fn use_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<D, E>> + Send + 'static,
    {
        *self.handler.write() = boxed_handler(handler);
    }

    /// `true` while at least one call has not settled.
    pub fn pending(&self) -> Store<bool> {
        self.pending.clone()
    }

    pub fn in_flight(&self) -> Store<usize> {
        self.in_flight.clone()
    }

    pub fn finally(&self) -> Event<Settled<P, D, E>> {
        self.finally.clone()
    }

    pub fn done(&self) -> Event<Done<P, D>> {
        self.done.clone()
    }

    pub fn fail(&self) -> Event<Fail<P, E>> {
        self.fail.clone()
    }

    pub fn done_data(&self) -> Event<D> {
        self.done_data.clone()
    }

    pub fn fail_data(&self) -> Event<E> {
        self.fail_data.clone()
    }
}

fn run_body<P: Data, D: Data, E: Data>(
    graph: Graph,
    effect: NodeRef,
    handler: Handler<P, D, E>,
    params: P,
    finally: NodeId,
    aborted: NodeId,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let outcome = AssertUnwindSafe(async { handler(params.clone()).await })
            .catch_unwind()
            .await;

        let seed = match outcome {
            Ok(Ok(result)) => (finally, payload(Settled::<P, D, E>::Done(Done { params, result }))),
            Ok(Err(error)) => (finally, payload(Settled::<P, D, E>::Fail(Fail { params, error }))),
            Err(panic) => {
                warn!(effect = %effect, panic = %panic_message(&*panic), "effect body panicked");
                (aborted, payload(()))
            }
        };

        // The step logs its own abort; nobody is waiting for this result.
        if let Err(err) = graph.launch([seed]) {
            debug!(effect = %effect, error = %err, "settlement step failed");
        }
    })
}

impl<P, D, E> Clone for Effect<P, D, E> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            id: self.id,
            handler: Arc::clone(&self.handler),
            in_flight: self.in_flight.clone(),
            pending: self.pending.clone(),
            finally: self.finally.clone(),
            done: self.done.clone(),
            fail: self.fail.clone(),
            done_data: self.done_data.clone(),
            fail_data: self.fail_data.clone(),
        }
    }
}

impl<P: Data, D: Data, E: Data> fmt::Debug for Effect<P, D, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("in_flight", &self.in_flight.read())
            .finish()
    }
}

impl<P: Data, D: Data, E: Data> Unit for Effect<P, D, E> {
    type Payload = P;

    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl<P: Data, D: Data, E: Data> Target<P> for Effect<P, D, E> {
    fn target_graph(&self) -> &Graph {
        &self.graph
    }

    fn target_node(&self) -> NodeId {
        self.id
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
