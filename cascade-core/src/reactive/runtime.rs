//! Graph Runtime
//!
//! The [`Graph`] is the owner context that every event, store, effect and
//! combinator is created from. It holds the node table and runs steps.
//!
//! # How a Step Works
//!
//! 1. Something from outside (firing an event, calling an effect, writing a
//!    store, an effect settling) seeds the step queue and takes the step
//!    lock.
//!
//! 2. The queue is drained lowest priority first, FIFO inside a priority.
//!    Each executed node may produce a payload, which is delivered to all of
//!    its subscribers at their own priorities.
//!
//! 3. The step ends when the queue is empty, or aborts on the first handler
//!    error. An aborted step drops whatever was still queued; stores that
//!    already committed keep their values.
//!
//! # Re-entrancy
//!
//! The step lock is re-entrant. A fire issued by a node while its step is
//! draining (on the same thread) joins that step instead of starting a
//! nested one. A fire from another thread blocks until the running step is
//! finished, so steps on one graph never interleave.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use smallvec::SmallVec;
use tracing::{debug, error, trace};

use crate::config::GraphConfig;
use crate::error::{Error, NodeRef, Result};
use crate::graph::{Compute, Node, NodeId, NodeInfo, NodeKind, Payload, Priority, StepQueue};

use super::runner::{EffectRunner, TokioRunner};

/// State of the step currently draining, if any.
#[derive(Debug, Default)]
struct StepState {
    running: bool,
    queue: StepQueue,
    /// Number of steps started so far.
    started: u64,
}

struct GraphInner {
    config: GraphConfig,
    next_node: AtomicU64,
    nodes: DashMap<NodeId, Node>,
    step: ReentrantMutex<RefCell<StepState>>,
    runner: Arc<dyn EffectRunner>,
}

/// Handle to a propagation graph.
///
/// Cloning is cheap; clones refer to the same graph. Independent graphs
/// share nothing, so tests can build as many as they like in isolation.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Create a graph with the default configuration. Effects run on the
    /// ambient Tokio runtime.
    pub fn new() -> Self {
        Self::build(GraphConfig::default(), Arc::new(TokioRunner::new()))
    }

    pub fn with_config(config: GraphConfig) -> Result<Self> {
        Self::with_runner(config, Arc::new(TokioRunner::new()))
    }

    /// Create a graph whose effect bodies are handed to `runner`.
    pub fn with_runner(config: GraphConfig, runner: Arc<dyn EffectRunner>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, runner))
    }

    fn build(config: GraphConfig, runner: Arc<dyn EffectRunner>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                config,
                next_node: AtomicU64::new(0),
                nodes: DashMap::new(),
                step: ReentrantMutex::new(RefCell::new(StepState::default())),
                runner,
            }),
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn node_info(&self, id: NodeId) -> Option<NodeInfo> {
        self.inner.nodes.get(&id).map(|node| NodeInfo::from(&*node))
    }

    /// Number of steps started on this graph.
    pub fn steps_started(&self) -> u64 {
        self.inner.step.lock().borrow().started
    }

    /// Whether a step is draining right now, on any thread.
    pub fn is_stepping(&self) -> bool {
        match self.inner.step.try_lock() {
            Some(guard) => guard.borrow().running,
            None => true,
        }
    }

    /// Resolves once no effect body is in flight on the graph's runner.
    pub fn settled(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.runner.idle()
    }

    pub(crate) fn runner(&self) -> &Arc<dyn EffectRunner> {
        &self.inner.runner
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Add a node running at its kind's default priority.
    pub(crate) fn add_node(
        &self,
        kind: NodeKind,
        name: Option<Arc<str>>,
        compute: Option<Compute>,
    ) -> NodeId {
        self.add_node_at(kind, kind.default_priority(), name, compute)
    }

    pub(crate) fn add_node_at(
        &self,
        kind: NodeKind,
        priority: Priority,
        name: Option<Arc<str>>,
        compute: Option<Compute>,
    ) -> NodeId {
        let id = NodeId::from(self.inner.next_node.fetch_add(1, Ordering::Relaxed));
        let node = Node::new(id, kind, priority, compute).with_name(name);
        self.inner.nodes.insert(id, node);
        id
    }

    /// Deliver every payload `from` produces to `to`.
    pub(crate) fn link(&self, from: NodeId, to: NodeId) {
        if let Some(mut node) = self.inner.nodes.get_mut(&from) {
            node.add_subscriber(to);
        }
    }

    pub(crate) fn unlink(&self, from: NodeId, to: NodeId) {
        if let Some(mut node) = self.inner.nodes.get_mut(&from) {
            node.remove_subscriber(to);
        }
    }

    pub(crate) fn remove_node(&self, id: NodeId) {
        self.inner.nodes.remove(&id);
    }

    /// Fail unless `other` is this graph.
    pub(crate) fn ensure_owns(&self, other: &Graph, node: NodeId) -> Result<()> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            Ok(())
        } else {
            Err(Error::ForeignUnit(node))
        }
    }

    /// Whether `goal` can be reached from `start` by walking only through
    /// pass-through nodes. Such a path never filters or deduplicates, so
    /// closing it into a loop would never terminate.
    pub(crate) fn reaches_through_pass_through(&self, start: NodeId, goal: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(id) = queue.pop_front() {
            if id == goal {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.inner.nodes.get(&id) {
                if node.is_pass_through() {
                    queue.extend(node.subscribers().iter().copied());
                }
            }
        }

        false
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    /// Seed invocations and run them to completion.
    ///
    /// If a step is already draining on this thread the seeds join it and
    /// this returns immediately.
    pub(crate) fn launch<I>(&self, seeds: I) -> Result<()>
    where
        I: IntoIterator<Item = (NodeId, Payload)>,
    {
        let resolved = seeds
            .into_iter()
            .map(|(node, payload)| {
                let (priority, coalesce) = self.schedule_info(node).ok_or(Error::UnknownNode(node))?;
                Ok((node, priority, payload, coalesce))
            })
            .collect::<Result<SmallVec<[_; 2]>>>()?;

        let guard = self.inner.step.lock();
        {
            let mut state = guard.borrow_mut();
            for (node, priority, payload, coalesce) in resolved {
                state.queue.push(node, priority, payload, coalesce);
            }
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.started += 1;
        }

        self.run_to_completion(&guard)
    }

    /// Run `f` while holding the step lock, without opening a step.
    ///
    /// Steps on other threads cannot start or be running while `f` runs.
    /// On the thread that is draining a step the lock is re-entered.
    pub(crate) fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.step.lock();
        f()
    }

    /// Run `f` inside a single step.
    ///
    /// Everything `f` fires is queued into the same step, which drains after
    /// `f` returns. Inside an already running step this simply calls `f`.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let guard = self.inner.step.lock();
        let nested = {
            let mut state = guard.borrow_mut();
            let nested = state.running;
            if !nested {
                state.running = true;
                state.started += 1;
            }
            nested
        };

        let value = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(panic) => {
                if !nested {
                    let mut state = guard.borrow_mut();
                    state.running = false;
                    state.queue.clear();
                }
                panic::resume_unwind(panic);
            }
        };

        if !nested {
            self.run_to_completion(&guard)?;
        }
        Ok(value)
    }

    fn run_to_completion(&self, cell: &RefCell<StepState>) -> Result<()> {
        let step = cell.borrow().started;
        let graph = self.inner.config.name.as_str();
        debug!(graph, step, "step started");

        let result = self.drain(cell);

        let mut state = cell.borrow_mut();
        state.running = false;
        match result {
            Ok(executed) => {
                debug!(graph, step, executed, "step finished");
                Ok(())
            }
            Err(err) => {
                let dropped = state.queue.clear();
                error!(graph, step, dropped, error = %err, "step aborted");
                Err(err)
            }
        }
    }

    fn drain(&self, cell: &RefCell<StepState>) -> Result<usize> {
        let limit = self.inner.config.max_invocations_per_step;
        let mut executed = 0;

        loop {
            // The borrow must end before running the node: computations
            // re-enter `launch` and borrow the state again.
            let next = cell.borrow_mut().queue.pop();
            let Some(invocation) = next else {
                return Ok(executed);
            };

            // Watchers can be removed while an invocation is pending.
            let Some((node, compute, subscribers)) = self.snapshot(invocation.node) else {
                continue;
            };

            executed += 1;
            if executed > limit {
                return Err(Error::StepLimit { limit, node });
            }

            trace!(node = %node, priority = %invocation.priority, "execute");

            let output = match compute {
                None => Some(invocation.payload),
                Some(compute) => self.run_compute(&node, &compute, invocation.payload)?,
            };

            if let Some(output) = output {
                let mut state = cell.borrow_mut();
                for subscriber in subscribers {
                    if let Some((priority, coalesce)) = self.schedule_info(subscriber) {
                        state.queue.push(subscriber, priority, Arc::clone(&output), coalesce);
                    }
                }
            }
        }
    }

    fn run_compute(&self, node: &NodeRef, compute: &Compute, payload: Payload) -> Result<Option<Payload>> {
        match panic::catch_unwind(AssertUnwindSafe(|| compute(self, payload))) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(source)) => Err(Error::Handler {
                node: node.clone(),
                source,
            }),
            Err(panic) => Err(Error::Panicked {
                node: node.clone(),
                message: panic_message(&*panic),
            }),
        }
    }

    fn schedule_info(&self, id: NodeId) -> Option<(Priority, bool)> {
        self.inner
            .nodes
            .get(&id)
            .map(|node| (node.priority(), node.kind().coalesces()))
    }

    fn snapshot(&self, id: NodeId) -> Option<(NodeRef, Option<Compute>, SmallVec<[NodeId; 8]>)> {
        let node = self.inner.nodes.get(&id)?;
        Some((
            node.node_ref(),
            node.compute().cloned(),
            node.subscribers().iter().copied().collect(),
        ))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.inner.config.name)
            .field("node_count", &self.node_count())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{downcast, payload};
    use parking_lot::Mutex;

    fn recorder(graph: &Graph, log: &Arc<Mutex<Vec<String>>>, label: &str, priority: Priority) -> NodeId {
        let log = Arc::clone(log);
        let label = label.to_string();
        let compute: Compute = Arc::new(move |_, input| {
            log.lock().push(label.clone());
            Ok(Some(input))
        });
        graph.add_node_at(NodeKind::Projection, priority, None, Some(compute))
    }

    #[test]
    fn drains_by_priority_then_registration_order() {
        let graph = Graph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = graph.add_node(NodeKind::Source, None, None);

        for (label, priority) in [
            ("effect", Priority::Effect),
            ("sampler", Priority::Sampler),
            ("read-a", Priority::Read),
            ("barrier", Priority::Barrier),
            ("pure", Priority::Pure),
            ("read-b", Priority::Read),
        ] {
            let node = recorder(&graph, &log, label, priority);
            graph.link(root, node);
        }

        graph.launch([(root, payload(()))]).unwrap();
        assert_eq!(
            *log.lock(),
            vec!["pure", "read-a", "read-b", "barrier", "sampler", "effect"]
        );
        assert_eq!(graph.steps_started(), 1);
    }

    #[test]
    fn filtered_output_stops_propagation() {
        let graph = Graph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = graph.add_node(NodeKind::Source, None, None);
        let gate: Compute = Arc::new(|_, input| {
            let value = downcast::<i32>(&input)?;
            Ok((value > 0).then_some(input))
        });
        let gate = graph.add_node(NodeKind::Projection, None, Some(gate));
        let sink = recorder(&graph, &log, "sink", Priority::Effect);
        graph.link(root, gate);
        graph.link(gate, sink);

        graph.launch([(root, payload(-1_i32))]).unwrap();
        assert!(log.lock().is_empty());

        graph.launch([(root, payload(1_i32))]).unwrap();
        assert_eq!(*log.lock(), vec!["sink"]);
    }

    #[test]
    fn reentrant_launch_joins_the_running_step() {
        let graph = Graph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = graph.add_node(NodeKind::Source, None, None);
        let late_sink = recorder(&graph, &log, "late", Priority::Pure);
        graph.link(late, late_sink);

        let root = graph.add_node(NodeKind::Source, None, None);
        let trigger_log = Arc::clone(&log);
        let trigger: Compute = Arc::new(move |graph: &Graph, _| {
            graph.launch([(late, payload(()))])?;
            trigger_log.lock().push("trigger".to_string());
            Ok(None)
        });
        let trigger = graph.add_node(NodeKind::Watch, None, Some(trigger));
        let effect = recorder(&graph, &log, "effect", Priority::Effect);
        graph.link(root, trigger);
        graph.link(root, effect);

        graph.launch([(root, payload(()))]).unwrap();

        // "late" was queued into the same step, so it ran before the second
        // effect-priority node even though it was enqueued after it.
        assert_eq!(*log.lock(), vec!["trigger", "late", "effect"]);
        assert_eq!(graph.steps_started(), 1);
    }

    #[test]
    fn handler_error_aborts_remaining_work() {
        let graph = Graph::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let root = graph.add_node(NodeKind::Source, Some("root".into()), None);
        let failing: Compute = Arc::new(|_, _| Err("boom".into()));
        let failing = graph.add_node(NodeKind::Mutator, Some("failing".into()), Some(failing));
        let effect = recorder(&graph, &log, "effect", Priority::Effect);
        graph.link(root, failing);
        graph.link(root, effect);

        let err = graph.launch([(root, payload(()))]).unwrap_err();
        match err {
            Error::Handler { node, source } => {
                assert_eq!(node.id, failing);
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.lock().is_empty());
        assert!(!graph.is_stepping());
    }

    #[test]
    fn panics_are_reported_and_graph_stays_usable() {
        let graph = Graph::new();
        let root = graph.add_node(NodeKind::Source, None, None);
        let panicking: Compute = Arc::new(|_, input| {
            if downcast::<bool>(&input)? {
                panic!("reducer exploded");
            }
            Ok(None)
        });
        let panicking = graph.add_node(NodeKind::Mutator, None, Some(panicking));
        graph.link(root, panicking);

        let err = graph.launch([(root, payload(true))]).unwrap_err();
        assert!(matches!(err, Error::Panicked { ref message, .. } if message == "reducer exploded"));

        assert!(graph.launch([(root, payload(false))]).is_ok());
    }

    #[test]
    fn step_limit_stops_runaway_loops() {
        let config = GraphConfig::default().with_max_invocations_per_step(50);
        let graph = Graph::with_config(config).unwrap();
        let root = graph.add_node(NodeKind::Source, None, None);
        let echo: Compute = Arc::new(|_, input| Ok(Some(input)));
        let echo = graph.add_node(NodeKind::Projection, None, Some(echo));
        graph.link(root, echo);
        graph.link(echo, root);

        let err = graph.launch([(root, payload(()))]).unwrap_err();
        assert!(matches!(err, Error::StepLimit { limit: 50, .. }));
    }

    #[test]
    fn unknown_seed_is_rejected() {
        let graph = Graph::new();
        let err = graph.launch([(NodeId::from(999), payload(()))]).unwrap_err();
        assert!(matches!(err, Error::UnknownNode(_)));
    }

    #[test]
    fn pass_through_reachability() {
        let graph = Graph::new();
        let a = graph.add_node(NodeKind::Source, None, None);
        let relay = graph.add_node(NodeKind::Relay, None, None);
        let b = graph.add_node(NodeKind::Source, None, None);
        let filter: Compute = Arc::new(|_, input| Ok(Some(input)));
        let filter = graph.add_node(NodeKind::Projection, None, Some(filter));
        let c = graph.add_node(NodeKind::Source, None, None);
        graph.link(a, relay);
        graph.link(relay, b);
        graph.link(b, filter);
        graph.link(filter, c);

        assert!(graph.reaches_through_pass_through(a, b));
        assert!(!graph.reaches_through_pass_through(a, c));
    }

    #[test]
    fn graphs_are_isolated() {
        let first = Graph::new();
        let second = Graph::new();
        let node = first.add_node(NodeKind::Source, None, None);

        assert!(first.ensure_owns(&first.clone(), node).is_ok());
        assert!(matches!(second.ensure_owns(&first, node), Err(Error::ForeignUnit(_))));
        assert_eq!(second.node_count(), 0);
    }
}
