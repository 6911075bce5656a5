//! Dependency graph of stores and events with rank-ordered propagation.
//!
//! Every node has a rank, its topological height. One external write
//! starts a turn: the written node fires, its dependents are evaluated in
//! ascending rank order, and each node is evaluated at most once. Because a
//! node always ranks above everything it triggers on or reads from, it only
//! ever observes settled inputs. Watchers run after the turn settled, and
//! writes they make are queued and applied as later turns before the
//! outermost write returns.
//!
//! The graph is single-threaded (`!Send`); async work lives on a tokio
//! `LocalSet` next to it.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

pub type NodeId = usize;

/// Type-erased view of a store or event used by the scheduler.
pub(crate) trait Node {
    fn label(&self) -> &str;

    /// Recomputes the node for the current turn. Returns true if it fired.
    fn evaluate(&self, graph: &Graph) -> bool;

    /// Runs watchers once the turn has settled.
    fn notify(&self);

    /// Drops per-turn state such as event payloads.
    fn finish_turn(&self) {}
}

struct Entry {
    node: Rc<dyn Node>,
    rank: usize,
    /// Nodes re-evaluated when this one fires
    dependents: Vec<NodeId>,
    /// Nodes that read this one without being triggered by it
    readers: Vec<NodeId>,
}

type Write = Box<dyn FnOnce(&Graph) -> NodeId>;

pub struct Graph {
    entries: RefCell<Vec<Entry>>,
    turn: Cell<u64>,
    running: Cell<bool>,
    pending: RefCell<VecDeque<Write>>,
}

struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
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
            .field("nodes", &self.entries.borrow().len())
            .field("turn", &self.turn.get())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
            turn: Cell::new(0),
            running: Cell::new(false),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    pub fn node_count(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn rank(&self, id: NodeId) -> Option<usize> {
        self.entries.borrow().get(id).map(|e| e.rank)
    }

    /// Number of turns run so far.
    pub fn turns(&self) -> u64 {
        self.turn.get()
    }

    pub(crate) fn current_turn(&self) -> u64 {
        self.turn.get()
    }

    /// Registers a node built from its id. Its rank sits one above the
    /// highest of `triggers` and `reads`.
    pub(crate) fn add_node<N, F>(&self, triggers: &[NodeId], reads: &[NodeId], build: F) -> Rc<N>
    where
        N: Node + 'static,
        F: FnOnce(NodeId) -> N,
    {
        let mut entries = self.entries.borrow_mut();
        let id = entries.len();
        let rank = required_rank(&entries, triggers.iter().chain(reads));
        let node = Rc::new(build(id));

        entries.push(Entry {
            node: node.clone(),
            rank,
            dependents: Vec::new(),
            readers: Vec::new(),
        });
        link(&mut entries, id, triggers, reads);

        node
    }

    /// Adds edges into an existing node, raising its rank and the ranks of
    /// everything downstream when needed.
    ///
    /// # Panics
    ///
    /// Panics if the new edges close a cycle. Graphs are wired once at
    /// startup, so this is a wiring bug rather than a runtime condition.
    pub(crate) fn connect(&self, target: NodeId, triggers: &[NodeId], reads: &[NodeId]) {
        let mut entries = self.entries.borrow_mut();
        let reads: Vec<NodeId> = reads.iter().copied().filter(|&r| r != target).collect();

        if triggers.contains(&target) {
            panic!(
                "node '{}' cannot trigger itself",
                entries[target].node.label()
            );
        }

        link(&mut entries, target, triggers, &reads);
        let rank = required_rank(&entries, triggers.iter().chain(&reads));
        let mut path = Vec::new();
        raise_rank(&mut entries, target, rank, &mut path);
    }

    /// Queues a write and, unless a turn is already running, drains the
    /// queue.
    pub(crate) fn write(&self, op: Write) {
        self.pending.borrow_mut().push_back(op);
        if self.running.get() {
            return;
        }

        self.running.set(true);
        let _guard = RunningGuard(&self.running);
        loop {
            let next = self.pending.borrow_mut().pop_front();
            match next {
                Some(op) => self.run_turn(op),
                None => break,
            }
        }
    }

    fn run_turn(&self, op: Write) {
        let turn = self.turn.get() + 1;
        self.turn.set(turn);

        let root = op(self);
        let mut fired = vec![root];
        let mut heap = BinaryHeap::new();
        let mut scheduled = HashSet::new();
        self.schedule_dependents(root, &mut heap, &mut scheduled);

        while let Some(Reverse((rank, id))) = heap.pop() {
            let node = self.entries.borrow()[id].node.clone();
            if node.evaluate(self) {
                trace!(node = node.label(), rank, "node fired");
                fired.push(id);
                self.schedule_dependents(id, &mut heap, &mut scheduled);
            }
        }

        let nodes: Vec<Rc<dyn Node>> = {
            let entries = self.entries.borrow();
            fired.iter().map(|&id| entries[id].node.clone()).collect()
        };
        debug!(
            turn,
            root = nodes.first().map(|n| n.label()).unwrap_or_default(),
            fired = nodes.len(),
            "turn settled"
        );

        for node in &nodes {
            node.notify();
        }
        for node in &nodes {
            node.finish_turn();
        }
    }

    fn schedule_dependents(
        &self,
        id: NodeId,
        heap: &mut BinaryHeap<Reverse<(usize, NodeId)>>,
        scheduled: &mut HashSet<NodeId>,
    ) {
        let entries = self.entries.borrow();
        for &dep in &entries[id].dependents {
            if scheduled.insert(dep) {
                heap.push(Reverse((entries[dep].rank, dep)));
            }
        }
    }

    /// Creates a writable store.
    pub fn store<T: 'static>(&self, label: impl Into<String>, initial: T) -> Store<T> {
        self.derived_store(label, initial, None, &[], &[])
    }

    /// Replaces a store's value. Always fires, even for an equal value.
    pub fn set<T: 'static>(&self, store: &Store<T>, value: T) {
        let cell = store.cell.clone();
        self.write(Box::new(move |graph: &Graph| {
            *cell.value.borrow_mut() = Rc::new(value);
            cell.fired_turn.set(graph.current_turn());
            cell.id
        }));
    }

    pub fn event<P: 'static>(&self, label: impl Into<String>) -> Event<P> {
        self.derived_event(label, &[], &[])
    }

    /// Fires an event. Subscribers have run by the time this returns,
    /// unless it was called from inside a watcher, in which case it runs
    /// right after the current turn.
    pub fn emit<P: 'static>(&self, event: &Event<P>, payload: P) {
        let cell = event.cell.clone();
        self.write(Box::new(move |graph: &Graph| {
            *cell.payload.borrow_mut() = Some(Rc::new(payload));
            cell.fired_turn.set(graph.current_turn());
            cell.id
        }));
    }

    pub(crate) fn derived_store<T: 'static>(
        &self,
        label: impl Into<String>,
        initial: T,
        eq: Option<fn(&T, &T) -> bool>,
        triggers: &[NodeId],
        reads: &[NodeId],
    ) -> Store<T> {
        let label = label.into();
        let cell = self.add_node(triggers, reads, |id| StoreCell {
            id,
            label,
            value: RefCell::new(Rc::new(initial)),
            fired_turn: Cell::new(0),
            rules: RefCell::new(Vec::new()),
            eq,
            watchers: RefCell::new(Vec::new()),
        });
        Store { cell }
    }

    pub(crate) fn derived_event<P: 'static>(
        &self,
        label: impl Into<String>,
        triggers: &[NodeId],
        reads: &[NodeId],
    ) -> Event<P> {
        let label = label.into();
        let cell = self.add_node(triggers, reads, |id| EventCell {
            id,
            label,
            payload: RefCell::new(None),
            fired_turn: Cell::new(0),
            rules: RefCell::new(Vec::new()),
            watchers: RefCell::new(Vec::new()),
        });
        Event { cell }
    }
}

fn required_rank<'a>(entries: &[Entry], deps: impl Iterator<Item = &'a NodeId>) -> usize {
    deps.map(|&d| entries[d].rank + 1).max().unwrap_or(0)
}

fn link(entries: &mut [Entry], id: NodeId, triggers: &[NodeId], reads: &[NodeId]) {
    for &t in triggers {
        if !entries[t].dependents.contains(&id) {
            entries[t].dependents.push(id);
        }
    }
    for &r in reads {
        if r != id && !entries[r].readers.contains(&id) {
            entries[r].readers.push(id);
        }
    }
}

fn raise_rank(entries: &mut [Entry], id: NodeId, rank: usize, path: &mut Vec<NodeId>) {
    if entries[id].rank >= rank {
        return;
    }
    if path.contains(&id) {
        panic!("cycle in reactive graph through '{}'", entries[id].node.label());
    }

    entries[id].rank = rank;
    path.push(id);
    let downstream: Vec<NodeId> = entries[id]
        .dependents
        .iter()
        .chain(&entries[id].readers)
        .copied()
        .collect();
    for next in downstream {
        raise_rank(entries, next, rank + 1, path);
    }
    path.pop();
}

// ============================================================================
// Stores
// ============================================================================

/// A rule recomputing a store from the graph and its current value.
/// `None` leaves the store untouched.
pub(crate) type StoreRule<T> = Box<dyn Fn(&Graph, &T) -> Option<T>>;

pub(crate) struct StoreCell<T> {
    id: NodeId,
    label: String,
    value: RefCell<Rc<T>>,
    fired_turn: Cell<u64>,
    rules: RefCell<Vec<StoreRule<T>>>,
    eq: Option<fn(&T, &T) -> bool>,
    watchers: RefCell<Vec<Rc<dyn Fn(&T)>>>,
}

impl<T: 'static> Node for StoreCell<T> {
    fn label(&self) -> &str {
        &self.label
    }

    fn evaluate(&self, graph: &Graph) -> bool {
        let previous = self.value.borrow().clone();
        let mut current = previous.clone();
        let mut changed = false;

        for rule in self.rules.borrow().iter() {
            if let Some(next) = rule(graph, &current) {
                current = Rc::new(next);
                changed = true;
            }
        }

        if !changed {
            return false;
        }
        if let Some(eq) = self.eq {
            if eq(&previous, &current) {
                return false;
            }
        }

        *self.value.borrow_mut() = current;
        self.fired_turn.set(graph.current_turn());
        true
    }

    fn notify(&self) {
        let watchers = self.watchers.borrow().clone();
        if watchers.is_empty() {
            return;
        }
        let value = self.value.borrow().clone();
        for watcher in watchers {
            watcher(&value);
        }
    }
}

/// Handle to a stateful node. Cloning the handle shares the node.
pub struct Store<T> {
    cell: Rc<StoreCell<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Store({}#{})", self.cell.label, self.cell.id)
    }
}

impl<T: 'static> Store<T> {
    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    pub fn label(&self) -> &str {
        &self.cell.label
    }

    pub fn get(&self) -> Rc<T> {
        self.cell.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.value.borrow())
    }

    /// Calls `f` with the new value after every turn in which the store
    /// changed.
    pub fn watch(&self, f: impl Fn(&T) + 'static) {
        self.cell.watchers.borrow_mut().push(Rc::new(f));
    }

    /// The value, if the store fired in the running turn.
    pub(crate) fn fired(&self, graph: &Graph) -> Option<Rc<T>> {
        (self.cell.fired_turn.get() == graph.current_turn()).then(|| self.get())
    }

    pub(crate) fn add_rule(&self, rule: StoreRule<T>) {
        self.cell.rules.borrow_mut().push(rule);
    }
}

// ============================================================================
// Events
// ============================================================================

/// A rule deciding whether a derived event fires, and with what payload.
pub(crate) type EventRule<P> = Box<dyn Fn(&Graph) -> Option<Rc<P>>>;

pub(crate) struct EventCell<P> {
    id: NodeId,
    label: String,
    payload: RefCell<Option<Rc<P>>>,
    fired_turn: Cell<u64>,
    rules: RefCell<Vec<EventRule<P>>>,
    watchers: RefCell<Vec<Rc<dyn Fn(&P)>>>,
}

impl<P: 'static> Node for EventCell<P> {
    fn label(&self) -> &str {
        &self.label
    }

    fn evaluate(&self, graph: &Graph) -> bool {
        let mut payload = None;
        for rule in self.rules.borrow().iter() {
            if let Some(p) = rule(graph) {
                payload = Some(p);
            }
        }

        match payload {
            Some(p) => {
                *self.payload.borrow_mut() = Some(p);
                self.fired_turn.set(graph.current_turn());
                true
            }
            None => false,
        }
    }

    fn notify(&self) {
        let watchers = self.watchers.borrow().clone();
        let payload = self.payload.borrow().clone();
        if let Some(payload) = payload {
            for watcher in watchers {
                watcher(&payload);
            }
        }
    }

    fn finish_turn(&self) {
        self.payload.borrow_mut().take();
    }
}

/// Handle to a discrete signal. Payloads only live for the turn they were
/// emitted in.
pub struct Event<P> {
    cell: Rc<EventCell<P>>,
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<P> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({}#{})", self.cell.label, self.cell.id)
    }
}

impl<P: 'static> Event<P> {
    pub fn id(&self) -> NodeId {
        self.cell.id
    }

    pub fn label(&self) -> &str {
        &self.cell.label
    }

    /// Calls `f` with every payload, in subscription order, after the turn
    /// that fired the event settled.
    pub fn watch(&self, f: impl Fn(&P) + 'static) {
        self.cell.watchers.borrow_mut().push(Rc::new(f));
    }

    pub(crate) fn fired(&self, graph: &Graph) -> Option<Rc<P>> {
        if self.cell.fired_turn.get() != graph.current_turn() {
            return None;
        }
        self.cell.payload.borrow().clone()
    }

    pub(crate) fn add_rule(&self, rule: EventRule<P>) {
        self.cell.rules.borrow_mut().push(rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let graph = Graph::new();
        let count = graph.store("count", 1);
        assert_eq!(*count.get(), 1);

        graph.set(&count, 5);
        assert_eq!(*count.get(), 5);
        assert_eq!(graph.turns(), 1);
    }

    #[test]
    fn test_store_watch_runs_after_change() {
        let graph = Graph::new();
        let name = graph.store("name", String::new());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        name.watch(move |v: &String| sink.borrow_mut().push(v.clone()));

        graph.set(&name, "a".to_string());
        graph.set(&name, "b".to_string());
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_event_watchers_in_subscription_order() {
        let graph = Graph::new();
        let ping = graph.event::<u32>("ping");
        let order = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            ping.watch(move |p: &u32| order.borrow_mut().push(format!("{tag}:{p}")));
        }

        graph.emit(&ping, 7);
        assert_eq!(*order.borrow(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn test_event_payload_dropped_after_turn() {
        let graph = Graph::new();
        let ping = graph.event::<u32>("ping");
        graph.emit(&ping, 1);
        assert!(ping.fired(&graph).is_none());
    }

    #[test]
    fn test_reentrant_emit_is_queued_in_order() {
        let graph = Rc::new(Graph::new());
        let outer = graph.event::<()>("outer");
        let inner = graph.event::<u32>("inner");
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let graph_ref = Rc::downgrade(&graph);
            let inner = inner.clone();
            let log = log.clone();
            outer.watch(move |_| {
                log.borrow_mut().push("outer".to_string());
                if let Some(g) = graph_ref.upgrade() {
                    g.emit(&inner, 1);
                    g.emit(&inner, 2);
                }
                log.borrow_mut().push("outer done".to_string());
            });
        }
        {
            let log = log.clone();
            inner.watch(move |p: &u32| log.borrow_mut().push(format!("inner {p}")));
        }

        graph.emit(&outer, ());
        assert_eq!(
            *log.borrow(),
            vec!["outer", "outer done", "inner 1", "inner 2"]
        );
        assert_eq!(graph.turns(), 3);
    }

    #[test]
    fn test_rank_above_dependencies() {
        let graph = Graph::new();
        let a = graph.store("a", 0);
        let b = graph.derived_store("b", 0, None, &[a.id()], &[]);
        let c = graph.derived_store("c", 0, None, &[b.id()], &[a.id()]);

        assert_eq!(graph.rank(a.id()), Some(0));
        assert_eq!(graph.rank(b.id()), Some(1));
        assert_eq!(graph.rank(c.id()), Some(2));
    }

    #[test]
    fn test_connect_raises_downstream_ranks() {
        let graph = Graph::new();
        let a = graph.store("a", 0);
        let b = graph.store("b", 0);
        let c = graph.derived_store("c", 0, None, &[b.id()], &[]);
        let d = graph.derived_store("d", 0, None, &[a.id()], &[]);
        let e = graph.derived_store("e", 0, None, &[d.id()], &[]);

        // b now depends on e, which sits at rank 2
        graph.connect(b.id(), &[e.id()], &[]);
        assert_eq!(graph.rank(b.id()), Some(3));
        assert_eq!(graph.rank(c.id()), Some(4));
    }

    #[test]
    #[should_panic(expected = "cycle")]
    fn test_connect_detects_cycles() {
        let graph = Graph::new();
        let a = graph.store("a", 0);
        let b = graph.derived_store("b", 0, None, &[a.id()], &[]);
        graph.connect(a.id(), &[b.id()], &[]);
    }

    #[test]
    fn test_connect_ignores_self_reads() {
        let graph = Graph::new();
        let ev = graph.event::<()>("ev");
        let s = graph.store("s", 0);
        graph.connect(s.id(), &[ev.id()], &[s.id()]);
        assert_eq!(graph.rank(s.id()), Some(1));
    }
}
