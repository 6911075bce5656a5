//! Derivation combinators.
//!
//! Each combinator creates a node whose rule reads settled inputs and
//! either fires with a new value or stays silent for the turn.

use std::fmt;
use std::rc::Rc;

use super::graph::{Event, Graph, NodeId, Store};

/// Something that can drive a recomputation: an event firing or a store
/// changing.
pub trait Clock: Clone + 'static {
    type Payload: 'static;

    fn node_id(&self) -> NodeId;

    /// The payload, if this clock fired in the running turn.
    fn fired_payload(&self, graph: &Graph) -> Option<Rc<Self::Payload>>;
}

impl<P: 'static> Clock for Event<P> {
    type Payload = P;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn fired_payload(&self, graph: &Graph) -> Option<Rc<P>> {
        self.fired(graph)
    }
}

impl<T: 'static> Clock for Store<T> {
    type Payload = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn fired_payload(&self, graph: &Graph) -> Option<Rc<T>> {
        self.fired(graph)
    }
}

/// One store or a tuple of stores read together as a consistent snapshot.
pub trait Source: Clone + 'static {
    type Value;

    fn node_ids(&self) -> Vec<NodeId>;

    fn current(&self) -> Self::Value;

    /// Whether any member fired in the running turn.
    fn changed(&self, graph: &Graph) -> bool;
}

impl<T: 'static> Source for Store<T> {
    type Value = Rc<T>;

    fn node_ids(&self) -> Vec<NodeId> {
        vec![self.id()]
    }

    fn current(&self) -> Rc<T> {
        self.get()
    }

    fn changed(&self, graph: &Graph) -> bool {
        self.fired(graph).is_some()
    }
}

macro_rules! impl_source_tuple {
    ($($name:ident : $ty:ident),+) => {
        impl<$($ty: 'static),+> Source for ($(Store<$ty>,)+) {
            type Value = ($(Rc<$ty>,)+);

            fn node_ids(&self) -> Vec<NodeId> {
                let ($($name,)+) = self;
                vec![$($name.id()),+]
            }

            fn current(&self) -> Self::Value {
                let ($($name,)+) = self;
                ($($name.get(),)+)
            }

            fn changed(&self, graph: &Graph) -> bool {
                let ($($name,)+) = self;
                false $(|| $name.fired(graph).is_some())+
            }
        }
    };
}

impl_source_tuple!(a: A, b: B);
impl_source_tuple!(a: A, b: B, c: C);
impl_source_tuple!(a: A, b: B, c: C, d: D);

/// Events produced by [`Graph::split`], one per case plus a fallback.
pub struct Split<K, P> {
    cases: Vec<(K, Event<P>)>,
    default: Event<P>,
}

impl<K: PartialEq, P: 'static> Split<K, P> {
    pub fn case(&self, key: &K) -> Option<&Event<P>> {
        self.cases.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    /// Fires for values whose key matches no case.
    pub fn default(&self) -> &Event<P> {
        &self.default
    }
}

impl Graph {
    /// Read-only store recomputed from `source` on every change.
    pub fn map<A, B, F>(&self, source: &Store<A>, label: impl Into<String>, f: F) -> Store<B>
    where
        A: 'static,
        B: 'static,
        F: Fn(&A) -> B + 'static,
    {
        self.map_with(source, label, None, f)
    }

    /// Like [`Graph::map`], but only fires when the result differs from
    /// the previous one.
    pub fn map_distinct<A, B, F>(&self, source: &Store<A>, label: impl Into<String>, f: F) -> Store<B>
    where
        A: 'static,
        B: PartialEq + 'static,
        F: Fn(&A) -> B + 'static,
    {
        self.map_with(source, label, Some(<B as PartialEq>::eq), f)
    }

    /// Republishes `source` only when its value actually changed.
    pub fn distinct<T>(&self, source: &Store<T>, label: impl Into<String>) -> Store<T>
    where
        T: PartialEq + Clone + 'static,
    {
        self.map_distinct(source, label, T::clone)
    }

    fn map_with<A, B, F>(
        &self,
        source: &Store<A>,
        label: impl Into<String>,
        eq: Option<fn(&B, &B) -> bool>,
        f: F,
    ) -> Store<B>
    where
        A: 'static,
        B: 'static,
        F: Fn(&A) -> B + 'static,
    {
        let initial = f(&source.get());
        let store = self.derived_store(label, initial, eq, &[source.id()], &[]);
        let source = source.clone();
        store.add_rule(Box::new(move |graph, _| source.fired(graph).map(|v| f(&v))));
        store
    }

    /// Store recomputed whenever any of `sources` changes. All inputs are
    /// read after every one of them settled for the turn.
    pub fn combine<S, T, F>(&self, sources: S, label: impl Into<String>, f: F) -> Store<T>
    where
        S: Source,
        T: 'static,
        F: Fn(S::Value) -> T + 'static,
    {
        self.combine_with(sources, label, None, f)
    }

    pub fn combine_distinct<S, T, F>(&self, sources: S, label: impl Into<String>, f: F) -> Store<T>
    where
        S: Source,
        T: PartialEq + 'static,
        F: Fn(S::Value) -> T + 'static,
    {
        self.combine_with(sources, label, Some(<T as PartialEq>::eq), f)
    }

    fn combine_with<S, T, F>(
        &self,
        sources: S,
        label: impl Into<String>,
        eq: Option<fn(&T, &T) -> bool>,
        f: F,
    ) -> Store<T>
    where
        S: Source,
        T: 'static,
        F: Fn(S::Value) -> T + 'static,
    {
        let initial = f(sources.current());
        let store = self.derived_store(label, initial, eq, &sources.node_ids(), &[]);
        store.add_rule(Box::new(move |graph, _| {
            sources.changed(graph).then(|| f(sources.current()))
        }));
        store
    }

    /// Event firing on every `clock` with `f(source, payload)`. Changes of
    /// `source` alone do not fire it.
    pub fn sample<S, C, R, F>(&self, source: S, clock: &C, label: impl Into<String>, f: F) -> Event<R>
    where
        S: Source,
        C: Clock,
        R: 'static,
        F: Fn(S::Value, &C::Payload) -> R + 'static,
    {
        let event = self.derived_event(label, &[clock.node_id()], &source.node_ids());
        let clock = clock.clone();
        event.add_rule(Box::new(move |graph| {
            clock
                .fired_payload(graph)
                .map(|p| Rc::new(f(source.current(), &p)))
        }));
        event
    }

    /// On every `clock`, writes `f(source, payload)` into `target`;
    /// `None` leaves it untouched. `target` may be part of `source`.
    pub fn sample_into<S, C, T, F>(&self, source: S, clock: &C, target: &Store<T>, f: F)
    where
        S: Source,
        C: Clock,
        T: 'static,
        F: Fn(S::Value, &C::Payload) -> Option<T> + 'static,
    {
        self.connect(target.id(), &[clock.node_id()], &source.node_ids());
        let clock = clock.clone();
        target.add_rule(Box::new(move |graph, _| {
            clock
                .fired_payload(graph)
                .and_then(|p| f(source.current(), &p))
        }));
    }

    /// Updates `store` from its current value whenever `clock` fires.
    pub fn on<C, T, F>(&self, store: &Store<T>, clock: &C, reducer: F)
    where
        C: Clock,
        T: 'static,
        F: Fn(&T, &C::Payload) -> Option<T> + 'static,
    {
        self.connect(store.id(), &[clock.node_id()], &[]);
        let clock = clock.clone();
        store.add_rule(Box::new(move |graph, current| {
            clock
                .fired_payload(graph)
                .and_then(|p| reducer(current, &p))
        }));
    }

    /// Puts `store` back to the value it holds right now whenever `clock`
    /// fires. Wire this at startup so "now" is the initial value.
    pub fn reset<C, T>(&self, store: &Store<T>, clock: &C)
    where
        C: Clock,
        T: Clone + 'static,
    {
        let initial = store.get();
        self.on(store, clock, move |_, _| Some(T::clone(&initial)));
    }

    /// Fires whenever any of `events` fires, with the payload of the last
    /// one in the list that fired this turn.
    pub fn merge<P: 'static>(&self, events: &[Event<P>], label: impl Into<String>) -> Event<P> {
        let ids: Vec<NodeId> = events.iter().map(|e| e.id()).collect();
        let merged = self.derived_event(label, &ids, &[]);
        let events = events.to_vec();
        merged.add_rule(Box::new(move |graph| {
            events.iter().filter_map(|e| e.fired(graph)).last()
        }));
        merged
    }

    /// Passes `clock`'s payloads through only when `filter` holds.
    pub fn guard<C, F>(&self, clock: &C, label: impl Into<String>, filter: F) -> Event<C::Payload>
    where
        C: Clock,
        F: Fn(&C::Payload) -> bool + 'static,
    {
        let event = self.derived_event(label, &[clock.node_id()], &[]);
        let clock = clock.clone();
        event.add_rule(Box::new(move |graph| {
            clock.fired_payload(graph).filter(|p| filter(p))
        }));
        event
    }

    pub fn map_event<C, R, F>(&self, clock: &C, label: impl Into<String>, f: F) -> Event<R>
    where
        C: Clock,
        R: 'static,
        F: Fn(&C::Payload) -> R + 'static,
    {
        self.filter_map(clock, label, move |p| Some(f(p)))
    }

    pub fn filter_map<C, R, F>(&self, clock: &C, label: impl Into<String>, f: F) -> Event<R>
    where
        C: Clock,
        R: 'static,
        F: Fn(&C::Payload) -> Option<R> + 'static,
    {
        let event = self.derived_event(label, &[clock.node_id()], &[]);
        let clock = clock.clone();
        event.add_rule(Box::new(move |graph| {
            clock
                .fired_payload(graph)
                .and_then(|p| f(&p))
                .map(Rc::new)
        }));
        event
    }

    /// Re-fires `clock`'s payload on `target`.
    pub fn forward<C>(&self, clock: &C, target: &Event<C::Payload>)
    where
        C: Clock,
    {
        self.connect(target.id(), &[clock.node_id()], &[]);
        let clock = clock.clone();
        target.add_rule(Box::new(move |graph| clock.fired_payload(graph)));
    }

    /// Routes every payload to exactly one case, chosen by `matcher`.
    /// Keys matching no case go to [`Split::default`].
    pub fn split<C, K, F>(&self, clock: &C, label: &str, cases: &[K], matcher: F) -> Split<K, C::Payload>
    where
        C: Clock,
        K: PartialEq + Clone + fmt::Debug + 'static,
        F: Fn(&C::Payload) -> K + 'static,
    {
        let matcher = Rc::new(matcher);

        let routed = cases
            .iter()
            .map(|key| {
                let event = self.derived_event(format!("{label}.{key:?}"), &[clock.node_id()], &[]);
                let (clock, matcher, wanted) = (clock.clone(), matcher.clone(), key.clone());
                event.add_rule(Box::new(move |graph| {
                    clock.fired_payload(graph).filter(|p| matcher(p) == wanted)
                }));
                (key.clone(), event)
            })
            .collect::<Vec<_>>();

        let default = self.derived_event(format!("{label}.default"), &[clock.node_id()], &[]);
        {
            let clock = clock.clone();
            let keys: Vec<K> = cases.to_vec();
            default.add_rule(Box::new(move |graph| {
                clock
                    .fired_payload(graph)
                    .filter(|p| !keys.contains(&matcher(p)))
            }));
        }

        Split {
            cases: routed,
            default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &T| sink.borrow_mut().push(v.clone()))
    }

    #[test]
    fn test_map_follows_source() {
        let graph = Graph::new();
        let n = graph.store("n", 2);
        let doubled = graph.map(&n, "doubled", |v| v * 2);
        assert_eq!(*doubled.get(), 4);

        graph.set(&n, 5);
        assert_eq!(*doubled.get(), 10);
    }

    #[test]
    fn test_combine_is_glitch_free() {
        let graph = Graph::new();
        let a = graph.store("a", 1);
        let b = graph.map(&a, "b", |v| v * 10);
        let sum = graph.combine((a.clone(), b.clone()), "sum", |(a, b)| (*a, *b));

        let (seen, sink) = recorder();
        sum.watch(sink);

        graph.set(&a, 2);
        graph.set(&a, 3);
        // one notification per turn, never a half-updated pair
        assert_eq!(*seen.borrow(), vec![(2, 20), (3, 30)]);
    }

    #[test]
    fn test_map_distinct_suppresses_equal_values() {
        let graph = Graph::new();
        let n = graph.store("n", 1);
        let parity = graph.map_distinct(&n, "parity", |v| v % 2);
        let (seen, sink) = recorder();
        parity.watch(sink);

        graph.set(&n, 3);
        graph.set(&n, 4);
        graph.set(&n, 6);
        assert_eq!(*seen.borrow(), vec![0]);
    }

    #[test]
    fn test_sample_reads_without_triggering() {
        let graph = Graph::new();
        let text = graph.store("text", "a".to_string());
        let submit = graph.event::<u32>("submit");
        let sampled = graph.sample(text.clone(), &submit, "sampled", |t, n| format!("{t}{n}"));
        let (seen, sink) = recorder();
        sampled.watch(sink);

        graph.set(&text, "b".to_string());
        assert!(seen.borrow().is_empty());

        graph.emit(&submit, 1);
        assert_eq!(*seen.borrow(), vec!["b1"]);
    }

    #[test]
    fn test_sample_into_target_in_source() {
        let graph = Graph::new();
        let total = graph.store("total", 10);
        let add = graph.event::<i32>("add");
        graph.sample_into(total.clone(), &add, &total, |t, n| Some(*t + n));

        graph.emit(&add, 5);
        graph.emit(&add, 1);
        assert_eq!(*total.get(), 16);
    }

    #[test]
    fn test_on_none_leaves_store_untouched() {
        let graph = Graph::new();
        let level = graph.store("level", 1u8);
        let bump = graph.event::<u8>("bump");
        graph.on(&level, &bump, |cur, by| cur.checked_add(*by));
        let (seen, sink) = recorder();
        level.watch(sink);

        graph.emit(&bump, 1);
        graph.emit(&bump, 255);
        assert_eq!(*level.get(), 2);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn test_reset() {
        let graph = Graph::new();
        let name = graph.store("name", "init".to_string());
        let clear = graph.event::<()>("clear");
        graph.reset(&name, &clear);

        graph.set(&name, "changed".to_string());
        graph.emit(&clear, ());
        assert_eq!(*name.get(), "init");
    }

    #[test]
    fn test_merge_fires_once_per_turn() {
        let graph = Graph::new();
        let a = graph.event::<u32>("a");
        let b = graph.event::<u32>("b");
        let merged = graph.merge(&[a.clone(), b.clone()], "merged");
        let (seen, sink) = recorder();
        merged.watch(sink);

        graph.emit(&a, 1);
        graph.emit(&b, 2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_merge_of_events_firing_in_same_turn() {
        let graph = Graph::new();
        let root = graph.event::<u32>("root");
        let plus = graph.map_event(&root, "plus", |v| v + 1);
        let times = graph.map_event(&root, "times", |v| v * 10);
        let merged = graph.merge(&[plus, times], "merged");
        let (seen, sink) = recorder();
        merged.watch(sink);

        graph.emit(&root, 2);
        assert_eq!(*seen.borrow(), vec![20]);
    }

    #[test]
    fn test_guard_drops_silently() {
        let graph = Graph::new();
        let n = graph.event::<i32>("n");
        let positive = graph.guard(&n, "positive", |v| *v > 0);
        let count = graph.store("count", 0);
        graph.on(&count, &positive, |c, _| Some(c + 1));

        graph.emit(&n, -1);
        graph.emit(&n, 3);
        graph.emit(&n, 0);
        assert_eq!(*count.get(), 1);
    }

    #[test]
    fn test_guard_on_store_changes() {
        let graph = Graph::new();
        let n = graph.store("n", 0);
        let big = graph.guard(&n, "big", |v| *v > 10);
        let (seen, sink) = recorder();
        big.watch(sink);

        graph.set(&n, 5);
        graph.set(&n, 50);
        assert_eq!(*seen.borrow(), vec![50]);
    }

    #[test]
    fn test_filter_map() {
        let graph = Graph::new();
        let raw = graph.event::<String>("raw");
        let parsed = graph.filter_map(&raw, "parsed", |s| s.parse::<i32>().ok());
        let (seen, sink) = recorder();
        parsed.watch(sink);

        graph.emit(&raw, "12".to_string());
        graph.emit(&raw, "x".to_string());
        assert_eq!(*seen.borrow(), vec![12]);
    }

    #[test]
    fn test_split_routes_to_exactly_one_case() {
        #[derive(Debug, Clone, PartialEq)]
        enum Kind {
            Small,
            Large,
            Huge,
        }

        let graph = Graph::new();
        let n = graph.event::<u32>("n");
        let split = graph.split(&n, "size", &[Kind::Small, Kind::Large], |v| match v {
            0..=9 => Kind::Small,
            10..=99 => Kind::Large,
            _ => Kind::Huge,
        });

        let (small, small_sink) = recorder();
        let (large, large_sink) = recorder();
        let (other, other_sink) = recorder();
        split.case(&Kind::Small).unwrap().watch(small_sink);
        split.case(&Kind::Large).unwrap().watch(large_sink);
        split.default().watch(other_sink);
        assert!(split.case(&Kind::Huge).is_none());

        for v in [1, 50, 500, 7] {
            graph.emit(&n, v);
        }
        assert_eq!(*small.borrow(), vec![1, 7]);
        assert_eq!(*large.borrow(), vec![50]);
        assert_eq!(*other.borrow(), vec![500]);
    }

    #[test]
    fn test_forward() {
        let graph = Graph::new();
        let a = graph.event::<u32>("a");
        let b = graph.event::<u32>("b");
        graph.forward(&a, &b);
        let (seen, sink) = recorder();
        b.watch(sink);

        graph.emit(&a, 4);
        assert_eq!(*seen.borrow(), vec![4]);
    }

    #[test]
    fn test_diamond_over_many_levels_settles_once() {
        let graph = Graph::new();
        let root = graph.store("root", 1);
        let left = graph.map(&root, "left", |v| v + 1);
        let deep = graph.map(&left, "deep", |v| v * 2);
        let deeper = graph.map(&deep, "deeper", |v| v - 1);
        let both = graph.combine((root.clone(), deeper), "both", |(r, d)| *r + *d);
        let (seen, sink) = recorder();
        both.watch(sink);

        graph.set(&root, 2);
        // (2 + 1) * 2 - 1 = 5, plus root
        assert_eq!(*seen.borrow(), vec![7]);
    }
}
