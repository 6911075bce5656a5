use futures::future::LocalBoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::rc::Rc;
use tracing::debug;

use super::graph::{Event, Graph, Store};
use crate::error::{DashError, DashResult};

type Handler<I, O> = Rc<dyn Fn(I) -> LocalBoxFuture<'static, DashResult<O>>>;

/// An async boundary action wired into the graph.
///
/// Every `run` fires `started`, then exactly one of `done` or `failed`,
/// then `settled`. Invocations are independent; `in_flight` counts the
/// ones that have not settled yet.
pub struct Effect<I, O> {
    label: Rc<str>,
    handler: Handler<I, O>,
    pub started: Event<I>,
    pub done: Event<O>,
    pub failed: Event<DashError>,
    pub settled: Event<()>,
    pub in_flight: Store<usize>,
}

impl<I, O> Clone for Effect<I, O> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            handler: self.handler.clone(),
            started: self.started.clone(),
            done: self.done.clone(),
            failed: self.failed.clone(),
            settled: self.settled.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<I: Clone + 'static, O: Clone + 'static> Effect<I, O> {
    pub fn new<F, Fut>(graph: &Graph, label: &str, handler: F) -> Self
    where
        F: Fn(I) -> Fut + 'static,
        Fut: Future<Output = DashResult<O>> + 'static,
    {
        let started = graph.event(format!("{label}.started"));
        let done = graph.event(format!("{label}.done"));
        let failed = graph.event(format!("{label}.failed"));
        let settled = graph.event(format!("{label}.settled"));
        let in_flight = graph.store(format!("{label}.in_flight"), 0usize);

        graph.on(&in_flight, &started, |n, _| Some(n + 1));
        graph.on(&in_flight, &settled, |n, _| Some(n.saturating_sub(1)));

        Self {
            label: Rc::from(label),
            handler: Rc::new(move |input| handler(input).boxed_local()),
            started,
            done,
            failed,
            settled,
            in_flight,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_pending(&self) -> bool {
        *self.in_flight.get() > 0
    }

    pub async fn run(&self, graph: &Graph, input: I) -> DashResult<O> {
        graph.emit(&self.started, input.clone());

        let result = (self.handler)(input).await;
        match &result {
            Ok(output) => graph.emit(&self.done, output.clone()),
            Err(err) => {
                debug!(effect = %self.label, error_code = err.error_code(), "effect failed: {}", err);
                graph.emit(&self.failed, err.clone());
            }
        }

        graph.emit(&self.settled, ());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_done_fires_on_success() {
        let graph = Graph::new();
        let fx = Effect::new(&graph, "double", |n: u32| async move { Ok(n * 2) });
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            fx.done.watch(move |v: &u32| seen.borrow_mut().push(*v));
        }
        fx.failed.watch(|_| panic!("should not fail"));

        let out = fx.run(&graph, 21).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(*seen.borrow(), vec![42]);
        assert_eq!(*fx.in_flight.get(), 0);
    }

    #[tokio::test]
    async fn test_failed_fires_on_error() {
        let graph = Graph::new();
        let fx: Effect<(), u32> = Effect::new(&graph, "broken", |_| async {
            Err(DashError::EmptyPayload("/metrics/stats".to_string()))
        });
        let codes = Rc::new(RefCell::new(Vec::new()));
        {
            let codes = codes.clone();
            fx.failed
                .watch(move |e: &DashError| codes.borrow_mut().push(e.error_code()));
        }
        fx.done.watch(|_| panic!("should not succeed"));

        assert!(fx.run(&graph, ()).await.is_err());
        assert_eq!(*codes.borrow(), vec!["E3003"]);
    }

    #[tokio::test]
    async fn test_in_flight_counts_concurrent_runs() {
        let graph = Rc::new(Graph::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let rx = Rc::new(RefCell::new(Some(rx)));

        let fx: Effect<u32, u32> = Effect::new(&graph, "slow", move |n| {
            let gate = rx.borrow_mut().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok(n)
            }
        });

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let first = {
                    let (fx, graph) = (fx.clone(), graph.clone());
                    tokio::task::spawn_local(async move { fx.run(&graph, 1).await })
                };
                tokio::task::yield_now().await;
                assert_eq!(*fx.in_flight.get(), 1);
                assert!(fx.is_pending());

                // the second run does not wait for the first
                assert_eq!(fx.run(&graph, 2).await.unwrap(), 2);
                assert_eq!(*fx.in_flight.get(), 1);

                tx.send(()).unwrap();
                assert_eq!(first.await.unwrap().unwrap(), 1);
                assert_eq!(*fx.in_flight.get(), 0);
            })
            .await;
    }
}
