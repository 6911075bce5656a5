//! A small push-based reactive engine: stores, events, effects and the
//! combinators that derive one from another.

pub mod combinators;
pub mod effect;
pub mod graph;

pub use combinators::{Clock, Source, Split};
pub use effect::Effect;
pub use graph::{Event, Graph, NodeId, Store};
