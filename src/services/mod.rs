//! Service layer for Braid.
//!
//! Services wrap the db layer with domain rules: the graph accessor
//! (sessions, messages, edges with ownership), the session resolver
//! (fork-chain history materialization), the consolidation engine and
//! its background worker.

mod consolidator;
mod graph;
mod resolver;
mod worker;

pub use consolidator::*;
pub use graph::*;
pub use resolver::*;
pub use worker::*;
