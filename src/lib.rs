//! Braid - conversation memory graph for LLM chat sessions.
//!
//! Chat sessions and messages are nodes in one graph store; session
//! membership, fork lineage and semantic links are typed directed edges.
//! Streamed message fragments land as `partial` nodes and a background
//! worker consolidates each finished role-run into a single immutable
//! `history` node. The resolver walks fork chains to materialize the
//! exact message list a language model should see.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;
