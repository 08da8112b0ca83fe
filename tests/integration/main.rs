//! Mesh integration test harness.
//!
//! Every test builds a small mesh of in-process nodes on a shared
//! `MemoryNetwork`, optionally with a shared `MemoryRegistry` for
//! discovery, and drives it through `NodeHandle`s only:
//!
//!   cargo test --test integration
//!
//! Nodes are plain tokio tasks, so each test owns its whole mesh and
//! nothing leaks between tests.

mod infra;

mod connections;
mod discovery;
mod lifecycle;
mod messaging;

pub use infra::*;
