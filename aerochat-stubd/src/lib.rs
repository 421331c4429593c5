//! In-memory stub of the AeroChat messaging backend.
//!
//! Serves the REST routes and WebSocket push endpoint the client engine
//! talks to, backed by a single in-memory state table. Useful for
//! integration tests and local development without the real platform.

pub mod config;
pub mod server;
pub mod state;
