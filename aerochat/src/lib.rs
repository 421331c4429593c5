//! `AeroChat` — real-time messaging client engine.

pub mod api;
pub mod config;
pub mod engine;
pub mod notify;
pub mod push;
pub mod reconcile;
pub mod send;
pub mod session;
pub mod store;
