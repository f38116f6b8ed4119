//! promptgate API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes, the
//! scheduling engine) so integration tests and the binary entrypoint share
//! the exact same wiring.

pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod keepalive;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod state;
