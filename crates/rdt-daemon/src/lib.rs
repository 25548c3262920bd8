//! rdt-daemon library target.
//!
//! Exposes the router and shared state for integration tests; the binary
//! `main.rs` depends on this library target.

pub mod routes;
pub mod state;
