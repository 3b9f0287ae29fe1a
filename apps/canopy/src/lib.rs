//! # canopy
//!
//! The Canopy server binary as a library: HTTP API, CLI and configuration.
//!
//! Split out of `main.rs` so integration tests can build the router
//! against an in-memory store.

pub mod api;
pub mod cli;
pub mod config;
