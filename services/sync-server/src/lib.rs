//! semsync sync server library.
//!
//! This crate primarily ships a `sync-server` binary, but we expose a small
//! library surface to enable integration testing.

pub mod api;
pub mod cluster;
pub mod config;
pub mod state;
