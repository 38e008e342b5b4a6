//! `tasksync` server library.
//!
//! Exposes the sync server for use in tests and embedding. The server
//! receives mutation batches from clients, applies them to an in-memory task
//! table, and answers each item with a success, conflict or error verdict.

pub mod config;
pub mod server;
pub mod store;
