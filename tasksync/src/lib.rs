//! `tasksync`: offline-first task manager client library.
//!
//! Tasks live in a local SQLite store; every change is appended to a durable
//! mutation queue that the [`sync::SyncEngine`] later reconciles with a
//! remote server through a [`transport::BatchTransport`].

pub mod config;
pub mod store;
pub mod sync;
pub mod transport;
