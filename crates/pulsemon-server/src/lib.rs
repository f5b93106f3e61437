//! pulsemon collector server: HTTP ingestion and lookup over a pluggable
//! [`pulsemon_storage::Storage`] backend.

pub mod api;
pub mod app;
pub mod backend;
pub mod config;
pub mod logging;
pub mod persistence;
pub mod state;
