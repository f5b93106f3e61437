//! pulsemon agent: samples runtime statistics and reports them to the
//! collector server in batches.

pub mod config;
pub mod sender;
pub mod service;
