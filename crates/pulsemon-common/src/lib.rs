//! Types shared by the pulsemon agent and server.
//!
//! [`types`] holds the [`Metric`](types::Metric) wire model and its validation
//! rules; [`retry`] holds the bounded retry driver used on both sides of the
//! pipeline.

pub mod retry;
pub mod shutdown;
pub mod types;
