//! Observability: structured logging and metrics exposition.

pub mod logging;
pub mod metrics;
