//! Admin HTTP surface and process wiring for the pipeline orchestrator.

pub mod api;
pub mod metrics;
pub mod state;
