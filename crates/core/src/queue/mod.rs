//! Durable named job queues.
//!
//! This layer knows nothing about pipelines: it only provides queue
//! primitives (visibility timeout, bounded retries with exponential
//! backoff, dead-lettering, pause/resume) over opaque JSON payloads.

mod config;
mod manager;
mod sqlite_queue;
mod traits;
mod types;

pub use config::*;
pub use manager::*;
pub use sqlite_queue::*;
pub use traits::*;
pub use types::*;
