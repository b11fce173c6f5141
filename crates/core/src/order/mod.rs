//! Payment-confirmed order snapshots consumed by the pipeline.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::*;
pub use store::*;
pub use types::*;
