//! Pipeline records: the stage state machine and its persistence.

mod sqlite_store;
mod store;
mod transitions;
mod types;

pub use sqlite_store::*;
pub use store::*;
pub use transitions::*;
pub use types::*;
