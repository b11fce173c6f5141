//! Typed domain events.
//!
//! Services emit through a cloneable [`EventHandle`]; an [`EventDispatcher`]
//! drains the channel and hands every envelope to its named handlers.

mod dispatcher;
mod handle;
mod sqlite;
mod store;
mod types;

pub use dispatcher::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use types::*;
