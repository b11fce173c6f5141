//! Post-delivery returns and refunds.

mod service;
mod sqlite_store;
mod store;
mod types;

pub use service::ReturnService;
pub use sqlite_store::SqliteReturnStore;
pub use store::ReturnStore;
pub use types::*;
