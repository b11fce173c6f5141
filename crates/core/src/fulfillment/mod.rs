//! The physical-shipment record and the service that keeps it in step with
//! the manufacturing provider.

mod service;
mod sqlite_store;
mod store;
mod types;

pub use service::*;
pub use sqlite_store::*;
pub use store::*;
pub use types::*;
