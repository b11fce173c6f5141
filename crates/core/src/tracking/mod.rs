//! Carrier tracking: the watch-set, webhook normalization, and the periodic
//! sweep that re-subscribes shipments still in transit.

mod handler;
mod service;
mod sweeper;
mod types;

pub use handler::TrackingUpdateHandler;
pub use service::TrackingService;
pub use sweeper::TrackingSweeper;
pub use types::{map_carrier_status, SweepReport, TrackingStatus, TrackingUpdate};
