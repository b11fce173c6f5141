pub mod dashboard;
pub mod error;
pub mod events;
pub mod fulfillments;
pub mod handlers;
pub mod middleware;
pub mod pipelines;
pub mod queues;
pub mod returns;
pub mod routes;
pub mod webhooks;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
