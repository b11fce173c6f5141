//! Print-file rendering for line items.
//!
//! `HttpRenderer` calls the external render service; `PassthroughRenderer`
//! uses the design file attached to the line item as-is.

mod http;
mod passthrough;
mod traits;

pub use http::HttpRenderer;
pub use passthrough::PassthroughRenderer;
pub use traits::{RenderError, RenderedFile, Renderer};
