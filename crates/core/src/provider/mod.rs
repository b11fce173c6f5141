//! Print-on-demand manufacturing providers.

mod config;
mod gelato;
mod http;
mod printful;
mod registry;
mod signature;
mod types;

pub use config::*;
pub use gelato::*;
pub use printful::*;
pub use registry::*;
pub use signature::*;
pub use types::*;
