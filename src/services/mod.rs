//! Services module
//!
//! The relay pipeline and its supporting stages

pub mod classify;
pub mod pipeline;
pub mod validation;

pub use classify::{classify_upstream, BufferedResponse};
pub use pipeline::{RelayOptions, RelayPipeline, RelayedResponse};
