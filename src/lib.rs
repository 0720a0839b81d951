pub mod backend;
pub mod budget;
pub mod config;
pub mod dialect;
pub mod emitter;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod protocol;
pub mod stream;

pub(crate) mod json_scan;
mod util;

pub use backend::{ChatBackend, LlamaServerBackend, ScriptedBackend};
pub use pipeline::{sse_response, Pipeline, ResponseStream};
