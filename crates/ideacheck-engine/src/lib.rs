pub mod api;
pub mod client;
pub mod config;
pub mod decode;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod prompt;
pub mod schema;

pub use api::handle_refine_body;
pub use client::{GenerationService, OpenAiResponsesClient};
pub use config::RefineConfig;
pub use error::RefineError;
pub use pipeline::{Reconciler, RefineOutcome};
