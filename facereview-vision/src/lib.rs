pub mod face;
pub mod jitter;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use face::{DetectOptions, Detection, Embedding};
pub use pipeline::{Face, Pipeline, PipelineOptions};
