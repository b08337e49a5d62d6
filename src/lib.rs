pub mod alarms;
pub mod annotate;
pub mod config;
pub mod keys;
pub mod known_faces;
pub mod matcher;
pub mod review;
pub mod save;
pub mod viewer;

// Re-export vision types for convenience
pub use facereview_vision::{face, pipeline, Detection, Embedding, Face, Pipeline};
