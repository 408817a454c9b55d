pub mod backend;
pub mod cache;
pub mod config;
pub mod decode;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod labels;
pub mod postprocessing;
pub mod service;
pub mod stream;
pub mod tensor;

// Re-export commonly used types for convenience
pub use backend::{BackendOptions, ExecutionProvider, InferenceBackend, RawOutputs};
#[cfg(feature = "ort-backend")]
pub use backend::ort::OrtBackend;
pub use config::DetectionConfig;
pub use engine::{InferenceEngine, InferenceOutput, initialize_runtime};
pub use error::DetectError;
pub use labels::LabelCatalog;
pub use postprocessing::{DetectionResult, Threshold};
pub use service::{DetectionBatch, DetectionService};
pub use stream::{ResultStream, Subscription};
