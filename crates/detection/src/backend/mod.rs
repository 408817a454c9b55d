use crate::tensor::InputTensor;
use ndarray::ArrayD;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Feed tensor name of the frozen detection graph.
pub const IMAGE_TENSOR: &str = "image_tensor";
/// Fetch tensor names, in the order they are fetched.
pub const DETECTION_SCORES: &str = "detection_scores";
pub const DETECTION_CLASSES: &str = "detection_classes";
pub const DETECTION_BOXES: &str = "detection_boxes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl std::str::FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown execution provider `{other}`")),
        }
    }
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda => f.write_str("cuda"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            provider: ExecutionProvider::Cpu,
            intra_threads: 4,
        }
    }
}

/// Untyped fetch results as returned by a backend. Shapes are checked by the engine.
pub struct RawOutputs {
    pub scores: ArrayD<f32>,  // [1, N]
    pub classes: ArrayD<f32>, // [1, N]
    pub boxes: ArrayD<f32>,   // [1, N, 4] as (y1, x1, y2, x2), normalized 0-1
}

pub trait InferenceBackend: Send {
    /// One-time process-wide runtime setup, run before any graph is loaded.
    fn initialize_runtime() -> anyhow::Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }

    /// Build a session from a serialized graph.
    fn load_graph(graph: &[u8], options: &BackendOptions) -> anyhow::Result<Self>
    where
        Self: Sized;

    /// Feed `image_tensor` and fetch scores, classes and boxes.
    fn run(&mut self, input: &InputTensor) -> anyhow::Result<RawOutputs>;
}
