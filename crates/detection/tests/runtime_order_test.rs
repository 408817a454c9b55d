//! Runs in its own binary: runtime initialization is process-wide, so nothing
//! else here may initialize it first.

use detection::backend::{BackendOptions, InferenceBackend, RawOutputs};
use detection::error::GraphLoadError;
use detection::tensor::InputTensor;
use detection::{InferenceEngine, initialize_runtime};
use ndarray::{ArrayD, IxDyn};

struct EmptyBackend;

impl InferenceBackend for EmptyBackend {
    fn load_graph(_graph: &[u8], _options: &BackendOptions) -> anyhow::Result<Self> {
        Ok(Self)
    }

    fn run(&mut self, _input: &InputTensor) -> anyhow::Result<RawOutputs> {
        Ok(RawOutputs {
            scores: ArrayD::from_shape_vec(IxDyn(&[1, 0]), Vec::new())?,
            classes: ArrayD::from_shape_vec(IxDyn(&[1, 0]), Vec::new())?,
            boxes: ArrayD::from_shape_vec(IxDyn(&[1, 0, 4]), Vec::new())?,
        })
    }
}

/// Test graph loading against runtime initialization order
///
/// Tests:
/// - Loading before initialization is refused
/// - Loading succeeds once the runtime is up
/// - Initialization is idempotent
#[test]
fn test_graph_load_requires_initialized_runtime() {
    let options = BackendOptions::default();

    let early = InferenceEngine::load_graph::<EmptyBackend>(b"graph", &options);
    assert!(matches!(early, Err(GraphLoadError::RuntimeNotInitialized)));

    initialize_runtime::<EmptyBackend>().unwrap();
    initialize_runtime::<EmptyBackend>().unwrap();

    assert!(InferenceEngine::load_graph::<EmptyBackend>(b"graph", &options).is_ok());
}
