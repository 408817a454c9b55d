use super::{
    BackendOptions, DETECTION_BOXES, DETECTION_CLASSES, DETECTION_SCORES, ExecutionProvider,
    IMAGE_TENSOR, InferenceBackend, RawOutputs,
};
use crate::tensor::InputTensor;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};

pub struct OrtBackend {
    session: Session,
}

impl InferenceBackend for OrtBackend {
    fn initialize_runtime() -> anyhow::Result<()> {
        let _ = ort::init().with_name("object-detection").commit();
        tracing::info!("ONNX Runtime environment initialized");
        Ok(())
    }

    fn load_graph(graph: &[u8], options: &BackendOptions) -> anyhow::Result<Self> {
        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(options.intra_threads)?;

        let builder = match options.provider {
            #[cfg(feature = "cuda")]
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?
            }
            #[cfg(not(feature = "cuda"))]
            ExecutionProvider::Cuda => {
                anyhow::bail!("built without the `cuda` feature, use EXECUTION_PROVIDER=cpu");
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
                builder
            }
        };

        let session = builder.commit_from_memory(graph)?;

        tracing::info!(graph_bytes = graph.len(), "Graph loaded");
        Ok(Self { session })
    }

    fn run(&mut self, input: &InputTensor) -> anyhow::Result<RawOutputs> {
        let image = input.view().into_dyn();
        let outputs = self.session.run(ort::inputs![
            IMAGE_TENSOR => TensorRef::from_array_view(image)?
        ])?;

        let fetch = |name: &str| -> anyhow::Result<ndarray::ArrayD<f32>> {
            let value = outputs
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("graph did not produce `{}`", name))?;
            Ok(value.try_extract_array::<f32>()?.into_owned())
        };

        let scores = fetch(DETECTION_SCORES)?;
        let classes = fetch(DETECTION_CLASSES)?;
        let boxes = fetch(DETECTION_BOXES)?;

        Ok(RawOutputs {
            scores,
            classes,
            boxes,
        })
    }
}
