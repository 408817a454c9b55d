use crate::backend::{
    BackendOptions, DETECTION_BOXES, DETECTION_CLASSES, DETECTION_SCORES, InferenceBackend,
    RawOutputs,
};
use crate::error::{GraphLoadError, InferenceError};
use crate::tensor::InputTensor;
use common::span;
use ndarray::{ArrayD, Axis};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

static RUNTIME: OnceLock<Result<(), String>> = OnceLock::new();

/// Run the backend's one-time runtime setup. Later calls return the first outcome.
pub fn initialize_runtime<B: InferenceBackend>() -> Result<(), GraphLoadError> {
    RUNTIME
        .get_or_init(|| B::initialize_runtime().map_err(|e| format!("{e:#}")))
        .clone()
        .map_err(GraphLoadError::Runtime)
}

fn runtime_ready() -> bool {
    matches!(RUNTIME.get(), Some(Ok(())))
}

/// Typed view of one inference call. All three sequences have `max_objects` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub scores: Vec<f32>,
    pub classes: Vec<f32>,
    pub boxes: Vec<[f32; 4]>,
}

impl InferenceOutput {
    pub fn max_objects(&self) -> usize {
        self.scores.len()
    }
}

/// Owns the loaded graph for the lifetime of the service.
///
/// Sessions need exclusive access to run, so calls are serialized behind a
/// single mutex.
pub struct InferenceEngine {
    backend: Mutex<Box<dyn InferenceBackend>>,
}

impl InferenceEngine {
    pub fn load_graph<B>(graph: &[u8], options: &BackendOptions) -> Result<Self, GraphLoadError>
    where
        B: InferenceBackend + 'static,
    {
        if !runtime_ready() {
            return Err(GraphLoadError::RuntimeNotInitialized);
        }

        let backend =
            B::load_graph(graph, options).map_err(|e| GraphLoadError::Runtime(format!("{e:#}")))?;
        Ok(Self::from_backend(backend))
    }

    pub fn load_graph_file<B>(
        path: impl AsRef<Path>,
        options: &BackendOptions,
    ) -> Result<Self, GraphLoadError>
    where
        B: InferenceBackend + 'static,
    {
        let path = path.as_ref();
        let graph = std::fs::read(path).map_err(|source| GraphLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_graph::<B>(&graph, options)
    }

    /// Wrap an already constructed backend.
    pub fn from_backend<B: InferenceBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Mutex::new(Box::new(backend)),
        }
    }

    pub fn infer(&self, tensor: &InputTensor) -> Result<InferenceOutput, InferenceError> {
        let raw = {
            let _s = span!("model_inference", height = tensor.height(), width = tensor.width());
            let mut backend = self.backend.lock().map_err(|_| InferenceError::Poisoned)?;
            backend
                .run(tensor)
                .map_err(|e| InferenceError::Rejected(format!("{e:#}")))?
        };

        validate(raw)
    }
}

/// Check shapes right after the call so a bad graph fails here, not in post-processing.
fn validate(raw: RawOutputs) -> Result<InferenceOutput, InferenceError> {
    let RawOutputs {
        scores,
        classes,
        boxes,
    } = raw;

    let max_objects = match scores.shape() {
        [1, n] => *n,
        other => {
            return Err(InferenceError::OutputShape {
                name: DETECTION_SCORES,
                shape: other.to_vec(),
                expected: "[1, N]",
            });
        }
    };

    if classes.shape() != [1, max_objects] {
        return Err(InferenceError::OutputShape {
            name: DETECTION_CLASSES,
            shape: classes.shape().to_vec(),
            expected: "[1, N] matching detection_scores",
        });
    }

    if boxes.shape() != [1, max_objects, 4] {
        return Err(InferenceError::OutputShape {
            name: DETECTION_BOXES,
            shape: boxes.shape().to_vec(),
            expected: "[1, N, 4] matching detection_scores",
        });
    }

    Ok(InferenceOutput {
        scores: flatten(scores),
        classes: flatten(classes),
        boxes: boxes
            .index_axis(Axis(0), 0)
            .outer_iter()
            .map(|row| [row[0], row[1], row[2], row[3]])
            .collect(),
    })
}

fn flatten(array: ArrayD<f32>) -> Vec<f32> {
    array.iter().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedImage, ImageKind};
    use crate::tensor;
    use ndarray::IxDyn;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        scores: Vec<usize>,
        boxes: Vec<usize>,
        calls: Arc<AtomicUsize>,
    }

    impl InferenceBackend for FixedBackend {
        fn load_graph(_graph: &[u8], _options: &BackendOptions) -> anyhow::Result<Self> {
            Ok(Self {
                scores: vec![1, 3],
                boxes: vec![1, 3, 4],
                calls: Arc::new(AtomicUsize::new(0)),
            })
        }

        fn run(&mut self, input: &InputTensor) -> anyhow::Result<RawOutputs> {
            anyhow::ensure!(input.shape()[3] == 3, "expected 3 channels");
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n: usize = self.scores.iter().product();
            let b: usize = self.boxes.iter().product();
            Ok(RawOutputs {
                scores: ArrayD::from_shape_vec(IxDyn(&self.scores), vec![0.5; n])?,
                classes: ArrayD::from_shape_vec(IxDyn(&self.scores), vec![1.0; n])?,
                boxes: ArrayD::from_shape_vec(IxDyn(&self.boxes), (0..b).map(|v| v as f32).collect())?,
            })
        }
    }

    fn tensor() -> InputTensor {
        tensor::build(DecodedImage {
            width: 2,
            height: 2,
            kind: ImageKind::Png,
            pixels: vec![0; 12],
        })
        .unwrap()
    }

    #[test]
    fn test_outputs_are_decoded_per_object() {
        let calls = Arc::new(AtomicUsize::new(0));
        let engine = InferenceEngine::from_backend(FixedBackend {
            scores: vec![1, 3],
            boxes: vec![1, 3, 4],
            calls: calls.clone(),
        });

        let out = engine.infer(&tensor()).unwrap();
        assert_eq!(out.max_objects(), 3);
        assert_eq!(out.classes, vec![1.0; 3]);
        assert_eq!(out.boxes[1], [4.0, 5.0, 6.0, 7.0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_objects_read_from_score_shape() {
        let engine = InferenceEngine::from_backend(FixedBackend {
            scores: vec![1, 100],
            boxes: vec![1, 100, 4],
            calls: Arc::new(AtomicUsize::new(0)),
        });
        assert_eq!(engine.infer(&tensor()).unwrap().max_objects(), 100);
    }

    #[test]
    fn test_box_shape_mismatch_fails_fast() {
        let engine = InferenceEngine::from_backend(FixedBackend {
            scores: vec![1, 3],
            boxes: vec![1, 2, 4],
            calls: Arc::new(AtomicUsize::new(0)),
        });

        match engine.infer(&tensor()) {
            Err(InferenceError::OutputShape { name, shape, .. }) => {
                assert_eq!(name, DETECTION_BOXES);
                assert_eq!(shape, vec![1, 2, 4]);
            }
            other => panic!("expected OutputShape, got {other:?}"),
        }
    }

    #[test]
    fn test_batched_scores_rejected() {
        let engine = InferenceEngine::from_backend(FixedBackend {
            scores: vec![2, 3],
            boxes: vec![2, 3, 4],
            calls: Arc::new(AtomicUsize::new(0)),
        });
        assert!(matches!(
            engine.infer(&tensor()),
            Err(InferenceError::OutputShape {
                name: DETECTION_SCORES,
                ..
            })
        ));
    }

    /// Backend that records how many runs overlap.
    struct OverlapBackend {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl InferenceBackend for OverlapBackend {
        fn load_graph(_graph: &[u8], _options: &BackendOptions) -> anyhow::Result<Self> {
            anyhow::bail!("constructed directly")
        }

        fn run(&mut self, _input: &InputTensor) -> anyhow::Result<RawOutputs> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            Ok(RawOutputs {
                scores: ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![0.5; 3])?,
                classes: ArrayD::from_shape_vec(IxDyn(&[1, 3]), vec![1.0; 3])?,
                boxes: ArrayD::from_shape_vec(IxDyn(&[1, 3, 4]), vec![0.0; 12])?,
            })
        }
    }

    #[test]
    fn test_concurrent_calls_are_serialized() {
        let peak = Arc::new(AtomicUsize::new(0));
        let engine = Arc::new(InferenceEngine::from_backend(OverlapBackend {
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    (0..4)
                        .map(|_| engine.infer(&tensor()).map(|o| o.max_objects()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            for outcome in handle.join().unwrap() {
                assert_eq!(outcome.unwrap(), 3);
            }
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1, "backend runs overlapped");
    }
}
