pub mod config;
pub mod routes;
pub mod state;

use anyhow::Context;
use detection::{
    DetectionConfig, DetectionService, InferenceEngine, LabelCatalog, OrtBackend,
    initialize_runtime,
};
use std::sync::Arc;

/// Bring up the runtime, label map and graph. Any failure here is fatal.
pub fn build_service(config: &DetectionConfig) -> anyhow::Result<Arc<DetectionService>> {
    initialize_runtime::<OrtBackend>()?;

    let labels = LabelCatalog::load(&config.labels_path)?;
    let engine =
        InferenceEngine::load_graph_file::<OrtBackend>(&config.model_path, &config.backend)
            .with_context(|| format!("loading graph {}", config.model_path))?;

    Ok(Arc::new(DetectionService::new(engine, labels, config)))
}
