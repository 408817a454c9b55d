use crate::backend::{BackendOptions, ExecutionProvider};
use crate::postprocessing::Threshold;
use common::{env_opt, env_or, env_parse};
use std::time::Duration;

pub use common::Environment;

pub const DEFAULT_THRESHOLD: Threshold = Threshold::saturating(75);
const DEFAULT_MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub environment: Environment,
    pub model_path: String,
    pub labels_path: String,
    pub default_threshold: Threshold,
    pub fetch_timeout: Duration,
    pub max_image_bytes: u64,
    pub inference_timeout: Duration,
    pub image_data_pending_ttl: Duration,
    pub image_data_ttl: Duration,
    pub image_data_capacity: usize,
    pub stream_capacity: usize,
    pub backend: BackendOptions,
}

impl DetectionConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let default_threshold = match env_opt("DEFAULT_THRESHOLD") {
            Some(raw) => raw
                .trim()
                .parse::<Threshold>()
                .map_err(|e| anyhow::anyhow!("DEFAULT_THRESHOLD: {e}"))?,
            None => DEFAULT_THRESHOLD,
        };

        Ok(Self {
            environment: Environment::from_env(),
            model_path: env_or("MODEL_PATH", "models/frozen_inference_graph.onnx"),
            labels_path: env_or("LABELS_PATH", "labels/mscoco_label_map.pbtxt"),
            default_threshold,
            fetch_timeout: Duration::from_millis(env_parse("FETCH_TIMEOUT_MS", 5000)),
            max_image_bytes: env_parse("MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES),
            inference_timeout: Duration::from_millis(env_parse("INFERENCE_TIMEOUT_MS", 30_000)),
            image_data_pending_ttl: Duration::from_secs(env_parse("IMAGE_DATA_PENDING_TTL_SECS", 300)),
            image_data_ttl: Duration::from_secs(env_parse("IMAGE_DATA_TTL_SECS", 60)),
            image_data_capacity: env_parse("IMAGE_DATA_CAPACITY", 64),
            stream_capacity: env_parse("STREAM_CAPACITY", 16),
            backend: BackendOptions {
                provider: env_parse("EXECUTION_PROVIDER", ExecutionProvider::Cpu),
                intra_threads: env_parse("INTRA_THREADS", 4),
            },
        })
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            model_path: "models/frozen_inference_graph.onnx".to_string(),
            labels_path: "labels/mscoco_label_map.pbtxt".to_string(),
            default_threshold: DEFAULT_THRESHOLD,
            fetch_timeout: Duration::from_secs(5),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            inference_timeout: Duration::from_secs(30),
            image_data_pending_ttl: Duration::from_secs(300),
            image_data_ttl: Duration::from_secs(60),
            image_data_capacity: 64,
            stream_capacity: 16,
            backend: BackendOptions::default(),
        }
    }
}
