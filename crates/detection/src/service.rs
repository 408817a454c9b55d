use crate::cache::ImageDataCache;
use crate::config::DetectionConfig;
use crate::decode::{self, ImageKind};
use crate::engine::InferenceEngine;
use crate::error::{DetectError, FetchError, InferenceError};
use crate::fetch::ImageFetcher;
use crate::labels::LabelCatalog;
use crate::postprocessing::{DetectionResult, PostProcessor, Threshold};
use crate::stream::{ResultStream, Subscription};
use crate::tensor;
use common::span;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const FETCH_GRACE: Duration = Duration::from_millis(500);

/// Outcome of one detection request. Either `error` is set, or the other
/// fields describe a successful run (possibly with no results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBatch {
    pub results: Vec<DetectionResult>,
    pub media_type: Option<String>,
    pub width: u32,
    pub height: u32,
    pub data_ref: Option<String>,
    pub error: Option<String>,
}

impl DetectionBatch {
    pub fn success(
        results: Vec<DetectionResult>,
        kind: ImageKind,
        width: u32,
        height: u32,
        data_ref: Option<String>,
    ) -> Self {
        Self {
            results,
            media_type: Some(kind.media_type().to_string()),
            width,
            height,
            data_ref,
            error: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            results: Vec::new(),
            media_type: None,
            width: 0,
            height: 0,
            data_ref: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

struct Metrics {
    duration: Histogram<f64>,
    requests: Counter<u64>,
    failures: Counter<u64>,
    objects: Counter<u64>,
}

impl Metrics {
    fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        let latency_buckets = [
            0.01, 0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 0.75, 1.0, 2.0, 5.0,
        ];
        Self {
            duration: meter
                .f64_histogram("detection_duration_seconds")
                .with_description("Time to run one image through decode, inference and postprocess")
                .with_unit("s")
                .with_boundaries(latency_buckets.to_vec())
                .build(),
            requests: meter
                .u64_counter("detection_requests_total")
                .with_description("Total detection requests")
                .build(),
            failures: meter
                .u64_counter("detection_failures_total")
                .with_description("Detection requests that produced an error batch")
                .build(),
            objects: meter
                .u64_counter("detection_objects_total")
                .with_description("Total detections returned")
                .build(),
        }
    }
}

/// Sets the shared flag when dropped while still armed, which tells the
/// blocking run that nobody is waiting for its result anymore.
struct AbandonGuard {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonGuard {
    fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

pub struct DetectionService {
    engine: InferenceEngine,
    labels: Arc<LabelCatalog>,
    postprocessor: PostProcessor,
    cache: ImageDataCache,
    stream: ResultStream,
    fetcher: ImageFetcher,
    default_threshold: Threshold,
    inference_timeout: Duration,
    metrics: Metrics,
}

impl DetectionService {
    pub fn new(engine: InferenceEngine, labels: LabelCatalog, config: &DetectionConfig) -> Self {
        let labels = Arc::new(labels);
        Self {
            engine,
            postprocessor: PostProcessor::new(labels.clone()),
            labels,
            cache: ImageDataCache::new(
                config.image_data_pending_ttl,
                config.image_data_ttl,
                config.image_data_capacity,
            ),
            stream: ResultStream::new(config.stream_capacity),
            fetcher: ImageFetcher::new(config.fetch_timeout, config.max_image_bytes),
            default_threshold: config.default_threshold,
            inference_timeout: config.inference_timeout,
            metrics: Metrics::new("detection"),
        }
    }

    /// Run the whole pipeline on the calling thread.
    pub fn detect(&self, raw: &[u8], threshold: Threshold) -> DetectionBatch {
        self.detect_inner(raw, threshold, &AtomicBool::new(false))
    }

    /// Run the pipeline on the blocking pool, bounded by the inference timeout.
    ///
    /// If the deadline passes or the returned future is dropped, the run still
    /// finishes in the background but does not cache or publish its result.
    pub async fn detect_bytes(self: &Arc<Self>, raw: Vec<u8>, threshold: Threshold) -> DetectionBatch {
        let abandoned = Arc::new(AtomicBool::new(false));
        let guard = AbandonGuard::new(abandoned.clone());

        let service = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            service.detect_inner(&raw, threshold, &abandoned)
        });

        let batch = match tokio::time::timeout(self.inference_timeout, task).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Detection task failed");
                self.metrics.failures.add(1, &[]);
                DetectionBatch::failure(InferenceError::TaskFailed(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.inference_timeout, "Detection timed out");
                self.metrics.failures.add(1, &[]);
                // Guard drops armed and flags the run as abandoned.
                return DetectionBatch::failure(InferenceError::TimedOut(self.inference_timeout));
            }
        };

        guard.disarm();
        batch
    }

    /// Download an image and detect with the default threshold.
    pub async fn detect_url(self: &Arc<Self>, url: String) -> DetectionBatch {
        let fetcher = self.fetcher.clone();
        let limit = fetcher.timeout() + FETCH_GRACE;
        let target = url.clone();
        let task = tokio::task::spawn_blocking(move || fetcher.fetch(&target));

        // The fetcher enforces its own deadline; this only backstops a stuck task.
        let downloaded = match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => Ok(Err(FetchError::TimedOut(limit))),
        };

        let raw = match downloaded {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(url = %url, error = %e, "Image download failed");
                self.metrics.requests.add(1, &[]);
                self.metrics.failures.add(1, &[]);
                return DetectionBatch::failure(DetectError::from(e));
            }
            Err(e) => {
                tracing::error!(url = %url, error = %e, "Download task failed");
                self.metrics.requests.add(1, &[]);
                self.metrics.failures.add(1, &[]);
                return DetectionBatch::failure(InferenceError::TaskFailed(e.to_string()));
            }
        };

        self.detect_bytes(raw, self.default_threshold).await
    }

    /// Base64 payload for a reference handed out in `dataRef`.
    pub fn image_data(&self, reference: &str) -> Option<String> {
        self.cache.take(reference)
    }

    pub fn label_names(&self) -> Vec<String> {
        self.labels.names().map(str::to_string).collect()
    }

    pub fn subscribe(&self) -> Subscription {
        self.stream.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.stream.subscriber_count()
    }

    pub fn default_threshold(&self) -> Threshold {
        self.default_threshold
    }

    fn detect_inner(&self, raw: &[u8], threshold: Threshold, abandoned: &AtomicBool) -> DetectionBatch {
        let _s = span!("detect", bytes = raw.len(), threshold = threshold.percent());
        let start = Instant::now();
        self.metrics.requests.add(1, &[]);

        let (results, kind, width, height) = match self.run_pipeline(raw, threshold) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Detection failed");
                self.metrics.failures.add(1, &[]);
                return DetectionBatch::failure(e);
            }
        };

        self.metrics
            .duration
            .record(start.elapsed().as_secs_f64(), &[]);
        self.metrics.objects.add(results.len() as u64, &[]);

        if abandoned.load(Ordering::SeqCst) {
            tracing::debug!("Caller went away, skipping cache and publish");
            return DetectionBatch::success(results, kind, width, height, None);
        }

        let data_ref = self.cache.store(raw);
        let batch = DetectionBatch::success(results, kind, width, height, Some(data_ref));
        self.stream.publish(batch.clone());

        tracing::info!(
            detections = batch.results.len(),
            width,
            height,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Detection complete"
        );

        batch
    }

    fn run_pipeline(
        &self,
        raw: &[u8],
        threshold: Threshold,
    ) -> Result<(Vec<DetectionResult>, ImageKind, u32, u32), DetectError> {
        let image = decode::decode(raw)?;
        let (kind, width, height) = (image.kind, image.width, image.height);

        let input = tensor::build(image)?;
        let output = self.engine.infer(&input)?;
        let results = self.postprocessor.process(&output, threshold)?;

        Ok((results, kind, width, height))
    }
}
