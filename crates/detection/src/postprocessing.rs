use crate::engine::InferenceOutput;
use crate::error::{PostprocessError, ThresholdError};
use crate::labels::LabelCatalog;
use common::span;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Minimum confidence on a 0..=100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Threshold(u8);

impl Threshold {
    pub const MAX: u32 = 100;

    pub fn new(percent: u32) -> Result<Self, ThresholdError> {
        if percent > Self::MAX {
            return Err(ThresholdError(percent));
        }
        Ok(Self(percent as u8))
    }

    /// Values above 100 saturate to 100.
    pub const fn saturating(percent: u8) -> Self {
        if percent > 100 { Self(100) } else { Self(percent) }
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    /// The score a detection must reach to be kept.
    pub fn min_score(self) -> f32 {
        self.0 as f32 / 100.0
    }
}

impl TryFrom<u32> for Threshold {
    type Error = ThresholdError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl std::str::FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s.parse().map_err(|e| format!("invalid threshold `{s}`: {e}"))?;
        Self::new(value).map_err(|e| e.to_string())
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One kept detection.
///
/// Coordinates are normalized to 0..1 with `x` horizontal and `y` vertical:
/// `(x1, y1)` is the top-left corner and `(x2, y2)` the bottom-right. The graph
/// emits boxes as `(y1, x1, y2, x2)`; the reordering happens here and nowhere
/// else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub label: String,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

pub struct PostProcessor {
    labels: Arc<LabelCatalog>,
}

impl PostProcessor {
    pub fn new(labels: Arc<LabelCatalog>) -> Self {
        Self { labels }
    }

    /// Keep every candidate with `score >= threshold / 100`, in model order.
    ///
    /// An empty result is a normal outcome. A kept class without a label is a
    /// configuration error and fails the whole call.
    pub fn process(
        &self,
        output: &InferenceOutput,
        threshold: Threshold,
    ) -> Result<Vec<DetectionResult>, PostprocessError> {
        let _s = span!("postprocess", threshold = threshold.percent());

        let InferenceOutput {
            scores,
            classes,
            boxes,
        } = output;

        if classes.len() != scores.len() || boxes.len() != scores.len() {
            return Err(PostprocessError::LengthMismatch {
                scores: scores.len(),
                classes: classes.len(),
                boxes: boxes.len(),
            });
        }

        let min_score = threshold.min_score();
        let mut results = Vec::new();

        for i in 0..scores.len() {
            let score = scores[i];
            if score < min_score || score.is_nan() {
                continue;
            }

            let label = self.label_for(classes[i])?;
            let [y1, x1, y2, x2] = boxes[i];

            results.push(DetectionResult {
                label: label.to_string(),
                score,
                x1,
                y1,
                x2,
                y2,
            });
        }

        tracing::debug!(
            candidates = scores.len(),
            kept = results.len(),
            min_score,
            "Filtered detections"
        );

        Ok(results)
    }

    fn label_for(&self, class: f32) -> Result<&str, PostprocessError> {
        let unknown = || PostprocessError::UnknownLabel { class_id: class };

        // Classes arrive as floats holding whole numbers.
        if !class.is_finite() || class < 0.0 || class > u32::MAX as f32 {
            return Err(unknown());
        }

        self.labels.get(class as u32).ok_or_else(unknown)
    }
}
