use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("corrupt image: {0}")]
    CorruptImage(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TensorError {
    #[error("decoded image has no pixels")]
    EmptyImage,

    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid image url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported url scheme `{0}`, expected http or https")]
    UnsupportedScheme(String),

    #[error("download failed: {0}")]
    Request(String),

    #[error("download failed with HTTP status {0}")]
    Status(u16),

    #[error("download read error: {0}")]
    Io(#[from] io::Error),

    #[error("download did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("downloaded image is empty")]
    Empty,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("graph rejected the input: {0}")]
    Rejected(String),

    #[error("graph did not produce output `{0}`")]
    MissingOutput(&'static str),

    #[error("output `{name}` has shape {shape:?}, expected {expected}")]
    OutputShape {
        name: &'static str,
        shape: Vec<usize>,
        expected: &'static str,
    },

    #[error("inference engine lock poisoned by an earlier panic")]
    Poisoned,

    #[error("inference did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("inference task failed: {0}")]
    TaskFailed(String),
}

#[derive(Error, Debug)]
pub enum GraphLoadError {
    #[error("inference runtime must be initialized before loading a graph")]
    RuntimeNotInitialized,

    #[error("inference runtime error: {0}")]
    Runtime(String),

    #[error("failed to read graph from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum LabelError {
    #[error("failed to read label map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("label map line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("label map contains no items")]
    Empty,

    #[error("label map defines id {0} more than once")]
    DuplicateId(u32),
}

#[derive(Error, Debug, PartialEq)]
pub enum PostprocessError {
    #[error("class id {class_id} has no entry in the label catalog")]
    UnknownLabel { class_id: f32 },

    #[error("inference output lengths disagree: {scores} scores, {classes} classes, {boxes} boxes")]
    LengthMismatch {
        scores: usize,
        classes: usize,
        boxes: usize,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("threshold {0} is outside 0..=100")]
pub struct ThresholdError(pub u32);

/// Any failure of a single detection request.
#[derive(Error, Debug)]
pub enum DetectError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Postprocess(#[from] PostprocessError),
}
