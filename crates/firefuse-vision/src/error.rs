use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Failed to read frame from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No frame available")]
    NoFrame,
    #[error("Failed to decode frame: {0}")]
    Decode(String),
    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

impl From<image::ImageError> for CameraError {
    fn from(err: image::ImageError) -> Self {
        CameraError::Decode(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("Invalid pipeline: {0}")]
    InvalidSpec(String),
    #[error("Unknown operator '{op}' in stage {stage}")]
    UnknownOperator { stage: String, op: String },
    #[error("Stage {stage} ({op}): missing or invalid argument '{arg}'")]
    BadArgument {
        stage: String,
        op: String,
        arg: String,
    },
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },
}
