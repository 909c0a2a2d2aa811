//! Camera and vision endpoints for FireFUSE.
//!
//! A [`CameraNode`] owns the raw and decoded frame caches for one camera. Each
//! [`VisionEndpoint`] runs a JSON-described pipeline against the camera's current frame
//! through a [`PipelineEngine`] and publishes results through its own caches.

mod camera;
mod endpoint;
mod error;
pub mod frame;
pub mod pipeline;
mod source;

pub use camera::CameraNode;
pub use endpoint::VisionEndpoint;
pub use error::{CameraError, PipelineError};
pub use frame::{ColorMode, DecodedFrame};
pub use pipeline::{PipelineEngine, PipelineOutput, StageEngine};
pub use source::{FrameSource, JpegFileSource, StaticFrameSource};
