use crate::error::CameraError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Camera collaborator. `capture` may block until a frame is available and returns JPEG
/// bytes.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Vec<u8>, CameraError>;
}

/// Serves the current contents of a JPEG file as every frame.
pub struct JpegFileSource {
    path: PathBuf,
}

impl JpegFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for JpegFileSource {
    fn capture(&self) -> Result<Vec<u8>, CameraError> {
        let bytes = std::fs::read(&self.path).map_err(|source| CameraError::Read {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "[CAMERA] Captured {} bytes from {}",
            bytes.len(),
            self.path.display()
        );
        Ok(bytes)
    }
}

/// Serves fixed bytes as every frame.
#[derive(Debug, Clone)]
pub struct StaticFrameSource {
    frame: Vec<u8>,
}

impl StaticFrameSource {
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame }
    }
}

impl FrameSource for StaticFrameSource {
    fn capture(&self) -> Result<Vec<u8>, CameraError> {
        if self.frame.is_empty() {
            return Err(CameraError::NoFrame);
        }
        Ok(self.frame.clone())
    }
}
