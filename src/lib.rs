//! # FireFUSE
//!
//! A machine-vision pick-and-place rig exposed as a synthetic filesystem. Clients drive the
//! rig with ordinary file reads and writes:
//!
//! - write a JPEG to `/cv/1/camera.jpg` (or let the configured source capture one)
//! - write a pipeline to `/cv/1/gray/cve/<name>/firesight.json`
//! - read `/sync/cv/1/gray/cve/<name>/process.fire` to run it and get the JSON result
//! - write gcode to `/cnc/<device>/gcode.fire` and read it back for the device reply
//!
//! A filesystem adapter holds one [`runtime::FireFuse`] and forwards its callbacks to it.
//!
//! ```rust,no_run
//! use firefuse::prelude::*;
//!
//! let config = load_config(None, None).unwrap_or_default();
//! let fs = FireFuse::from_config(config);
//! fs.start_worker().unwrap();
//!
//! let handle = fs.open("/sync/cv/1/monitor.jpg", AccessMode::Read).unwrap();
//! let jpeg = fs.read(&handle, 0, handle.len()).unwrap();
//! fs.release(handle).unwrap();
//! # let _ = jpeg;
//! ```

pub use firefuse_config as config;
pub use firefuse_io as io;
pub use firefuse_observability as observability;
pub use firefuse_runtime as runtime;
pub use firefuse_structures as structures;
pub use firefuse_vision as vision;

/// Prelude - commonly used types and traits
pub mod prelude {
    pub use crate::config::{load_config, validate_config, FireFuseConfig};
    pub use crate::io::DeviceEndpoint;
    pub use crate::runtime::{AccessMode, FileAttr, FileType, FireFuse, FsError, StageMask};
    pub use crate::structures::{FreshnessCache, OwnedBuffer};
    pub use crate::vision::{CameraNode, PipelineEngine, StageEngine, VisionEndpoint};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_facade_imports() {
        use crate::prelude::*;
        let buffer = OwnedBuffer::from("ok");
        assert_eq!(buffer.length(), 2);
        assert_eq!(FsError::NotFound(String::new()).errno(), FsError::ENOENT);
    }
}
