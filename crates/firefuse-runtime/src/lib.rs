//! # FireFUSE runtime
//!
//! Ties the camera, vision endpoints and device endpoints together:
//! - [`EntityRegistry`]: endpoints keyed by canonical path
//! - [`BackgroundWorker`] / [`WorkerRunner`]: runs stale stages on one dedicated thread
//! - [`FireFuse`]: the synthetic file table a filesystem adapter calls into

mod error;
mod fs;
mod registry;
mod scheduler;

pub use error::{FsError, RegistryError};
pub use fs::{
    AccessMode, DirEntry, FileAttr, FileHandle, FileType, FireFuse, DIR_MODE, READ_ONLY_MODE,
    READ_WRITE_MODE, SYNC_PREFIX,
};
pub use registry::{Entity, EntityRegistry};
pub use scheduler::{BackgroundWorker, StageMask, WorkerRunner, WorkerSignal};
