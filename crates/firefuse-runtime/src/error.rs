use firefuse_structures::BufferError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Path does not address an endpoint: {0}")]
    InvalidPath(String),
    #[error("Endpoint not configured: {0}")]
    NotFound(String),
}

/// Failures surfaced to the filesystem adapter as error codes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FsError {
    #[error("No such file: {0}")]
    NotFound(String),
    #[error("Access denied: {0}")]
    AccessDenied(String),
    #[error("Busy: {0}")]
    WouldBlock(String),
    #[error("Write of {requested} bytes exceeds capacity {capacity}")]
    Oversized { requested: usize, capacity: usize },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    pub const ENOENT: i32 = 2;
    pub const EAGAIN: i32 = 11;
    pub const EACCES: i32 = 13;
    pub const EINVAL: i32 = 22;

    /// POSIX error number for the adapter to return.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => Self::ENOENT,
            FsError::AccessDenied(_) => Self::EACCES,
            FsError::WouldBlock(_) | FsError::Oversized { .. } => Self::EAGAIN,
            FsError::InvalidArgument(_) => Self::EINVAL,
        }
    }
}

impl From<RegistryError> for FsError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidPath(path) | RegistryError::NotFound(path) => {
                FsError::NotFound(path)
            }
        }
    }
}

impl From<BufferError> for FsError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Oversized {
                requested,
                capacity,
            } => FsError::Oversized {
                requested,
                capacity,
            },
            BufferError::BadLength { length, capacity } => FsError::InvalidArgument(format!(
                "length {} exceeds capacity {}",
                length, capacity
            )),
        }
    }
}
