use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Failed to open serial device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stty failed for {path}: {reason}")]
    Stty { path: PathBuf, reason: String },
    #[error("Device {0} is not open")]
    NotOpen(String),
    #[error("Device {0} already has a reader thread")]
    AlreadyAttached(String),
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}
