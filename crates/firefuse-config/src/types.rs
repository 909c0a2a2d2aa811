//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in `firefuse.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FireFuseConfig {
    pub system: SystemConfig,
    pub camera: CameraConfig,
    pub worker: WorkerConfig,
    pub files: FilesConfig,
    pub vision: Vec<VisionEndpointConfig>,
    pub devices: Vec<DeviceConfig>,
}

/// System-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub debug: bool,
    pub log_level: String,
    pub log_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

/// Where camera frames come from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraSource {
    /// Frames only arrive through client writes to camera.jpg
    None,
    /// A JPEG file served as every captured frame
    JpegFile(PathBuf),
}

impl Default for CameraSource {
    fn default() -> Self {
        CameraSource::None
    }
}

/// Camera node configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    /// Capacity of the buffers that client writes to camera.jpg land in
    pub max_frame_bytes: usize,
    pub source: CameraSource,
    /// How long a pipeline-annotated frame is preferred over the live frame in monitor.jpg
    pub monitor_duration_secs: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 400,
            height: 400,
            max_frame_bytes: 1024 * 1024,
            source: CameraSource::None,
            monitor_duration_secs: 3.0,
        }
    }
}

/// Background worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds without work before the idle action runs
    pub idle_period_secs: f64,
    /// Longest sleep between ticks when nothing is stale
    pub idle_wait_ms: u64,
    /// Bound on synchronous opens under /sync
    pub sync_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_period_secs: 15.0,
            idle_wait_ms: 10,
            sync_timeout_ms: 5000,
        }
    }
}

/// Synthetic file table configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Smallest size reported for process.fire and save.fire
    pub fire_min_size: u64,
    /// Capacity of the buffers that client writes to saved.png land in
    pub saved_image_capacity: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            fire_min_size: 1024,
            saved_image_capacity: 4 * 1024 * 1024,
        }
    }
}

/// One configured vision endpoint
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VisionEndpointConfig {
    /// Canonical path, e.g. `/cv/1/bgr/cve/calibrate`
    pub path: String,
    /// Pipeline specification (JSON text)
    pub pipeline: Option<String>,
    /// Pipeline parameters (JSON object text)
    pub properties: Option<String>,
}

/// One configured serial device endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Canonical path, e.g. `/cnc/tinyg`
    pub path: String,
    /// Device node, e.g. `/dev/ttyUSB0`
    pub serial_path: PathBuf,
    /// Arguments passed to `stty -F <serial_path>`
    pub stty: String,
    /// Commands sent once the device is open
    pub init: Vec<String>,
    /// Polls before a synchronous JSON read gives up
    pub json_poll_retries: u32,
    pub json_poll_interval_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            serial_path: PathBuf::new(),
            stty: "115200 cs8 -parenb -cstopb raw -echo".to_string(),
            init: Vec::new(),
            json_poll_retries: 200,
            json_poll_interval_ms: 5,
        }
    }
}
