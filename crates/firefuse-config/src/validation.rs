//! Configuration validation
//!
//! Ensures configured values are usable and that configured endpoints are addressable
//! through the synthetic filesystem.

use crate::{ConfigError, ConfigResult, FireFuseConfig};
use firefuse_structures::paths::{canonicalize, endpoint_kind, EndpointKind};
use std::collections::HashSet;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
    NonCanonicalPath { field: String, path: String },
    DuplicateEndpoint { path: String },
    MalformedJson { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
            Self::NonCanonicalPath { field, path } => {
                write!(f, "{} = {} is not a canonical endpoint path", field, path)
            }
            Self::DuplicateEndpoint { path } => {
                write!(f, "Endpoint {} is configured more than once", path)
            }
            Self::MalformedJson { field, reason } => {
                write!(f, "{} is not valid JSON: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Non-zero camera dimensions and buffer capacities
/// - Endpoint paths that canonicalize to themselves and have the right kind
/// - Duplicate endpoints
/// - Pipeline and properties text that parses as JSON
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &FireFuseConfig) -> ConfigResult<()> {
    let mut errors = Vec::new();

    validate_value_ranges(config, &mut errors);
    validate_vision_endpoints(config, &mut errors);
    validate_devices(config, &mut errors);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

fn validate_value_ranges(config: &FireFuseConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.camera.width == 0 || config.camera.height == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "camera.width/camera.height".to_string(),
            reason: "dimensions must be non-zero".to_string(),
        });
    }
    if config.camera.max_frame_bytes == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "camera.max_frame_bytes".to_string(),
            reason: "must be > 0".to_string(),
        });
    }
    if config.files.saved_image_capacity == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "files.saved_image_capacity".to_string(),
            reason: "must be > 0".to_string(),
        });
    }
    if config.camera.monitor_duration_secs.is_nan() || config.camera.monitor_duration_secs < 0.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "camera.monitor_duration_secs".to_string(),
            reason: "must be >= 0".to_string(),
        });
    }
    if config.worker.idle_period_secs.is_nan() || config.worker.idle_period_secs < 0.0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "worker.idle_period_secs".to_string(),
            reason: "must be >= 0".to_string(),
        });
    }
}

fn check_endpoint_path(
    field: &str,
    path: &str,
    expected: EndpointKind,
    seen: &mut HashSet<String>,
    errors: &mut Vec<ConfigValidationError>,
) {
    if path.is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: field.to_string(),
        });
        return;
    }
    if canonicalize(path) != path || endpoint_kind(path) != Some(expected) {
        errors.push(ConfigValidationError::NonCanonicalPath {
            field: field.to_string(),
            path: path.to_string(),
        });
        return;
    }
    if !seen.insert(path.to_string()) {
        errors.push(ConfigValidationError::DuplicateEndpoint {
            path: path.to_string(),
        });
    }
}

fn check_json(field: String, text: &str, errors: &mut Vec<ConfigValidationError>) {
    if let Err(err) = serde_json::from_str::<serde_json::Value>(text) {
        errors.push(ConfigValidationError::MalformedJson {
            field,
            reason: err.to_string(),
        });
    }
}

fn validate_vision_endpoints(config: &FireFuseConfig, errors: &mut Vec<ConfigValidationError>) {
    let mut seen = HashSet::new();
    for (index, vision) in config.vision.iter().enumerate() {
        let field = format!("vision[{}].path", index);
        check_endpoint_path(&field, &vision.path, EndpointKind::Vision, &mut seen, errors);
        if let Some(pipeline) = &vision.pipeline {
            check_json(format!("vision[{}].pipeline", index), pipeline, errors);
        }
        if let Some(properties) = &vision.properties {
            check_json(format!("vision[{}].properties", index), properties, errors);
        }
    }
}

fn validate_devices(config: &FireFuseConfig, errors: &mut Vec<ConfigValidationError>) {
    let mut seen = HashSet::new();
    for (index, device) in config.devices.iter().enumerate() {
        let field = format!("devices[{}].path", index);
        check_endpoint_path(&field, &device.path, EndpointKind::Device, &mut seen, errors);
        if device.serial_path.as_os_str().is_empty() {
            errors.push(ConfigValidationError::MissingRequired {
                field: format!("devices[{}].serial_path", index),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeviceConfig, VisionEndpointConfig};
    use std::path::PathBuf;

    fn vision(path: &str) -> VisionEndpointConfig {
        VisionEndpointConfig {
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_rig() {
        let mut config = FireFuseConfig::default();
        config.vision.push(vision("/cv/1/bgr/cve/calibrate"));
        config.vision.push(vision("/cv/1/gray/cve/holes"));
        config.devices.push(DeviceConfig {
            path: "/cnc/tinyg".to_string(),
            serial_path: PathBuf::from("/dev/ttyUSB0"),
            ..Default::default()
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_dimensions() {
        let mut config = FireFuseConfig::default();
        config.camera.width = 0;
        config.camera.max_frame_bytes = 0;
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("dimensions must be non-zero"));
        assert!(err.contains("camera.max_frame_bytes"));
    }

    #[test]
    fn test_non_canonical_vision_path() {
        let mut config = FireFuseConfig::default();
        config
            .vision
            .push(vision("/sync/cv/1/bgr/cve/calibrate/process.fire"));
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("not a canonical endpoint path"));
    }

    #[test]
    fn test_device_path_under_vision_is_rejected() {
        let mut config = FireFuseConfig::default();
        config.devices.push(DeviceConfig {
            path: "/cv/1/bgr/cve/calibrate".to_string(),
            serial_path: PathBuf::from("/dev/ttyUSB0"),
            ..Default::default()
        });
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_endpoints() {
        let mut config = FireFuseConfig::default();
        config.vision.push(vision("/cv/1/bgr/cve/calibrate"));
        config.vision.push(vision("/cv/1/bgr/cve/calibrate"));
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("configured more than once"));
    }

    #[test]
    fn test_malformed_pipeline_json() {
        let mut config = FireFuseConfig::default();
        config.vision.push(VisionEndpointConfig {
            path: "/cv/1/bgr/cve/calibrate".to_string(),
            pipeline: Some("[{\"op\":".to_string()),
            properties: Some("{}".to_string()),
        });
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("vision[0].pipeline is not valid JSON"));
        assert!(!err.contains("vision[0].properties"));
    }
}
