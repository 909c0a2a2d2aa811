//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{CameraSource, ConfigError, ConfigResult, FireFuseConfig, CONFIG_FILE_NAME};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "FIREFUSE_CONFIG_PATH";

/// Find the FireFUSE configuration file
///
/// Search order:
/// 1. `FIREFUSE_CONFIG_PATH` environment variable
/// 2. Current working directory: `./firefuse.toml`
/// 3. Up to 5 parent directories
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.clone();
        for _ in 0..5 {
            if let Some(parent) = current.parent() {
                search_paths.push(parent.join(CONFIG_FILE_NAME));
                current = parent.to_path_buf();
            }
        }
    }

    for path in &search_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    Err(ConfigError::FileNotFound(format!(
        "FireFUSE configuration file '{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, will search for config file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if config file is not found or contains invalid TOML. Validation is a
/// separate step, see [`crate::validate_config`].
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<FireFuseConfig> {
    let config_file = match config_path {
        Some(path) => path.to_path_buf(),
        None => find_config_file()?,
    };

    let content = fs::read_to_string(&config_file)?;
    let mut config: FireFuseConfig = toml::from_str(&content)?;

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

fn parse_camera_source(value: &str) -> CameraSource {
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        CameraSource::None
    } else {
        CameraSource::JpegFile(PathBuf::from(value))
    }
}

fn parse_bool(value: &str) -> bool {
    let lower = value.to_lowercase();
    lower == "true" || lower == "1" || lower == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `FIREFUSE_LOG_LEVEL` -> `system.log_level`
/// - `FIREFUSE_DEBUG` -> `system.debug`
/// - `FIREFUSE_CAMERA_SOURCE` -> `camera.source` (`none` or a JPEG path)
/// - `FIREFUSE_CAMERA_WIDTH` -> `camera.width`
/// - `FIREFUSE_CAMERA_HEIGHT` -> `camera.height`
/// - `FIREFUSE_MONITOR_DURATION` -> `camera.monitor_duration_secs`
/// - `FIREFUSE_IDLE_PERIOD` -> `worker.idle_period_secs`
/// - `FIREFUSE_SYNC_TIMEOUT_MS` -> `worker.sync_timeout_ms`
///
/// Values that fail to parse are ignored.
pub fn apply_environment_overrides(config: &mut FireFuseConfig) {
    if let Ok(value) = env::var("FIREFUSE_LOG_LEVEL") {
        config.system.log_level = value;
    }
    if let Ok(value) = env::var("FIREFUSE_DEBUG") {
        config.system.debug = parse_bool(&value);
    }

    if let Ok(value) = env::var("FIREFUSE_CAMERA_SOURCE") {
        config.camera.source = parse_camera_source(&value);
    }
    if let Ok(value) = env::var("FIREFUSE_CAMERA_WIDTH") {
        if let Ok(width) = value.parse::<u32>() {
            config.camera.width = width;
        }
    }
    if let Ok(value) = env::var("FIREFUSE_CAMERA_HEIGHT") {
        if let Ok(height) = value.parse::<u32>() {
            config.camera.height = height;
        }
    }
    if let Ok(value) = env::var("FIREFUSE_MONITOR_DURATION") {
        if let Ok(secs) = value.parse::<f64>() {
            config.camera.monitor_duration_secs = secs;
        }
    }

    if let Ok(value) = env::var("FIREFUSE_IDLE_PERIOD") {
        if let Ok(secs) = value.parse::<f64>() {
            config.worker.idle_period_secs = secs;
        }
    }
    if let Ok(value) = env::var("FIREFUSE_SYNC_TIMEOUT_MS") {
        if let Ok(ms) = value.parse::<u64>() {
            config.worker.sync_timeout_ms = ms;
        }
    }
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"camera_source": "frame.jpg", "log_level": "debug"}`)
pub fn apply_cli_overrides(config: &mut FireFuseConfig, cli_args: &HashMap<String, String>) {
    if let Some(value) = cli_args.get("debug") {
        config.system.debug = parse_bool(value);
    }
    if let Some(value) = cli_args.get("log_level") {
        config.system.log_level = value.clone();
    }
    if let Some(value) = cli_args.get("log_dir") {
        config.system.log_dir = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("camera_source") {
        config.camera.source = parse_camera_source(value);
    }
    if let Some(value) = cli_args.get("idle_period") {
        if let Ok(secs) = value.parse::<f64>() {
            config.worker.idle_period_secs = secs;
        }
    }
    if let Some(value) = cli_args.get("sync_timeout_ms") {
        if let Ok(ms) = value.parse::<u64>() {
            config.worker.sync_timeout_ms = ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom.toml");
        File::create(&config_path).unwrap();

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_find_config_file_env_var_missing() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("absent.toml");

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_rig_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        env::remove_var("FIREFUSE_CAMERA_WIDTH");
        env::remove_var("FIREFUSE_IDLE_PERIOD");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[camera]").unwrap();
        writeln!(file, "width = 800").unwrap();
        writeln!(file, "source = {{ jpeg_file = \"/tmp/frame.jpg\" }}").unwrap();
        writeln!(file, "[[vision]]").unwrap();
        writeln!(file, "path = \"/cv/1/gray/cve/holes\"").unwrap();
        writeln!(file, "pipeline = '[{{\"op\":\"threshold\",\"value\":128}}]'").unwrap();
        writeln!(file, "[[devices]]").unwrap();
        writeln!(file, "path = \"/cnc/tinyg\"").unwrap();
        writeln!(file, "serial_path = \"/dev/ttyUSB0\"").unwrap();
        writeln!(file, "init = [\"{{\\\"ee\\\":0}}\"]").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.camera.width, 800);
        assert_eq!(config.camera.height, 400);
        assert_eq!(
            config.camera.source,
            CameraSource::JpegFile(PathBuf::from("/tmp/frame.jpg"))
        );
        assert_eq!(config.vision.len(), 1);
        assert_eq!(config.vision[0].path, "/cv/1/gray/cve/holes");
        assert_eq!(config.devices[0].serial_path, PathBuf::from("/dev/ttyUSB0"));
        assert_eq!(config.devices[0].init, vec!["{\"ee\":0}".to_string()]);
        assert_eq!(config.worker.idle_period_secs, 15.0);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[camera\nwidth = ").unwrap();

        let result = load_config(Some(&config_path), None);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = FireFuseConfig::default();

        env::set_var("FIREFUSE_CAMERA_SOURCE", "/srv/frame.jpg");
        env::set_var("FIREFUSE_IDLE_PERIOD", "2.5");
        env::set_var("FIREFUSE_SYNC_TIMEOUT_MS", "not-a-number");

        apply_environment_overrides(&mut config);

        env::remove_var("FIREFUSE_CAMERA_SOURCE");
        env::remove_var("FIREFUSE_IDLE_PERIOD");
        env::remove_var("FIREFUSE_SYNC_TIMEOUT_MS");

        assert_eq!(
            config.camera.source,
            CameraSource::JpegFile(PathBuf::from("/srv/frame.jpg"))
        );
        assert_eq!(config.worker.idle_period_secs, 2.5);
        assert_eq!(config.worker.sync_timeout_ms, 5000);
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[system]").unwrap();
        writeln!(file, "log_level = \"warn\"").unwrap();
        writeln!(file, "[worker]").unwrap();
        writeln!(file, "idle_period_secs = 30.0").unwrap();

        env::set_var("FIREFUSE_LOG_LEVEL", "debug");
        env::set_var("FIREFUSE_IDLE_PERIOD", "20");

        let mut cli_args = HashMap::new();
        cli_args.insert("log_level".to_string(), "trace".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("FIREFUSE_LOG_LEVEL");
        env::remove_var("FIREFUSE_IDLE_PERIOD");

        // CLI wins for log level, env wins for idle period (no CLI override)
        assert_eq!(config.system.log_level, "trace");
        assert_eq!(config.worker.idle_period_secs, 20.0);
    }
}
