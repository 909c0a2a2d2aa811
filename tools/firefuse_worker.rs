//! Runs a FireFUSE rig without a kernel mount.
//!
//! The background worker runs on its own thread while stdin accepts one command per line:
//!
//! ```text
//! ls <dir>                  list a directory
//! stat <path>               file kind, size and mode
//! cat <path>                print a file
//! write <path> <text>       write text (gcode, JSON) to a file
//! put <path> <local-file>   copy a local file in, e.g. a JPEG to camera.jpg
//! get <path> <local-file>   copy a file out, e.g. monitor.jpg
//! reconfigure               drop created endpoints and re-register configured ones
//! quit
//! ```

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use firefuse::config::{load_config, validate_config, FireFuseConfig};
use firefuse::observability::{init_logging, parse_debug_flags, LogFormat, LoggingConfig};
use firefuse::runtime::{AccessMode, FileType, FireFuse};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// FireFUSE worker - camera, vision and device endpoints behind a file console
#[derive(Parser, Debug)]
#[command(name = "firefuse-worker", version, long_about = None)]
struct Args {
    /// Path to firefuse.toml (default: search from the working directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Default log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Base directory for run log folders
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write JSON log files under the log directory
    #[arg(long, default_value_t = false)]
    file_logging: bool,

    /// Console log lines as JSON
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Camera source: `none` or a JPEG file served as every frame
    #[arg(long)]
    camera_source: Option<String>,

    /// Seconds without work before the idle action
    #[arg(long)]
    idle_period: Option<f64>,

    /// Bound on synchronous opens in milliseconds
    #[arg(long)]
    sync_timeout_ms: Option<u64>,

    /// Enable debug logging for a crate (repeatable, `all` for every crate)
    #[arg(long = "debug", value_name = "CRATE")]
    debug_crates: Vec<String>,
}

impl Args {
    fn cli_overrides(&self) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(level) = &self.log_level {
            overrides.insert("log_level".to_string(), level.clone());
        }
        if let Some(dir) = &self.log_dir {
            overrides.insert("log_dir".to_string(), dir.display().to_string());
        }
        if let Some(source) = &self.camera_source {
            overrides.insert("camera_source".to_string(), source.clone());
        }
        if let Some(secs) = self.idle_period {
            overrides.insert("idle_period".to_string(), secs.to_string());
        }
        if let Some(ms) = self.sync_timeout_ms {
            overrides.insert("sync_timeout_ms".to_string(), ms.to_string());
        }
        if !self.debug_crates.is_empty() {
            overrides.insert("debug".to_string(), "true".to_string());
        }
        overrides
    }
}

fn load(args: &Args) -> Result<FireFuseConfig> {
    let overrides = args.cli_overrides();
    let config = match load_config(args.config.as_deref(), Some(&overrides)) {
        Ok(config) => config,
        Err(e) if args.config.is_none() => {
            eprintln!("No configuration file ({}), using defaults", e);
            let mut config = FireFuseConfig::default();
            firefuse::config::apply_environment_overrides(&mut config);
            firefuse::config::apply_cli_overrides(&mut config, &overrides);
            config
        }
        Err(e) => return Err(e).context("Failed to load configuration"),
    };
    validate_config(&config).map_err(|e| anyhow!("{}", e))?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load(&args)?;

    let mut debug_flags = parse_debug_flags();
    for name in &args.debug_crates {
        if name == "all" {
            debug_flags.enable_all();
        } else {
            debug_flags.enabled_crates.insert(name.clone(), true);
        }
    }
    let logging = LoggingConfig {
        level: if config.system.debug && !debug_flags.any_enabled() {
            "debug".to_string()
        } else {
            config.system.log_level.clone()
        },
        format: if args.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        file_logging: args.file_logging,
        log_dir: config.system.log_dir.clone(),
        ..LoggingConfig::default()
    };
    let _guard = init_logging(&debug_flags, &logging)?;

    info!(
        "[FS] Starting with {} vision and {} device endpoints",
        config.vision.len(),
        config.devices.len()
    );
    let fs = FireFuse::from_config(config);
    fs.start_worker().map_err(|e| anyhow!(e))?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        if let Err(e) = run_command(&fs, line, &mut stdout) {
            warn!("[FS] {}: {}", line, e);
            writeln!(stdout, "error: {}", e)?;
        }
        stdout.flush()?;
    }

    fs.stop_worker();
    info!("[FS] Shutdown complete");
    Ok(())
}

fn run_command(fs: &FireFuse, line: &str, out: &mut impl Write) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let path = parts.next();
    let rest = parts.next();

    match (command, path, rest) {
        ("ls", Some(path), None) => {
            for entry in fs.read_dir(path)? {
                let suffix = if entry.kind == FileType::Directory { "/" } else { "" };
                writeln!(out, "{}{}", entry.name, suffix)?;
            }
        }
        ("stat", Some(path), None) => {
            let attr = fs.getattr(path)?;
            writeln!(out, "{:?} size={} mode={:o}", attr.kind, attr.size, attr.mode)?;
        }
        ("cat", Some(path), None) => {
            let data = read_file(fs, path)?;
            out.write_all(&data)?;
            if !data.ends_with(b"\n") {
                writeln!(out)?;
            }
        }
        ("write", Some(path), Some(text)) => write_file(fs, path, text.as_bytes())?,
        ("put", Some(path), Some(local)) => {
            let data = std::fs::read(local).with_context(|| format!("Failed to read {}", local))?;
            write_file(fs, path, &data)?;
        }
        ("get", Some(path), Some(local)) => {
            let data = read_file(fs, path)?;
            std::fs::write(local, &data).with_context(|| format!("Failed to write {}", local))?;
            writeln!(out, "{} bytes", data.len())?;
        }
        ("reconfigure", None, None) => fs.reconfigure(),
        _ => bail!("unrecognized command"),
    }
    Ok(())
}

fn read_file(fs: &FireFuse, path: &str) -> Result<Vec<u8>> {
    let handle = fs.open(path, AccessMode::Read)?;
    let data = fs.read(&handle, 0, handle.len())?;
    fs.release(handle)?;
    Ok(data)
}

fn write_file(fs: &FireFuse, path: &str, data: &[u8]) -> Result<()> {
    let mut handle = fs.open(path, AccessMode::Write)?;
    if let Err(e) = fs.write(&mut handle, 0, data) {
        error!("[FS] write to {} failed: {}", path, e);
        return Err(e.into());
    }
    fs.release(handle)?;
    Ok(())
}
