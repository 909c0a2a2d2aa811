use crate::error::SerialError;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Applies line discipline settings with `stty -F <device> <args>`. Empty `args` is a no-op.
pub fn configure_line(device: &Path, args: &str) -> Result<(), SerialError> {
    let args: Vec<&str> = args.split_whitespace().collect();
    if args.is_empty() {
        return Ok(());
    }
    debug!("[DCE] stty -F {} {}", device.display(), args.join(" "));
    let output = Command::new("stty")
        .arg("-F")
        .arg(device)
        .args(&args)
        .output()
        .map_err(|e| SerialError::Stty {
            path: device.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(SerialError::Stty {
            path: device.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Configures and opens a serial device. Returns separate handles for the reader thread and
/// for writes.
pub fn open_serial(device: &Path, stty: &str) -> Result<(File, File), SerialError> {
    configure_line(device, stty)?;
    let open_error = |source: std::io::Error| SerialError::Open {
        path: device.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(open_error)?;
    let writer = file.try_clone().map_err(open_error)?;
    info!("[DCE] Opened {}", device.display());
    Ok((file, writer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stty_is_noop() {
        configure_line(Path::new("/dev/does-not-exist"), "  ").unwrap();
    }

    #[test]
    fn test_open_missing_device() {
        let err = open_serial(Path::new("/dev/firefuse-missing-tty"), "").unwrap_err();
        assert!(matches!(err, SerialError::Open { .. }));
    }
}
