use firefuse::config::{load_config, validate_config, CameraSource};
use firefuse::runtime::{AccessMode, FireFuse};
use firefuse::vision::frame::encode_jpeg;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CVE: &str = "/cv/1/gray/cve/holes";

fn write_frame(dir: &Path) -> std::path::PathBuf {
    let image = GrayImage::from_fn(40, 20, |x, y| Luma([if (x + y) % 2 == 0 { 200 } else { 40 }]));
    let path = dir.join("frame.jpg");
    fs::write(&path, encode_jpeg(&DynamicImage::ImageLuma8(image)).unwrap()).unwrap();
    path
}

fn rig(dir: &Path) -> FireFuse {
    let frame = write_frame(dir);
    let config_path = dir.join("firefuse.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[camera]
source = {{ jpeg_file = "{}" }}

[worker]
idle_period_secs = 1.0
sync_timeout_ms = 5000

[[vision]]
path = "{}"
pipeline = '[{{"op":"threshold","name":"bright","value":"{{{{level}}}}"}},{{"op":"stats","name":"summary"}}]'
properties = '{{"level":128}}'

[[devices]]
path = "/cnc/tinyg"
"#,
            frame.display(),
            CVE
        ),
    )
    .unwrap();

    let config = load_config(Some(&config_path), None).unwrap();
    validate_config(&config).unwrap();
    assert_eq!(config.camera.source, CameraSource::JpegFile(frame));
    FireFuse::from_config(config)
}

fn read_all(fs: &FireFuse, path: &str) -> Vec<u8> {
    let handle = fs.open(path, AccessMode::Read).unwrap();
    let data = fs.read(&handle, 0, handle.len()).unwrap();
    fs.release(handle).unwrap();
    data
}

fn write_all(fs: &FireFuse, path: &str, data: &[u8]) {
    let mut handle = fs.open(path, AccessMode::Write).unwrap();
    fs.write(&mut handle, 0, data).unwrap();
    fs.release(handle).unwrap();
}

#[cfg(test)]
mod test_end_to_end {
    use super::*;

    #[test]
    fn test_sync_process_runs_configured_pipeline() {
        let dir = tempdir().unwrap();
        let fs = rig(dir.path());
        fs.start_worker().unwrap();

        let result: Value =
            serde_json::from_slice(&read_all(&fs, &format!("/sync{}/process.fire", CVE))).unwrap();
        assert_eq!(result["summary"]["width"], json!(40));
        assert_eq!(result["summary"]["height"], json!(20));
        assert!(result["bright"]["count"].as_u64().unwrap() > 0);

        // The thresholded frame becomes the output view
        let output = read_all(&fs, "/sync/cv/1/output.jpg");
        let output = image::load_from_memory_with_format(&output, ImageFormat::Jpeg).unwrap();
        assert_eq!(output.width(), 40);

        fs.stop_worker();
    }

    #[test]
    fn test_pipeline_rewrite_reports_error() {
        let dir = tempdir().unwrap();
        let fs = rig(dir.path());
        fs.start_worker().unwrap();

        write_all(
            &fs,
            &format!("{}/firesight.json", CVE),
            br#"[{"op":"sharpen"}]"#,
        );
        let result: Value =
            serde_json::from_slice(&read_all(&fs, &format!("/sync{}/process.fire", CVE))).unwrap();
        assert!(result["error"].as_str().unwrap().contains("sharpen"));

        fs.stop_worker();
    }

    #[test]
    fn test_sync_save_produces_png() {
        let dir = tempdir().unwrap();
        let fs = rig(dir.path());
        fs.start_worker().unwrap();

        let summary: Value =
            serde_json::from_slice(&read_all(&fs, &format!("/sync{}/save.fire", CVE))).unwrap();
        let saved = read_all(&fs, &format!("{}/saved.png", CVE));
        assert_eq!(summary["saved"], json!(saved.len()));
        assert!(summary["camera"]["time"].as_f64().unwrap() > 0.0);
        let png = image::load_from_memory_with_format(&saved, ImageFormat::Png).unwrap();
        assert_eq!((png.width(), png.height()), (40, 20));

        fs.stop_worker();
    }

    #[test]
    fn test_monitor_serves_camera_frames() {
        let dir = tempdir().unwrap();
        let fs = rig(dir.path());
        fs.start_worker().unwrap();

        let monitor = read_all(&fs, "/sync/cv/1/monitor.jpg");
        assert!(!monitor.is_empty());
        assert!(image::load_from_memory_with_format(&monitor, ImageFormat::Jpeg).is_ok());

        fs.stop_worker();
    }
}
