use crate::camera::CameraNode;
use crate::frame::{encode_jpeg, encode_png, ColorMode};
use crate::pipeline::PipelineEngine;
use firefuse_structures::paths::{endpoint_name, is_color_profile};
use firefuse_structures::{FreshnessCache, OwnedBuffer};
use serde_json::{json, Value};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const DEFAULT_PIPELINE: &str = "[]";
const DEFAULT_PROPERTIES: &str = "{}";
const EMPTY_RESULT: &str = "{}";

/// A configured vision pipeline instance (CVE).
///
/// Every cache starts with a value so a reader never sees an empty file.
pub struct VisionEndpoint {
    path: String,
    is_color: bool,
    pipeline: FreshnessCache<OwnedBuffer>,
    properties: FreshnessCache<OwnedBuffer>,
    process: FreshnessCache<OwnedBuffer>,
    save: FreshnessCache<OwnedBuffer>,
    saved_image: FreshnessCache<OwnedBuffer>,
}

fn error_json(message: impl std::fmt::Display) -> OwnedBuffer {
    OwnedBuffer::from(json!({ "error": message.to_string() }).to_string())
}

fn parse_json(buffer: &OwnedBuffer, what: &str) -> Result<Value, String> {
    serde_json::from_slice(&buffer.data()).map_err(|e| format!("{} is not valid JSON: {}", what, e))
}

impl VisionEndpoint {
    /// `path` must be canonical, e.g. `/cv/1/gray/cve/holes`.
    pub fn new(path: &str) -> Self {
        let is_color = is_color_profile(path);
        debug!("[CVE] Created {} (color: {})", path, is_color);
        Self {
            path: path.to_string(),
            is_color,
            pipeline: FreshnessCache::with_value(OwnedBuffer::from(DEFAULT_PIPELINE)),
            properties: FreshnessCache::with_value(OwnedBuffer::from(DEFAULT_PROPERTIES)),
            process: FreshnessCache::with_value(OwnedBuffer::from(EMPTY_RESULT)),
            save: FreshnessCache::with_value(OwnedBuffer::from(EMPTY_RESULT)),
            saved_image: FreshnessCache::with_value(OwnedBuffer::empty()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        endpoint_name(&self.path)
    }

    pub fn is_color(&self) -> bool {
        self.is_color
    }

    pub fn color_mode(&self) -> ColorMode {
        ColorMode::from_is_color(self.is_color)
    }

    /// firesight.json
    pub fn pipeline(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.pipeline
    }

    /// properties.json
    pub fn properties(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.properties
    }

    /// process.fire
    pub fn process_result(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.process
    }

    /// save.fire
    pub fn save_result(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.save
    }

    /// saved.png
    pub fn saved_image(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.saved_image
    }

    /// Runs the pipeline on the camera's current frame and posts the JSON result. Any
    /// failure is posted as `{"error": ...}` instead.
    pub fn process(&self, camera: &CameraNode, engine: &dyn PipelineEngine, now: Instant) {
        match self.run_pipeline(camera, engine, now) {
            Ok(result) => self.process.post(result),
            Err(message) => {
                warn!("[CVE] {} process failed: {}", self.path, message);
                self.process.post(error_json(message));
            }
        }
    }

    fn run_pipeline(
        &self,
        camera: &CameraNode,
        engine: &dyn PipelineEngine,
        now: Instant,
    ) -> Result<OwnedBuffer, String> {
        let spec = parse_json(&self.pipeline.peek(), "pipeline")?;
        let properties = parse_json(&self.properties.peek(), "properties")?;
        let frame = camera
            .frame(self.color_mode())
            .map_err(|e| e.to_string())?;

        let started = Instant::now();
        let output = engine
            .run(&spec, &properties, &frame)
            .map_err(|e| e.to_string())?;
        debug!(
            "[CVE] {} pipeline ran in {:?}",
            self.path,
            started.elapsed()
        );

        if let Some(annotated) = &output.annotated {
            match encode_jpeg(annotated) {
                Ok(jpeg) => camera.post_output(OwnedBuffer::adopt(jpeg), now),
                Err(e) => warn!("[CVE] {} could not encode output frame: {}", self.path, e),
            }
        }
        serde_json::to_vec(&output.result)
            .map(OwnedBuffer::adopt)
            .map_err(|e| e.to_string())
    }

    /// Encodes the camera's current frame as PNG into saved.png, posts a save summary and
    /// shows the frame on output.jpg.
    pub fn save(&self, camera: &CameraNode, now: Instant) {
        match self.save_frame(camera, now) {
            Ok(summary) => self.save.post(summary),
            Err(message) => {
                warn!("[CVE] {} save failed: {}", self.path, message);
                self.save.post(error_json(message));
            }
        }
    }

    fn save_frame(&self, camera: &CameraNode, now: Instant) -> Result<OwnedBuffer, String> {
        let frame = camera
            .frame(self.color_mode())
            .map_err(|e| e.to_string())?;
        let png = encode_png(&frame).map_err(|e| e.to_string())?;
        let saved = png.len();
        self.saved_image.post(OwnedBuffer::adopt(png));

        match encode_jpeg(&frame) {
            Ok(jpeg) => camera.post_output(OwnedBuffer::adopt(jpeg), now),
            Err(e) => warn!("[CVE] {} could not encode output frame: {}", self.path, e),
        }

        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        info!("[CVE] {} saved {} bytes", self.path, saved);
        Ok(OwnedBuffer::from(
            json!({ "camera": { "time": time }, "saved": saved }).to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_readable() {
        let cve = VisionEndpoint::new("/cv/1/gray/cve/holes");
        assert!(!cve.is_color());
        assert_eq!(cve.name(), "holes");
        assert_eq!(&*cve.pipeline().get().data(), b"[]");
        assert_eq!(&*cve.properties().get().data(), b"{}");
        assert_eq!(&*cve.process_result().peek().data(), b"{}");
        assert!(cve.saved_image().peek().is_empty());
    }

    #[test]
    fn test_color_profile() {
        assert!(VisionEndpoint::new("/cv/1/bgr/cve/calibrate").is_color());
    }
}
