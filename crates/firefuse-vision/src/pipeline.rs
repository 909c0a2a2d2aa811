//! Pipeline execution.
//!
//! A pipeline is a JSON array of stages. Each stage names an operator in `op` and may name
//! itself in `name` (default `s<index>`). String arguments of the form `{{key}}` are
//! replaced by `properties[key]` before the stage runs.
//!
//! ```json
//! [
//!   {"op": "gray"},
//!   {"op": "threshold", "name": "mask", "value": "{{level}}"},
//!   {"op": "stats", "name": "summary"}
//! ]
//! ```

use crate::error::PipelineError;
use image::{DynamicImage, GenericImageView, GrayImage};
use serde_json::{json, Map, Value};

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Stage results keyed by stage name
    pub result: Value,
    /// Frame after the last image-producing stage, shown on output.jpg
    pub annotated: Option<DynamicImage>,
}

pub trait PipelineEngine: Send + Sync {
    fn run(
        &self,
        spec: &Value,
        properties: &Value,
        frame: &DynamicImage,
    ) -> Result<PipelineOutput, PipelineError>;
}

/// Built-in engine with a small set of image operators.
///
/// | op | arguments | result |
/// |---|---|---|
/// | `gray` | | dimensions |
/// | `blur` | `sigma` (1.0) | sigma |
/// | `threshold` | `value` | white pixel count and fraction |
/// | `crop` | `x`, `y` (0), `width`, `height` | crop rectangle |
/// | `stats` | | dimensions and mean intensity |
/// | `fail` | `message` | always fails |
#[derive(Debug, Default, Clone, Copy)]
pub struct StageEngine;

impl PipelineEngine for StageEngine {
    fn run(
        &self,
        spec: &Value,
        properties: &Value,
        frame: &DynamicImage,
    ) -> Result<PipelineOutput, PipelineError> {
        let stages = spec.as_array().ok_or_else(|| {
            PipelineError::InvalidSpec("pipeline must be a JSON array of stages".to_string())
        })?;

        let mut image = frame.clone();
        let mut results = Map::new();
        for (index, raw) in stages.iter().enumerate() {
            let stage = Stage::parse(index, raw, properties)?;
            let value = stage.apply(&mut image)?;
            results.insert(stage.name, value);
        }

        Ok(PipelineOutput {
            result: Value::Object(results),
            annotated: (!stages.is_empty()).then_some(image),
        })
    }
}

struct Stage<'a> {
    name: String,
    op: String,
    args: &'a Map<String, Value>,
    properties: &'a Value,
}

fn placeholder(text: &str) -> Option<&str> {
    text.strip_prefix("{{")?.strip_suffix("}}").map(str::trim)
}

impl<'a> Stage<'a> {
    fn parse(index: usize, raw: &'a Value, properties: &'a Value) -> Result<Self, PipelineError> {
        let args = raw.as_object().ok_or_else(|| {
            PipelineError::InvalidSpec(format!("stage {} is not a JSON object", index))
        })?;
        let op = args
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::InvalidSpec(format!("stage {} has no \"op\"", index)))?;
        let name = match args.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => format!("s{}", index),
        };
        Ok(Stage {
            name,
            op: op.to_string(),
            args,
            properties,
        })
    }

    fn arg(&self, key: &str) -> Option<Value> {
        let value = self.args.get(key)?;
        match value.as_str().and_then(placeholder) {
            Some(property) => self.properties.get(property).cloned(),
            None => Some(value.clone()),
        }
    }

    fn bad(&self, key: &str) -> PipelineError {
        PipelineError::BadArgument {
            stage: self.name.clone(),
            op: self.op.clone(),
            arg: key.to_string(),
        }
    }

    fn number(&self, key: &str, default: Option<f64>) -> Result<f64, PipelineError> {
        match self.arg(key) {
            Some(value) => value
                .as_f64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| self.bad(key)),
            None => default.ok_or_else(|| self.bad(key)),
        }
    }

    fn unsigned(&self, key: &str, default: Option<u32>) -> Result<u32, PipelineError> {
        let value = self.number(key, default.map(f64::from))?;
        if value < 0.0 || value > f64::from(u32::MAX) || value.fract() != 0.0 {
            return Err(self.bad(key));
        }
        Ok(value as u32)
    }

    fn apply(&self, image: &mut DynamicImage) -> Result<Value, PipelineError> {
        match self.op.as_str() {
            "gray" => {
                *image = DynamicImage::ImageLuma8(image.to_luma8());
                Ok(json!({"width": image.width(), "height": image.height()}))
            }
            "blur" => {
                let sigma = self.number("sigma", Some(1.0))?;
                if sigma <= 0.0 {
                    return Err(self.bad("sigma"));
                }
                *image = image.blur(sigma as f32);
                Ok(json!({"sigma": sigma}))
            }
            "threshold" => {
                let value = self.unsigned("value", None)?;
                if value > 255 {
                    return Err(self.bad("value"));
                }
                let (mask, count) = threshold(image.to_luma8(), value as u8);
                let total = u64::from(mask.width()) * u64::from(mask.height());
                *image = DynamicImage::ImageLuma8(mask);
                let fraction = if total == 0 {
                    0.0
                } else {
                    count as f64 / total as f64
                };
                Ok(json!({"value": value, "count": count, "fraction": fraction}))
            }
            "crop" => {
                let x = self.unsigned("x", Some(0))?;
                let y = self.unsigned("y", Some(0))?;
                let width = self.unsigned("width", None)?;
                let height = self.unsigned("height", None)?;
                let (image_width, image_height) = image.dimensions();
                let fits = width > 0
                    && height > 0
                    && u64::from(x) + u64::from(width) <= u64::from(image_width)
                    && u64::from(y) + u64::from(height) <= u64::from(image_height);
                if !fits {
                    return Err(PipelineError::StageFailed {
                        stage: self.name.clone(),
                        reason: format!(
                            "crop {}x{}+{}+{} exceeds frame {}x{}",
                            width, height, x, y, image_width, image_height
                        ),
                    });
                }
                *image = image.crop_imm(x, y, width, height);
                Ok(json!({"x": x, "y": y, "width": width, "height": height}))
            }
            "stats" => {
                let luma = image.to_luma8();
                let count = luma.as_raw().len();
                let mean = if count == 0 {
                    0.0
                } else {
                    luma.as_raw().iter().map(|&p| u64::from(p)).sum::<u64>() as f64 / count as f64
                };
                Ok(json!({"width": image.width(), "height": image.height(), "mean": mean}))
            }
            "fail" => {
                let reason = self
                    .arg("message")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| "fault injected".to_string());
                Err(PipelineError::StageFailed {
                    stage: self.name.clone(),
                    reason,
                })
            }
            other => Err(PipelineError::UnknownOperator {
                stage: self.name.clone(),
                op: other.to_string(),
            }),
        }
    }
}

fn threshold(mut luma: GrayImage, level: u8) -> (GrayImage, u64) {
    let mut count = 0;
    for pixel in luma.pixels_mut() {
        if pixel.0[0] >= level {
            pixel.0[0] = 255;
            count += 1;
        } else {
            pixel.0[0] = 0;
        }
    }
    (luma, count)
}
