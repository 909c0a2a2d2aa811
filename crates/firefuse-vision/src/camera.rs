use crate::error::CameraError;
use crate::frame::{decode_jpeg, ColorMode, DecodedFrame};
use crate::source::FrameSource;
use firefuse_structures::{FreshnessCache, OwnedBuffer};
use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One physical camera and the views derived from it.
///
/// CACHES:
/// - `raw`: last JPEG captured or written by a client (camera.jpg)
/// - `color` / `gray`: decoded representations of `raw`
/// - `monitor`: what a live-view client should see now (monitor.jpg)
/// - `output`: last pipeline-annotated or saved frame (output.jpg)
pub struct CameraNode {
    source: Option<Box<dyn FrameSource>>,
    raw: FreshnessCache<OwnedBuffer>,
    color: FreshnessCache<DecodedFrame>,
    gray: FreshnessCache<DecodedFrame>,
    monitor: FreshnessCache<OwnedBuffer>,
    output: FreshnessCache<OwnedBuffer>,
    /// Raw write count each decoded cache was last produced from
    color_epoch: AtomicU64,
    gray_epoch: AtomicU64,
    last_output: Mutex<Option<Instant>>,
    monitor_duration: Duration,
}

impl CameraNode {
    /// `source` is `None` on a rig where frames only arrive through camera.jpg writes.
    pub fn new(source: Option<Box<dyn FrameSource>>, monitor_duration: Duration) -> Self {
        Self {
            source,
            raw: FreshnessCache::new(),
            color: FreshnessCache::new(),
            gray: FreshnessCache::new(),
            monitor: FreshnessCache::new(),
            output: FreshnessCache::new(),
            color_epoch: AtomicU64::new(0),
            gray_epoch: AtomicU64::new(0),
            last_output: Mutex::new(None),
            monitor_duration,
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn raw(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.raw
    }

    pub fn monitor(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.monitor
    }

    pub fn output(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.output
    }

    pub fn decoded(&self, mode: ColorMode) -> &FreshnessCache<DecodedFrame> {
        match mode {
            ColorMode::Color => &self.color,
            ColorMode::Gray => &self.gray,
        }
    }

    fn epoch(&self, mode: ColorMode) -> &AtomicU64 {
        match mode {
            ColorMode::Color => &self.color_epoch,
            ColorMode::Gray => &self.gray_epoch,
        }
    }

    /// True when any of raw, color or gray has been consumed since it was last posted.
    pub fn is_stale(&self) -> bool {
        !self.raw.is_fresh() || !self.color.is_fresh() || !self.gray.is_fresh()
    }

    /// Posts a client-written frame.
    pub fn post_raw(&self, jpeg: OwnedBuffer) {
        self.raw.post(jpeg);
    }

    /// Acquires one frame from the source and posts it. Returns false when there is no source.
    pub fn capture(&self) -> Result<bool, CameraError> {
        let Some(source) = &self.source else {
            return Ok(false);
        };
        let bytes = source.capture()?;
        self.raw.post(OwnedBuffer::adopt(bytes));
        Ok(true)
    }

    /// Whether `mode` lags behind the newest raw frame.
    fn needs_decode(&self, mode: ColorMode) -> bool {
        let raw_count = self.raw.write_count();
        raw_count > 0 && self.epoch(mode).load(Ordering::Acquire) != raw_count
    }

    /// Decodes the current raw frame into the `mode` cache.
    pub fn decode(&self, mode: ColorMode) -> Result<(), CameraError> {
        let raw_count = self.raw.write_count();
        let jpeg = self.raw.peek();
        let image = decode_jpeg(&jpeg.data(), mode)?;
        debug!(
            "[CAMERA] Decoded {:?} frame {}x{}",
            mode,
            image.width(),
            image.height()
        );
        self.decode_cache(mode, image, raw_count);
        Ok(())
    }

    fn decode_cache(&self, mode: ColorMode, image: DynamicImage, raw_count: u64) {
        self.decoded(mode).post(DecodedFrame::new(image));
        self.epoch(mode).store(raw_count, Ordering::Release);
    }

    /// Capture and decode stage of a scheduler tick. Runs only when raw or a decoded view has
    /// been consumed. When both decoded views were consumed both are decoded now; otherwise
    /// only the consumed one is. Returns whether any work was done.
    pub fn capture_and_decode(&self) -> Result<bool, CameraError> {
        if !self.is_stale() {
            return Ok(false);
        }
        let color_stale = !self.color.is_fresh();
        let gray_stale = !self.gray.is_fresh();

        let mut worked = self.capture()?;
        let predecode = color_stale && gray_stale;
        for (mode, stale) in [(ColorMode::Color, color_stale), (ColorMode::Gray, gray_stale)] {
            if (predecode || stale) && self.needs_decode(mode) {
                self.decode(mode)?;
                worked = true;
            }
        }
        Ok(worked)
    }

    /// Consumes the decoded frame for `mode`, decoding on demand when the cache lags raw.
    pub fn frame(&self, mode: ColorMode) -> Result<Arc<DynamicImage>, CameraError> {
        let cache = self.decoded(mode);
        if !cache.is_fresh() && self.needs_decode(mode) {
            self.decode(mode)?;
        }
        cache.get().image().cloned().ok_or(CameraError::NoFrame)
    }

    /// Publishes an annotated or saved frame to output.jpg and stamps it for the monitor.
    pub fn post_output(&self, jpeg: OwnedBuffer, now: Instant) {
        self.output.post(jpeg);
        *self.last_output.lock() = Some(now);
    }

    /// True while the last output frame is younger than the monitor window.
    pub fn output_is_recent(&self, now: Instant) -> bool {
        match *self.last_output.lock() {
            Some(at) => now.saturating_duration_since(at) <= self.monitor_duration,
            None => false,
        }
    }

    /// Monitor stage of a scheduler tick. Returns whether a frame was posted.
    pub fn refresh_monitor(&self, now: Instant) -> bool {
        if self.monitor.is_fresh() {
            return false;
        }
        let frame = if self.output_is_recent(now) {
            self.output.peek()
        } else {
            self.raw.peek()
        };
        if frame.is_empty() && self.raw.write_count() == 0 {
            return false;
        }
        self.monitor.post(frame);
        true
    }

    /// Idle action: makes the monitor stale so the next tick refreshes it.
    pub fn discard_monitor(&self) {
        debug!("[CAMERA] Idle: discarding monitor frame");
        self.monitor.discard();
    }
}
