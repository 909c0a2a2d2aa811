//! Synthetic file table.
//!
//! ```text
//! /cv/<n>/camera.jpg                       raw frame (read, write)
//! /cv/<n>/output.jpg, monitor.jpg          derived views (read)
//! /cv/<n>/<profile>/cve/<name>/
//!     firesight.json, properties.json      pipeline and parameters (read, write)
//!     process.fire, save.fire              results; opening requests the next run (read)
//!     saved.png                            last saved frame (read, write, truncate)
//! /cnc/<name>/gcode.fire                   device commands and replies (read, write)
//! /sync/...                                same files; opens wait for the next result
//! ```

use crate::error::FsError;
use crate::registry::EntityRegistry;
use crate::scheduler::{BackgroundWorker, StageMask, WorkerRunner, WorkerSignal};
use firefuse_config::{CameraSource, FireFuseConfig};
use firefuse_io::DeviceEndpoint;
use firefuse_structures::paths::{
    camera_profile, endpoint_kind, endpoint_name, endpoint_relative, EndpointKind,
};
use firefuse_structures::{FreshnessCache, OwnedBuffer};
use firefuse_vision::{
    CameraNode, FrameSource, JpegFileSource, PipelineEngine, StageEngine, VisionEndpoint,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Path prefix selecting synchronous opens.
pub const SYNC_PREFIX: &str = "/sync";

pub const READ_ONLY_MODE: u32 = 0o444;
pub const READ_WRITE_MODE: u32 = 0o666;
pub const DIR_MODE: u32 = 0o755;

/// Capacity of write buffers for JSON and gcode files.
const TEXT_FILE_CAPACITY: usize = 64 * 1024;

/// camera.jpg write buffers kept for reuse.
const FRAME_POOL_SIZE: usize = 3;

const CAMERA_FILES: [&str; 3] = ["camera.jpg", "output.jpg", "monitor.jpg"];
const VISION_FILES: [&str; 5] = [
    "firesight.json",
    "properties.json",
    "process.fire",
    "save.fire",
    "saved.png",
];
const DEVICE_FILES: [&str; 1] = ["gcode.fire"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileType,
    pub size: u64,
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CameraFile {
    Raw,
    Output,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisionFile {
    Pipeline,
    Properties,
    Process,
    Save,
    SavedImage,
}

#[derive(Clone)]
enum Target {
    Camera(CameraFile),
    Vision(Arc<VisionEndpoint>, VisionFile),
    Device(Arc<DeviceEndpoint>),
}

impl Target {
    fn allows(&self, mode: AccessMode) -> bool {
        let writable = match self {
            Target::Camera(CameraFile::Raw) => true,
            Target::Camera(_) => false,
            Target::Vision(_, VisionFile::Process | VisionFile::Save) => false,
            Target::Vision(_, _) => true,
            Target::Device(_) => true,
        };
        match mode {
            AccessMode::Read => true,
            AccessMode::Write => writable,
            AccessMode::ReadWrite => false,
        }
    }

    fn is_fire(&self) -> bool {
        matches!(
            self,
            Target::Vision(_, VisionFile::Process | VisionFile::Save)
        )
    }
}

/// An open synthetic file. Reads see the snapshot taken at open; writes are buffered and
/// published on [`FireFuse::release`].
pub struct FileHandle {
    path: String,
    target: Target,
    mode: AccessMode,
    contents: OwnedBuffer,
    dirty: bool,
}

impl FileHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Bytes visible to reads, or written so far.
    pub fn len(&self) -> usize {
        self.contents.length()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Releases the global synchronous slot when dropped.
struct SyncSlot<'a>(&'a AtomicUsize);

impl<'a> SyncSlot<'a> {
    fn acquire(counter: &'a AtomicUsize, path: &str) -> Result<Self, FsError> {
        counter
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| FsError::WouldBlock(path.to_string()))?;
        Ok(SyncSlot(counter))
    }
}

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn split_sync(path: &str) -> (bool, &str) {
    match path.strip_prefix(SYNC_PREFIX) {
        Some(rest) if rest.starts_with('/') => (true, rest),
        Some("") => (true, "/"),
        _ => (false, path),
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// `/cv/<digits>` and the rest of the path after it.
fn camera_dir(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/cv/")?;
    let (number, tail) = rest.split_once('/').unwrap_or((rest, ""));
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((number, tail))
}

fn dir_entry(name: &str) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        kind: FileType::Directory,
    }
}

fn file_entry(name: &str) -> DirEntry {
    DirEntry {
        name: name.to_string(),
        kind: FileType::File,
    }
}

/// The context a filesystem adapter calls into. Owns the camera, the registry and the
/// background worker.
pub struct FireFuse {
    config: FireFuseConfig,
    camera: Arc<CameraNode>,
    registry: Arc<EntityRegistry>,
    worker: Arc<BackgroundWorker>,
    signal: Arc<WorkerSignal>,
    runner: Mutex<WorkerRunner>,
    sync_in_flight: AtomicUsize,
    /// camera.jpg write buffers. One is reused once the pool holds its only handle.
    frame_pool: Mutex<Vec<OwnedBuffer>>,
}

impl FireFuse {
    /// Builds the rig described by `config` and registers its endpoints. Devices that fail to
    /// open are logged and stay registered without a serial link.
    pub fn new(
        config: FireFuseConfig,
        frame_source: Option<Box<dyn FrameSource>>,
        engine: Arc<dyn PipelineEngine>,
    ) -> Self {
        let camera = Arc::new(CameraNode::new(
            frame_source,
            Duration::try_from_secs_f64(config.camera.monitor_duration_secs).unwrap_or_default(),
        ));
        let registry = Arc::new(EntityRegistry::new());
        let worker = Arc::new(BackgroundWorker::new(
            Arc::clone(&camera),
            Arc::clone(&registry),
            engine,
            Duration::try_from_secs_f64(config.worker.idle_period_secs).unwrap_or_default(),
        ));
        let signal = Arc::new(WorkerSignal::new());
        let runner = WorkerRunner::new(
            Arc::clone(&worker),
            Arc::clone(&signal),
            Duration::from_millis(config.worker.idle_wait_ms),
        );

        let firefuse = Self {
            config,
            camera,
            registry,
            worker,
            signal,
            runner: Mutex::new(runner),
            sync_in_flight: AtomicUsize::new(0),
            frame_pool: Mutex::new(Vec::new()),
        };
        firefuse.register_configured();
        firefuse
    }

    /// [`FireFuse::new`] with the configured camera source and the built-in stage engine.
    pub fn from_config(config: FireFuseConfig) -> Self {
        let source: Option<Box<dyn FrameSource>> = match &config.camera.source {
            CameraSource::None => None,
            CameraSource::JpegFile(path) => Some(Box::new(JpegFileSource::new(path))),
        };
        Self::new(config, source, Arc::new(StageEngine))
    }

    pub fn config(&self) -> &FireFuseConfig {
        &self.config
    }

    pub fn camera(&self) -> &Arc<CameraNode> {
        &self.camera
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn worker(&self) -> &Arc<BackgroundWorker> {
        &self.worker
    }

    /// One scheduler pass on the calling thread.
    pub fn tick(&self, now: Instant) -> StageMask {
        self.worker.tick(now)
    }

    pub fn start_worker(&self) -> Result<(), String> {
        self.runner.lock().start()
    }

    pub fn stop_worker(&self) {
        self.runner.lock().stop();
    }

    pub fn is_worker_running(&self) -> bool {
        self.runner.lock().is_running()
    }

    fn register_configured(&self) {
        for vision in &self.config.vision {
            let endpoint = Arc::new(VisionEndpoint::new(&vision.path));
            if let Some(pipeline) = &vision.pipeline {
                endpoint.pipeline().post(OwnedBuffer::from(pipeline.as_str()));
            }
            if let Some(properties) = &vision.properties {
                endpoint
                    .properties()
                    .post(OwnedBuffer::from(properties.as_str()));
            }
            self.registry.insert_vision(endpoint);
        }
        for device in &self.config.devices {
            let endpoint = Arc::new(DeviceEndpoint::new(device.clone()));
            if !device.serial_path.as_os_str().is_empty() {
                if let Err(e) = endpoint.connect() {
                    error!("[FS] Device {} unavailable: {}", device.path, e);
                }
            }
            self.registry.insert_device(endpoint);
        }
        info!(
            "[FS] Registered {} vision and {} device endpoints",
            self.config.vision.len(),
            self.config.devices.len()
        );
    }

    /// Drops every endpoint and registers the configured ones again.
    pub fn reconfigure(&self) {
        info!("[FS] Reconfiguring");
        self.registry.clear();
        self.register_configured();
        self.signal.notify();
    }

    //region Path resolution

    /// Maps a file path to its target. Only vision endpoints are created on demand; devices
    /// must be configured.
    fn target(&self, path: &str, create: bool) -> Result<Target, FsError> {
        if let Some(kind) = endpoint_kind(path) {
            let relative = endpoint_relative(path).unwrap_or("");
            let not_found = || FsError::NotFound(path.to_string());
            return match kind {
                EndpointKind::Vision => {
                    let file = match relative {
                        "firesight.json" => VisionFile::Pipeline,
                        "properties.json" => VisionFile::Properties,
                        "process.fire" => VisionFile::Process,
                        "save.fire" => VisionFile::Save,
                        "saved.png" => VisionFile::SavedImage,
                        _ => return Err(not_found()),
                    };
                    let cve = self.registry.resolve_vision(path, create)?;
                    Ok(Target::Vision(cve, file))
                }
                EndpointKind::Device => match relative {
                    "gcode.fire" => Ok(Target::Device(self.registry.resolve_device(path, false)?)),
                    _ => Err(not_found()),
                },
            };
        }

        match camera_dir(path) {
            Some((_, "camera.jpg")) => Ok(Target::Camera(CameraFile::Raw)),
            Some((_, "output.jpg")) => Ok(Target::Camera(CameraFile::Output)),
            Some((_, "monitor.jpg")) => Ok(Target::Camera(CameraFile::Monitor)),
            _ => Err(FsError::NotFound(path.to_string())),
        }
    }

    fn cache(&self, target: &Target) -> Option<&FreshnessCache<OwnedBuffer>> {
        match target {
            Target::Camera(CameraFile::Raw) => Some(self.camera.raw()),
            Target::Camera(CameraFile::Output) => Some(self.camera.output()),
            Target::Camera(CameraFile::Monitor) => Some(self.camera.monitor()),
            Target::Vision(..) | Target::Device(_) => None,
        }
    }

    fn vision_cache(cve: &VisionEndpoint, file: VisionFile) -> &FreshnessCache<OwnedBuffer> {
        match file {
            VisionFile::Pipeline => cve.pipeline(),
            VisionFile::Properties => cve.properties(),
            VisionFile::Process => cve.process_result(),
            VisionFile::Save => cve.save_result(),
            VisionFile::SavedImage => cve.saved_image(),
        }
    }

    /// Current contents without consuming.
    fn current(&self, target: &Target) -> OwnedBuffer {
        match target {
            Target::Vision(cve, file) => Self::vision_cache(cve, *file).peek(),
            Target::Device(dce) => dce.replies().peek(),
            camera => self.cache(camera).map(|c| c.peek()).unwrap_or_default(),
        }
    }

    //endregion

    //region File operations

    /// Stat probe. Never creates an endpoint.
    pub fn getattr(&self, path: &str) -> Result<FileAttr, FsError> {
        let (_, plain) = split_sync(path);
        match self.target(plain, false) {
            Ok(target) => {
                let length = self.current(&target).length() as u64;
                let size = if target.is_fire() {
                    length.max(self.config.files.fire_min_size)
                } else {
                    length
                };
                let mode = if target.allows(AccessMode::Write) {
                    READ_WRITE_MODE
                } else {
                    READ_ONLY_MODE
                };
                Ok(FileAttr {
                    kind: FileType::File,
                    size,
                    mode,
                })
            }
            Err(err) => match self.read_dir(path) {
                Ok(_) => Ok(FileAttr {
                    kind: FileType::Directory,
                    size: 0,
                    mode: DIR_MODE,
                }),
                Err(_) => Err(err),
            },
        }
    }

    pub fn open(&self, path: &str, mode: AccessMode) -> Result<FileHandle, FsError> {
        let (sync, plain) = split_sync(path);
        let target = self.target(plain, true)?;
        if !target.allows(mode) {
            return Err(FsError::AccessDenied(path.to_string()));
        }

        let contents = match mode {
            AccessMode::Read => self.open_read(path, &target, sync)?,
            _ => self.write_buffer(&target),
        };
        debug!("[FS] open {} {:?} ({} bytes)", path, mode, contents.length());
        Ok(FileHandle {
            path: path.to_string(),
            target,
            mode,
            contents,
            dirty: false,
        })
    }

    fn sync_timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.worker.sync_timeout_ms))
    }

    fn open_read(&self, path: &str, target: &Target, sync: bool) -> Result<OwnedBuffer, FsError> {
        let contents = match target {
            Target::Vision(cve, file @ (VisionFile::Process | VisionFile::Save)) => {
                let cache = Self::vision_cache(cve, *file);
                if sync {
                    let _slot = SyncSlot::acquire(&self.sync_in_flight, path)?;
                    let epoch = cache.write_count();
                    cache.discard();
                    self.signal.notify();
                    cache.get_after(epoch, self.sync_timeout())
                } else {
                    cache.get()
                }
            }
            Target::Vision(cve, file) => Self::vision_cache(cve, *file).get(),
            Target::Device(dce) => {
                if sync {
                    dce.replies().get_blocking(self.sync_timeout())
                } else {
                    dce.replies().get()
                }
            }
            camera => match self.cache(camera) {
                Some(cache) if sync => cache.get_blocking(self.sync_timeout()),
                Some(cache) => cache.get(),
                None => OwnedBuffer::empty(),
            },
        };
        self.signal.notify();
        Ok(contents)
    }

    fn write_buffer(&self, target: &Target) -> OwnedBuffer {
        match target {
            Target::Camera(CameraFile::Raw) => {
                let capacity = self.config.camera.max_frame_bytes;
                let mut pool = self.frame_pool.lock();
                pool.retain(|b| b.capacity() == capacity);
                if let Some(idle) = pool.iter().find(|b| b.ref_count() == 1) {
                    // Length change only, the allocation is kept
                    if idle.set_length(0).is_ok() {
                        return idle.clone();
                    }
                }
                let buffer = OwnedBuffer::with_capacity(capacity);
                if pool.len() < FRAME_POOL_SIZE {
                    pool.push(buffer.clone());
                }
                buffer
            }
            Target::Vision(_, VisionFile::SavedImage) => {
                OwnedBuffer::with_capacity(self.config.files.saved_image_capacity)
            }
            _ => OwnedBuffer::with_capacity(TEXT_FILE_CAPACITY),
        }
    }

    pub fn read(&self, handle: &FileHandle, offset: u64, size: usize) -> Result<Vec<u8>, FsError> {
        if handle.mode != AccessMode::Read {
            return Err(FsError::AccessDenied(handle.path.clone()));
        }
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(handle.contents.read_at(offset, size))
    }

    /// Buffers `data` at `offset`. Writes past the buffer capacity are rejected whole.
    pub fn write(&self, handle: &mut FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        if handle.mode == AccessMode::Read {
            return Err(FsError::AccessDenied(handle.path.clone()));
        }
        let offset = usize::try_from(offset)
            .map_err(|_| FsError::InvalidArgument(format!("offset {}", offset)))?;
        let written = handle.contents.write_at(offset, data).map_err(|e| {
            warn!("[FS] {} rejected write: {}", handle.path, e);
            FsError::from(e)
        })?;
        handle.dirty = true;
        Ok(written)
    }

    /// Resizes an open write buffer.
    pub fn ftruncate(&self, handle: &mut FileHandle, size: u64) -> Result<(), FsError> {
        if handle.mode == AccessMode::Read {
            return Err(FsError::AccessDenied(handle.path.clone()));
        }
        let size = usize::try_from(size)
            .map_err(|_| FsError::InvalidArgument(format!("size {}", size)))?;
        handle.contents.truncate(size)?;
        handle.dirty = true;
        Ok(())
    }

    /// Path truncate. saved.png is re-posted at the new length, which may not exceed its
    /// capacity; other writable files start every write open empty, so truncating them has
    /// nothing to do.
    pub fn truncate(&self, path: &str, size: u64) -> Result<(), FsError> {
        let (_, plain) = split_sync(path);
        let target = self.target(plain, false)?;
        if !target.allows(AccessMode::Write) {
            return Err(FsError::AccessDenied(path.to_string()));
        }
        if let Target::Vision(cve, VisionFile::SavedImage) = &target {
            let size = usize::try_from(size).unwrap_or(usize::MAX);
            let capacity = self.config.files.saved_image_capacity;
            if size > capacity {
                warn!("[FS] {} rejected truncate to {} bytes", path, size);
                return Err(FsError::Oversized {
                    requested: size,
                    capacity,
                });
            }
            let current = cve.saved_image().peek();
            let keep = size.min(current.length());
            let resized = OwnedBuffer::create_owned(&current.data()[..keep], capacity)?;
            resized.truncate(size)?;
            cve.saved_image().post(resized);
        }
        Ok(())
    }

    /// Publishes buffered writes.
    pub fn release(&self, handle: FileHandle) -> Result<(), FsError> {
        if !handle.dirty {
            return Ok(());
        }
        let FileHandle {
            path,
            target,
            contents,
            ..
        } = handle;
        debug!("[FS] release {} ({} bytes)", path, contents.length());
        match &target {
            Target::Camera(CameraFile::Raw) => self.camera.post_raw(contents),
            Target::Vision(cve, file) => Self::vision_cache(cve, *file).post(contents),
            Target::Device(dce) => {
                let text = String::from_utf8_lossy(&contents.data()).into_owned();
                dce.post_command(&text);
            }
            Target::Camera(_) => return Err(FsError::AccessDenied(path)),
        }
        self.signal.notify();
        Ok(())
    }

    //endregion

    //region Directories

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        let (sync, plain) = split_sync(path);
        let plain = normalize(plain);
        let not_found = || FsError::NotFound(path.to_string());

        match plain {
            "/" => {
                let mut entries = vec![dir_entry("cv"), dir_entry("cnc")];
                if !sync {
                    entries.push(dir_entry("sync"));
                }
                return Ok(entries);
            }
            "/cnc" => {
                let names = self.registry.devices();
                return Ok(names.iter().map(|d| dir_entry(d.name())).collect());
            }
            "/cv" => {
                return Ok(self.cameras().iter().map(|n| dir_entry(n)).collect());
            }
            _ => {}
        }

        if let Some(kind) = endpoint_kind(plain) {
            if endpoint_relative(plain) != Some("") {
                return Err(not_found());
            }
            let files: &[&str] = match kind {
                EndpointKind::Vision => &VISION_FILES,
                EndpointKind::Device => &DEVICE_FILES,
            };
            return match self.registry.resolve(plain, false) {
                Ok(_) => Ok(files.iter().map(|f| file_entry(f)).collect()),
                Err(_) => Err(not_found()),
            };
        }

        let (number, tail) = camera_dir(plain).ok_or_else(not_found)?;
        if !self.cameras().contains(number) {
            return Err(not_found());
        }
        let segments: Vec<&str> = tail.split('/').filter(|s| !s.is_empty()).collect();
        let endpoints = self.registry.vision_endpoints();
        let prefix = format!("/cv/{}/", number);
        let prefix = prefix.as_str();
        let under_camera = || {
            endpoints
                .iter()
                .filter(move |cve| cve.path().starts_with(prefix))
        };
        match segments.as_slice() {
            [] => {
                let mut entries: Vec<DirEntry> = CAMERA_FILES.iter().map(|f| file_entry(f)).collect();
                let profiles: BTreeSet<&str> = under_camera()
                    .filter_map(|cve| camera_profile(cve.path()))
                    .collect();
                entries.extend(profiles.into_iter().map(dir_entry));
                Ok(entries)
            }
            [profile] => {
                if under_camera().any(|cve| camera_profile(cve.path()) == Some(*profile)) {
                    Ok(vec![dir_entry("cve")])
                } else {
                    Err(not_found())
                }
            }
            [profile, "cve"] => {
                let names: Vec<DirEntry> = under_camera()
                    .filter(|cve| camera_profile(cve.path()) == Some(*profile))
                    .map(|cve| dir_entry(endpoint_name(cve.path())))
                    .collect();
                if names.is_empty() {
                    Err(not_found())
                } else {
                    Ok(names)
                }
            }
            _ => Err(not_found()),
        }
    }

    /// Camera numbers: `1` plus any named by a vision endpoint.
    fn cameras(&self) -> BTreeSet<String> {
        let mut cameras = BTreeSet::from(["1".to_string()]);
        for cve in self.registry.vision_endpoints() {
            if let Some((number, _)) = camera_dir(cve.path()) {
                cameras.insert(number.to_string());
            }
        }
        cameras
    }

    //endregion
}

impl Drop for FireFuse {
    fn drop(&mut self) {
        self.runner.lock().stop();
        self.registry.clear();
    }
}
