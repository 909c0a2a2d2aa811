//! Background worker.
//!
//! One tick runs every stage whose output has been consumed, in a fixed order:
//!
//! 1. capture and decode a camera frame
//! 2. send queued device commands
//! 3. run pending saves
//! 4. run pending pipelines
//! 5. refresh the monitor view
//! 6. idle action, when nothing else ran for `idle_period`
//!
//! [`WorkerRunner`] drives ticks on a dedicated thread and sleeps on a [`WorkerSignal`]
//! when a tick finds nothing to do.

use crate::registry::EntityRegistry;
use firefuse_vision::{CameraNode, PipelineEngine};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Stages executed by one tick.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct StageMask(u8);

impl StageMask {
    pub const CAMERA: StageMask = StageMask(1);
    pub const DEVICE: StageMask = StageMask(2);
    pub const SAVE: StageMask = StageMask(4);
    pub const PROCESS: StageMask = StageMask(8);
    pub const MONITOR: StageMask = StageMask(16);
    pub const IDLE: StageMask = StageMask(32);

    const NAMES: [(StageMask, &'static str); 6] = [
        (Self::CAMERA, "CAMERA"),
        (Self::DEVICE, "DEVICE"),
        (Self::SAVE, "SAVE"),
        (Self::PROCESS, "PROCESS"),
        (Self::MONITOR, "MONITOR"),
        (Self::IDLE, "IDLE"),
    ];

    pub const fn empty() -> Self {
        StageMask(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: StageMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for StageMask {
    type Output = StageMask;

    fn bitor(self, rhs: StageMask) -> StageMask {
        StageMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for StageMask {
    fn bitor_assign(&mut self, rhs: StageMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for StageMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(stage, _)| self.contains(*stage))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "StageMask(NONE)")
        } else {
            write!(f, "StageMask({})", names.join("|"))
        }
    }
}

/// Wakes the worker thread early when a file operation makes something stale.
#[derive(Default)]
pub struct WorkerSignal {
    pending: Mutex<bool>,
    wake: Condvar,
}

impl WorkerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *self.pending.lock() = true;
        self.wake.notify_one();
    }

    /// Waits for a notification or `timeout`. Returns true when notified.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            self.wake.wait_for(&mut pending, timeout);
        }
        std::mem::replace(&mut *pending, false)
    }
}

/// The scheduler state machine. Time is passed in so tests can simulate it.
pub struct BackgroundWorker {
    camera: Arc<CameraNode>,
    registry: Arc<EntityRegistry>,
    engine: Arc<dyn PipelineEngine>,
    idle_period: Duration,
    last_idle: Mutex<Option<Instant>>,
    camera_failing: AtomicBool,
}

impl BackgroundWorker {
    pub fn new(
        camera: Arc<CameraNode>,
        registry: Arc<EntityRegistry>,
        engine: Arc<dyn PipelineEngine>,
        idle_period: Duration,
    ) -> Self {
        Self {
            camera,
            registry,
            engine,
            idle_period,
            last_idle: Mutex::new(None),
            camera_failing: AtomicBool::new(false),
        }
    }

    pub fn camera(&self) -> &Arc<CameraNode> {
        &self.camera
    }

    /// Runs one pass over the stages and reports which ones did work.
    pub fn tick(&self, now: Instant) -> StageMask {
        let mut mask = StageMask::empty();
        let last_idle = *self.last_idle.lock().get_or_insert(now);

        match self.camera.capture_and_decode() {
            Ok(true) => {
                mask |= StageMask::CAMERA;
                if self.camera_failing.swap(false, Ordering::Relaxed) {
                    info!("[WORKER] Camera recovered");
                }
            }
            Ok(false) => {}
            Err(e) => {
                // Logged once per failure streak
                if !self.camera_failing.swap(true, Ordering::Relaxed) {
                    warn!("[WORKER] Camera stage failed: {}", e);
                }
            }
        }

        for device in self.registry.devices() {
            if device.dispatch_gcode() {
                mask |= StageMask::DEVICE;
            }
        }

        let endpoints = self.registry.vision_endpoints();
        for cve in &endpoints {
            if !cve.save_result().is_fresh() {
                cve.save(&self.camera, now);
                mask |= StageMask::SAVE;
            }
        }
        for cve in &endpoints {
            if !cve.process_result().is_fresh() {
                cve.process(&self.camera, self.engine.as_ref(), now);
                mask |= StageMask::PROCESS;
            }
        }

        if self.camera.refresh_monitor(now) {
            mask |= StageMask::MONITOR;
        }

        if mask.is_empty() && now.saturating_duration_since(last_idle) >= self.idle_period {
            self.camera.discard_monitor();
            *self.last_idle.lock() = Some(now);
            mask |= StageMask::IDLE;
        }

        if !mask.is_empty() {
            debug!("[WORKER] tick {:?}", mask);
        }
        mask
    }
}

/// Runs [`BackgroundWorker::tick`] on the `firefuse-worker` thread.
pub struct WorkerRunner {
    worker: Arc<BackgroundWorker>,
    signal: Arc<WorkerSignal>,
    idle_wait: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WorkerRunner {
    pub fn new(worker: Arc<BackgroundWorker>, signal: Arc<WorkerSignal>, idle_wait: Duration) -> Self {
        Self {
            worker,
            signal,
            idle_wait,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn start(&mut self) -> Result<(), String> {
        if self.running.load(Ordering::Acquire) {
            return Err("Worker already running".to_string());
        }
        info!("[WORKER] Starting (idle wait {:?})", self.idle_wait);
        self.running.store(true, Ordering::Release);

        let worker = Arc::clone(&self.worker);
        let signal = Arc::clone(&self.signal);
        let running = Arc::clone(&self.running);
        let idle_wait = self.idle_wait;

        let spawned = thread::Builder::new()
            .name("firefuse-worker".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    if worker.tick(Instant::now()).is_empty() {
                        signal.wait(idle_wait);
                    } else {
                        thread::yield_now();
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(format!("Failed to spawn worker thread: {}", e))
            }
        }
    }

    /// Clears the run flag and waits up to 2 seconds for the thread to finish.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }
        info!("[WORKER] Stopping...");
        self.running.store(false, Ordering::Release);
        self.signal.notify();

        if let Some(handle) = self.thread_handle.take() {
            let stop_timeout = Duration::from_secs(2);
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let _ = tx.send(handle.join());
            });
            match rx.recv_timeout(stop_timeout) {
                Ok(Ok(())) => info!("[WORKER] Stopped cleanly"),
                Ok(Err(_)) => error!("[WORKER] Worker thread panicked"),
                Err(mpsc::RecvTimeoutError::Timeout) => warn!(
                    "[WORKER] Did not stop within {:?}, proceeding with shutdown",
                    stop_timeout
                ),
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("[WORKER] Join thread disconnected unexpectedly")
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for WorkerRunner {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mask_ops() {
        let mut mask = StageMask::empty();
        assert!(mask.is_empty());
        mask |= StageMask::CAMERA;
        mask |= StageMask::MONITOR;
        assert_eq!(mask.bits(), 17);
        assert!(mask.contains(StageMask::CAMERA));
        assert!(!mask.contains(StageMask::IDLE));
        assert_eq!(format!("{:?}", mask), "StageMask(CAMERA|MONITOR)");
        assert_eq!(
            (StageMask::SAVE | StageMask::PROCESS).bits(),
            StageMask::SAVE.bits() + StageMask::PROCESS.bits()
        );
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let signal = Arc::new(WorkerSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.notify();
        assert!(waiter.join().unwrap());
        assert!(!signal.wait(Duration::from_millis(1)));
    }
}
