use crate::error::SerialError;
use crate::framer::{FramerEvent, SerialFramer};
use crate::serial::open_serial;
use firefuse_config::DeviceConfig;
use firefuse_structures::paths::endpoint_name;
use firefuse_structures::{FreshnessCache, OwnedBuffer};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK: usize = 256;
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How a reply line relates to the commands sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// Answers an outstanding command
    Done,
    /// Arrived with nothing outstanding
    Status,
    /// Line cut short by NUL or end of stream
    Error,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Done => "DONE",
            ReplyStatus::Status => "STATUS",
            ReplyStatus::Error => "ERROR",
        }
    }
}

/// State shared between the endpoint and its reader thread.
struct DeviceShared {
    path: String,
    /// Client-written gcode waiting for the worker
    commands: FreshnessCache<OwnedBuffer>,
    /// Device replies, the readable side of gcode.fire
    replies: FreshnessCache<OwnedBuffer>,
    outstanding: AtomicUsize,
    last_command: Mutex<String>,
    /// JSON completed on the line currently being received
    line_json: Mutex<Option<String>>,
    last_json: Mutex<String>,
    json_count: AtomicU64,
}

impl DeviceShared {
    fn handle(&self, event: FramerEvent) {
        match event {
            FramerEvent::Line(line) => {
                let status = if self.take_outstanding() {
                    ReplyStatus::Done
                } else {
                    ReplyStatus::Status
                };
                let json = self.line_json.lock().take();
                self.post_reply(status, &line, json);
            }
            FramerEvent::LineError(line) => {
                warn!("[DCE] {} incomplete line: {:?}", self.path, line);
                self.take_outstanding();
                self.line_json.lock().take();
                self.post_reply(ReplyStatus::Error, &line, None);
            }
            FramerEvent::JsonComplete(text) => {
                trace!("[DCE] {} json: {}", self.path, text);
                *self.line_json.lock() = Some(text.clone());
                *self.last_json.lock() = text;
                self.json_count.fetch_add(1, Ordering::AcqRel);
            }
            FramerEvent::BlankLines(count) => {
                warn!("[DCE] {} has sent {} blank lines", self.path, count);
            }
        }
    }

    fn take_outstanding(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn post_reply(&self, status: ReplyStatus, line: &str, json: Option<String>) {
        let response = json
            .as_deref()
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .or_else(|| serde_json::from_str::<Value>(line).ok())
            .unwrap_or_else(|| Value::String(line.to_string()));
        let reply = json!({
            "status": status.as_str(),
            "gcode": self.last_command.lock().clone(),
            "response": response,
        });
        debug!("[DCE] {} {} {}", self.path, status.as_str(), line);
        self.replies.post(OwnedBuffer::from(reply.to_string()));
    }
}

/// A configured serial controller (DCE) addressed by a canonical path such as `/cnc/tinyg`.
pub struct DeviceEndpoint {
    config: DeviceConfig,
    shared: Arc<DeviceShared>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
}

impl DeviceEndpoint {
    pub fn new(config: DeviceConfig) -> Self {
        let shared = Arc::new(DeviceShared {
            path: config.path.clone(),
            commands: FreshnessCache::new(),
            replies: FreshnessCache::with_value(OwnedBuffer::from("{}")),
            outstanding: AtomicUsize::new(0),
            last_command: Mutex::new(String::new()),
            line_json: Mutex::new(None),
            last_json: Mutex::new(String::new()),
            json_count: AtomicU64::new(0),
        });
        Self {
            config,
            shared,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn name(&self) -> &str {
        endpoint_name(&self.shared.path)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Replies read back through gcode.fire. Only device output is posted here.
    pub fn replies(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.shared.replies
    }

    /// Commands written to gcode.fire. Only [`Self::dispatch_gcode`] consumes them.
    pub fn commands(&self) -> &FreshnessCache<OwnedBuffer> {
        &self.shared.commands
    }

    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    pub fn is_attached(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Opens the configured serial device, starts the reader and sends the init commands.
    pub fn connect(&self) -> Result<(), SerialError> {
        let (reader, writer) = open_serial(&self.config.serial_path, &self.config.stty)?;
        self.attach(Box::new(reader), Box::new(writer))?;
        for command in &self.config.init {
            let reply = self.transact_json(command)?;
            info!("[DCE] {} init {} -> {}", self.path(), command, reply);
        }
        Ok(())
    }

    /// Starts the reader thread on `reader` and routes writes to `writer`.
    pub fn attach(
        &self,
        mut reader: Box<dyn Read + Send>,
        writer: Box<dyn Write + Send>,
    ) -> Result<(), SerialError> {
        let mut handle_slot = self.reader.lock();
        if handle_slot.is_some() {
            return Err(SerialError::AlreadyAttached(self.path().to_string()));
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("firefuse-serial-{}", self.name()))
            .spawn(move || {
                info!("[DCE] {} reader started", shared.path);
                let mut framer = SerialFramer::new();
                let mut chunk = [0u8; READ_CHUNK];
                while running.load(Ordering::Acquire) {
                    match reader.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => {
                            for &byte in &chunk[..n] {
                                if let Some(event) = framer.push_byte(byte) {
                                    shared.handle(event);
                                }
                            }
                        }
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            thread::yield_now();
                        }
                        Err(e) => {
                            error!("[DCE] {} read failed: {}", shared.path, e);
                            break;
                        }
                    }
                }
                if let Some(event) = framer.finish() {
                    shared.handle(event);
                }
                running.store(false, Ordering::Release);
                info!("[DCE] {} reader stopped", shared.path);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                SerialError::Io(e)
            })?;

        *handle_slot = Some(handle);
        *self.writer.lock() = Some(writer);
        Ok(())
    }

    /// True while the reader thread is consuming device output.
    pub fn is_reading(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sends one command, adding a line terminator if missing. The outstanding count is raised
    /// before the write so the reply is classified as DONE.
    pub fn serial_send(&self, command: &str) -> Result<(), SerialError> {
        let mut writer = self.writer.lock();
        let Some(writer) = writer.as_mut() else {
            return Err(SerialError::NotOpen(self.path().to_string()));
        };
        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        *self.shared.last_command.lock() = command.trim_end().to_string();
        self.shared.outstanding.fetch_add(1, Ordering::AcqRel);
        let result = writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.flush());
        if let Err(e) = result {
            self.shared.take_outstanding();
            return Err(SerialError::Io(e));
        }
        debug!("[DCE] {} sent {}", self.path(), command.trim_end());
        Ok(())
    }

    /// Waits for the next complete JSON object from the device. Gives up after the
    /// configured number of polls and returns `{"error": ...}` instead.
    pub fn read_json(&self) -> String {
        self.read_json_since(self.shared.json_count.load(Ordering::Acquire))
    }

    fn read_json_since(&self, epoch: u64) -> String {
        let interval = Duration::from_millis(self.config.json_poll_interval_ms);
        for _ in 0..=self.config.json_poll_retries {
            if self.shared.json_count.load(Ordering::Acquire) > epoch {
                return self.shared.last_json.lock().clone();
            }
            thread::sleep(interval);
        }
        warn!(
            "[DCE] {} no JSON after {} polls",
            self.path(),
            self.config.json_poll_retries
        );
        json!({ "error": format!("{}: no JSON response", self.path()) }).to_string()
    }

    /// Sends `command` and waits for the JSON it produces.
    pub fn transact_json(&self, command: &str) -> Result<String, SerialError> {
        let epoch = self.shared.json_count.load(Ordering::Acquire);
        self.serial_send(command)?;
        Ok(self.read_json_since(epoch))
    }

    /// Queues a client-written command for the worker.
    pub fn post_command(&self, text: &str) {
        debug!("[DCE] {} queued {:?}", self.path(), text);
        self.shared.commands.post(OwnedBuffer::from(text));
    }

    /// True when a queued command is waiting to be sent.
    pub fn has_pending_command(&self) -> bool {
        self.shared.commands.is_fresh()
    }

    /// Worker stage: sends a queued command, one line at a time. Returns whether a command
    /// was taken. Send failures are posted as an ERROR reply.
    pub fn dispatch_gcode(&self) -> bool {
        // The worker is the only consumer, so a fresh queue still holds a command at `get`
        if !self.has_pending_command() {
            return false;
        }
        let command = self.shared.commands.get();
        let text = String::from_utf8_lossy(&command.data()).into_owned();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Err(e) = self.serial_send(line) {
                warn!("[DCE] {} could not send {:?}: {}", self.path(), line, e);
                let reply = json!({
                    "status": ReplyStatus::Error.as_str(),
                    "gcode": line,
                    "response": e.to_string(),
                });
                self.shared.replies.post(OwnedBuffer::from(reply.to_string()));
                break;
            }
        }
        true
    }

    /// Waits up to `timeout` for the next reply and consumes it.
    pub fn read_reply(&self, timeout: Duration) -> OwnedBuffer {
        self.shared.replies.get_blocking(Some(timeout))
    }

    /// Closes the write side and waits a bounded time for the reader to exit. A reader
    /// blocked on a silent device is left detached.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.writer.lock().take();
        let Some(handle) = self.reader.lock().take() else {
            return;
        };

        // JoinHandle has no timed join, so join from a helper thread
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(handle.join());
        });
        match rx.recv_timeout(STOP_JOIN_TIMEOUT) {
            Ok(Ok(())) => debug!("[DCE] {} reader joined", self.path()),
            Ok(Err(_)) => error!("[DCE] {} reader panicked", self.path()),
            Err(mpsc::RecvTimeoutError::Timeout) => warn!(
                "[DCE] {} reader still blocked after {:?}, detaching",
                self.path(),
                STOP_JOIN_TIMEOUT
            ),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("[DCE] {} join helper disconnected", self.path())
            }
        }
    }
}

impl Drop for DeviceEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}
