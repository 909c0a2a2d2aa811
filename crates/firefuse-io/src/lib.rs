//! Serial device endpoints (DCE) for FireFUSE.
//!
//! [`SerialFramer`] turns the raw byte stream of a motion controller into line and JSON
//! events. [`DeviceEndpoint`] owns the serial link, runs one reader thread feeding the
//! framer, queues client commands for the worker and publishes correlated replies.

mod device;
mod error;
mod framer;
mod serial;

pub use device::{DeviceEndpoint, ReplyStatus};
pub use error::SerialError;
pub use framer::{FramerEvent, SerialFramer, BLANK_LINE_WARN_INTERVAL, MAX_JSON_LEN, MAX_LINE_LEN};
pub use serial::{configure_line, open_serial};
