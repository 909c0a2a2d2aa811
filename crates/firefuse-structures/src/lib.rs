//! The core crate for FireFUSE. Defines the data plane primitives shared by every stage:
//!
//! - [`OwnedBuffer`]: a reference-counted byte buffer with a logical length that can move
//!   freely inside a fixed allocated capacity, so camera frames can be rewritten in place
//!   and shared between threads without copying.
//! - [`FreshnessCache`]: a single-producer, multi-consumer mailbox that keeps the current
//!   value plus at most one pending overwrite. The most recent post always wins.
//! - [`paths`]: the anchor-scanning rule that maps synthetic file paths to endpoint keys.

mod error;
mod freshness_cache;
mod owned_buffer;
pub mod paths;

pub use error::BufferError;
pub use freshness_cache::FreshnessCache;
pub use owned_buffer::{OwnedBuffer, WeakBuffer};
