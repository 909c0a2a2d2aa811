//! # firefuse-observability
//!
//! Logging infrastructure shared by the FireFUSE crates, with per-crate debug flag support.
//!
//! ## Features
//! - `file-logging`: JSON log files with daily rotation and run retention

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod init;

pub use cli::*;
pub use config::*;
pub use init::*;

/// Known FireFUSE crate names for debug flags
pub const KNOWN_CRATES: &[&str] = &[
    "firefuse",
    "firefuse-structures",
    "firefuse-config",
    "firefuse-vision",
    "firefuse-io",
    "firefuse-runtime",
];

/// Tracing target for a crate name (`firefuse-io` logs under `firefuse_io`).
pub fn crate_target(crate_name: &str) -> String {
    crate_name.replace('-', "_")
}
