//! Common helpers shared across the keypoint crates.

/// Pipeline settings persisted as JSON.
pub mod config;
/// Host identification for run reports.
pub mod diagnostics;
/// Image loading and decoding into RGBA pixel buffers.
pub mod image_utils;
/// Stage timing guards.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use diagnostics::SystemInfo;
pub use image_utils::{decode_rgba, load_image, load_rgba, source_to_path};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, duration_to_ms, telemetry_allows,
    telemetry_enabled, telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. The telemetry target is always
/// let through so that [`configure_telemetry`] alone decides whether timings are printed.
///
/// # Arguments
///
/// * `default_filter` - The `LevelFilter` to use if `RUST_LOG` is not set.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
