//! Stage timing for the keypoint pipeline.
//!
//! A [`TimingGuard`] measures one scoped operation. Dropping it logs the
//! elapsed time on the `keypoint::telemetry` target; calling
//! [`TimingGuard::finish`] logs the same line and hands the duration back so
//! callers can also record it (the pipeline feeds its performance record this
//! way). Log lines are only produced when telemetry has been switched on via
//! [`configure`] and the logger accepts the requested level.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
    time::{Duration, Instant},
};

use log::{Level, LevelFilter, log, log_enabled};

/// Log target used by every timing guard.
pub const TELEMETRY_TARGET: &str = "keypoint::telemetry";

static TELEMETRY_ENABLED: AtomicBool = AtomicBool::new(false);
static TELEMETRY_LEVEL: AtomicU8 = AtomicU8::new(0);

/// RAII timer for a labelled operation.
#[must_use = "a timing guard measures until it is dropped or finished"]
pub struct TimingGuard {
    label: Cow<'static, str>,
    level: Level,
    start: Instant,
    active: bool,
}

impl TimingGuard {
    /// Returns `true` when the guard will emit a log line.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Time elapsed since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer, log it when active and return the elapsed duration.
    pub fn finish(mut self) -> Duration {
        let duration = self.start.elapsed();
        self.emit(duration);
        self.active = false;
        duration
    }

    fn emit(&self, duration: Duration) {
        if self.active {
            log!(
                target: TELEMETRY_TARGET,
                self.level,
                "{} completed in {:.2?}",
                self.label,
                duration
            );
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if self.active {
            self.emit(self.start.elapsed());
        }
    }
}

/// Start timing `label`, logging at `level` when telemetry allows it.
pub fn timing_guard(label: impl Into<Cow<'static, str>>, level: Level) -> TimingGuard {
    timing_guard_if(label, level, true)
}

/// Like [`timing_guard`] but additionally gated on a caller-supplied flag.
pub fn timing_guard_if(
    label: impl Into<Cow<'static, str>>,
    level: Level,
    enabled: bool,
) -> TimingGuard {
    let active =
        enabled && telemetry_allows(level) && log_enabled!(target: TELEMETRY_TARGET, level);
    TimingGuard {
        label: label.into(),
        level,
        start: Instant::now(),
        active,
    }
}

/// Switch telemetry logging on or off and set its verbosity ceiling.
pub fn configure(enabled: bool, level: LevelFilter) {
    TELEMETRY_ENABLED.store(enabled, Ordering::Relaxed);
    TELEMETRY_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Whether telemetry logging is switched on.
pub fn telemetry_enabled() -> bool {
    TELEMETRY_ENABLED.load(Ordering::Relaxed)
}

/// Current telemetry verbosity ceiling.
pub fn telemetry_level() -> LevelFilter {
    match TELEMETRY_LEVEL.load(Ordering::Relaxed) {
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        5 => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

/// `true` when telemetry is on and `level` is within the configured ceiling.
pub fn telemetry_allows(level: Level) -> bool {
    telemetry_enabled() && level <= telemetry_level()
}

/// Convert a duration into fractional milliseconds.
pub fn duration_to_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}
