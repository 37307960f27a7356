//! Logging and debugging facilities for tsignal.
//!
//! This module provides:
//! - Integration with the `tracing` crate for structured logging
//! - Performance tracing hooks for profiling
//! - The `TSIGNAL_DEBUG` environment toggle
//!
//! # Tracing Integration
//!
//! tsignal uses the `tracing` crate for instrumentation. To see logs, install
//! a subscriber in the embedding application:
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// Span names used throughout tsignal for tracing.
pub mod span_names {
    /// Signal emission span.
    pub const EMIT: &str = "tsignal::emit";
    /// Worker loop span.
    pub const WORKER_LOOP: &str = "tsignal::worker_loop";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives (`RUST_LOG=tsignal::signal=debug`) to
/// filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "tsignal";
    /// Signal connect/disconnect/emit target.
    pub const SIGNAL: &str = "tsignal::signal";
    /// Dispatcher decision target.
    pub const DISPATCH: &str = "tsignal::dispatch";
    /// Worker lifecycle target.
    pub const WORKER: &str = "tsignal::worker";
    /// Execution context target.
    pub const EXECUTION: &str = "tsignal::execution";
}

static DEBUG_OVERRIDE: OnceLock<AtomicBool> = OnceLock::new();

fn debug_cell() -> &'static AtomicBool {
    DEBUG_OVERRIDE.get_or_init(|| {
        let enabled = std::env::var("TSIGNAL_DEBUG")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        AtomicBool::new(enabled)
    })
}

/// Returns whether the `TSIGNAL_DEBUG` toggle is currently enabled.
///
/// Checked once lazily from the environment and cached; flip it at runtime
/// with [`set_debug`].
pub fn is_debug_enabled() -> bool {
    debug_cell().load(Ordering::Relaxed)
}

/// Explicitly enable or disable the `TSIGNAL_DEBUG` toggle, overriding
/// whatever the environment said at process start.
pub fn set_debug(enabled: bool) {
    debug_cell().store(enabled, Ordering::Relaxed);
}

/// A guard that emits a tracing span for the duration it is held.
///
/// Useful for timing dispatch or worker-loop iterations.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span, active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "tsignal::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Wrapper around `tracing::trace!`, additionally gated by
/// [`is_debug_enabled`] so embedders get finer-grained detail only when they
/// opt in. Callers supply their own `target: ...` (see [`targets`]).
#[macro_export]
macro_rules! tsignal_trace {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::trace!($($arg)*)
        }
    };
}

/// Wrapper around `tracing::debug!`, gated by [`is_debug_enabled`]. Callers
/// supply their own `target: ...` (see [`targets`]).
#[macro_export]
macro_rules! tsignal_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*)
        }
    };
}

/// Wrapper around `tracing::info!`. Callers supply their own `target: ...`
/// (see [`targets`]).
#[macro_export]
macro_rules! tsignal_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

/// Wrapper around `tracing::warn!`. Callers supply their own `target: ...`
/// (see [`targets`]).
#[macro_export]
macro_rules! tsignal_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

/// Wrapper around `tracing::error!`. Callers supply their own `target: ...`
/// (see [`targets`]).
#[macro_export]
macro_rules! tsignal_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}
