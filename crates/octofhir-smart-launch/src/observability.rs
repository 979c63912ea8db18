//! Tracing initialisation for binaries embedding the launch client.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the host. These helpers set up a registry with an `EnvFilter`
//! (honouring `RUST_LOG`) and a `fmt` layer, with a reloadable level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Installs the subscriber at `info` level.
pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the subscriber at `level`, unless `RUST_LOG` is set.
///
/// Calling this more than once is harmless; only the first call installs.
pub fn init_tracing_with_level(level: &str) {
    let base_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|_| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(level));

    let (reload_layer, handle) = reload::Layer::new(base_filter);
    let _ = LOG_RELOAD_HANDLE.set(handle);

    let _ = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(false))
        .try_init();
}

/// Changes the log level at runtime.
///
/// Returns `false` if no subscriber was installed by this module.
pub fn apply_logging_level(level: &str) -> bool {
    LOG_RELOAD_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(|f| *f = EnvFilter::new(level)).is_ok())
}
