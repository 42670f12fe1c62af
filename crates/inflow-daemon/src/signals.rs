use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    flag as signal_flag,
};
use tracing::warn;

/// SIGTERM/SIGINT request orderly shutdown; SIGHUP requests a config-reload
/// style HUP-notify sweep (spec.md §4.8). Modeled on the teacher's
/// `ScopedSpine` signal wiring (`flux::spine::scoped`), minus the tile
/// machinery a single-process daemon has no use for.
pub struct SignalFlags {
    pub shutdown: Arc<AtomicBool>,
    pub hup: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn register() -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let hup = Arc::new(AtomicBool::new(false));

        if let Err(err) = signal_flag::register(SIGTERM, Arc::clone(&shutdown)) {
            warn!(%err, "failed to register SIGTERM handler");
        }
        if let Err(err) = signal_flag::register(SIGINT, Arc::clone(&shutdown)) {
            warn!(%err, "failed to register SIGINT handler");
        }
        if let Err(err) = signal_flag::register(SIGHUP, Arc::clone(&hup)) {
            warn!(%err, "failed to register SIGHUP handler");
        }

        Self { shutdown, hup }
    }

    /// Clears and reports whether a HUP arrived since the last check.
    pub fn take_hup(&self) -> bool {
        self.hup.swap(false, Ordering::Relaxed)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
