//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT request shutdown, SIGHUP requests a reload of the
//! machine definitions. The handlers only store into static atomics; the
//! main loop calls [`SignalHandler::poll`] once per cycle to pick them up.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::{debug, info};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static RELOAD_FLAG: AtomicBool = AtomicBool::new(false);

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM or SIGINT.
    Shutdown,
    /// SIGHUP.
    Reload,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Shutdown => write!(f, "SIGTERM/SIGINT"),
            SignalKind::Reload => write!(f, "SIGHUP"),
        }
    }
}

/// Shutdown and reload requests seen by the main loop.
#[derive(Debug, Default)]
pub struct SignalHandler {
    shutdown_requested: AtomicBool,
    reload_requested: AtomicBool,
    signal_count: AtomicU32,
}

impl SignalHandler {
    /// Create a handler and register the process signal handlers.
    pub fn new() -> std::io::Result<Self> {
        #[cfg(unix)]
        register_unix_handlers()?;

        Ok(Self::default())
    }

    /// Move pending process signals into this handler.
    pub fn poll(&self) {
        if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
            self.record(SignalKind::Shutdown);
        }
        if RELOAD_FLAG.swap(false, Ordering::Relaxed) {
            self.record(SignalKind::Reload);
        }
    }

    fn record(&self, kind: SignalKind) {
        info!(signal = %kind, "Signal received");
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        match kind {
            SignalKind::Shutdown => self.request_shutdown(),
            SignalKind::Reload => self.reload_requested.store(true, Ordering::Relaxed),
        }
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Whether a reload has been requested (clears the flag).
    #[inline]
    pub fn take_reload_request(&self) -> bool {
        self.reload_requested.swap(false, Ordering::Relaxed)
    }

    /// Request shutdown from inside the process.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    /// Number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_shutdown(_: c_int) {
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    extern "C" fn on_reload(_: c_int) {
        RELOAD_FLAG.store(true, Ordering::Relaxed);
    }

    let handlers: [(c_int, extern "C" fn(c_int)); 3] = [
        (libc::SIGTERM, on_shutdown),
        (libc::SIGINT, on_shutdown),
        (libc::SIGHUP, on_reload),
    ];

    for (signal, handler) in handlers {
        // SAFETY: the handlers only store into static atomics, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("Unix signal handlers registered");
    Ok(())
}
