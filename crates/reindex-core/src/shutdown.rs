//! Graceful shutdown support via an owned atomic flag

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shutdown flag shared by the CLI and the orchestrator runtime.
///
/// Worker lanes stop claiming jobs once it is set; a job already in hand
/// runs to completion.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag on SIGTERM/SIGINT. A second signal exits with code 130.
    pub fn register_signals(&self) -> io::Result<()> {
        use signal_hook::consts::{SIGINT, SIGTERM};
        for sig in [SIGTERM, SIGINT] {
            // Order matters: the conditional exit must see the flag before it is set
            signal_hook::flag::register_conditional_shutdown(sig, 130, Arc::clone(&self.flag))?;
            signal_hook::flag::register(sig, Arc::clone(&self.flag))?;
        }
        Ok(())
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
