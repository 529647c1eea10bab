use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Sink for human-readable status lines. Implementations must not fail or panic.
pub trait Progress {
    fn report(&self, message: &str);
}

impl<F: Fn(&str)> Progress for F {
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Forwards progress lines to the `info` log.
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&self, message: &str) {
        info!(target: "pdf_zipper::progress", "{message}");
    }
}

pub struct Silent;

impl Progress for Silent {
    fn report(&self, _message: &str) {}
}

/// Shared abort flag. Cheap to clone; every clone observes the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
