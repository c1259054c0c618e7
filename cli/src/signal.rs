//! Ctrl+C handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once Ctrl+C has been pressed.
#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    flag: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a flag and register the Ctrl+C handler that sets it.
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let handler_flag = Arc::clone(&flag);

        if let Err(e) = ctrlc::set_handler(move || {
            handler_flag.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
        }

        Self { flag }
    }

    /// A flag without a signal handler.
    #[cfg(test)]
    pub fn manual() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_flag() {
        let flag = ShutdownFlag::manual();
        let clone = flag.clone();
        assert!(!flag.should_stop());

        clone.trigger();
        assert!(flag.should_stop());
    }
}
