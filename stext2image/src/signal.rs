//! Cooperative cancellation of long-running loops.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// A shared stop flag.
///
/// Clones observe the same flag. The training and completion loops check it at
/// every step boundary and finish the current step before returning.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = StopSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_requested());

        handle.request_stop();
        assert!(signal.is_requested());
    }
}
