//! Process-wide throttle flag shared by every scan backend instance.
//!
//! An explicitly constructed struct, built once at startup and handed to
//! every [`crate::EtherscanBackend`] via `Arc`, so the "we are currently
//! being throttled" signal stays per-process rather than per-backend-instance
//! — the point is to make concurrent callers back off together, not to
//! isolate them.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct ScanBackendGlobal {
    in_retry: AtomicBool,
}

impl ScanBackendGlobal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_throttled(&self) -> bool {
        self.in_retry.load(Ordering::Relaxed)
    }

    pub fn set_throttled(&self, value: bool) {
        self.in_retry.store(value, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_throttled() {
        let g = ScanBackendGlobal::new();
        assert!(!g.is_throttled());
    }

    #[test]
    fn can_flip_and_clear() {
        let g = ScanBackendGlobal::new();
        g.set_throttled(true);
        assert!(g.is_throttled());
        g.set_throttled(false);
        assert!(!g.is_throttled());
    }
}
