//! Owner-liveness flag for detached continuations.
//!
//! An [`AliveGuard`] lives inside its owner and flips a shared flag to
//! false when the owner is dropped. Continuations that may outlive the
//! owner (spawned call subtasks, native-callback closures) capture an
//! [`AliveFlag`] and bail out before touching owner state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The owning side. Construct one per instance whose death continuations
/// must observe; dropping it clears the flag.
#[derive(Debug)]
pub struct AliveGuard {
    flag: Arc<AtomicBool>,
}

impl AliveGuard {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A checkable handle for continuations.
    pub fn flag(&self) -> AliveFlag {
        AliveFlag {
            flag: Arc::clone(&self.flag),
        }
    }
}

impl Default for AliveGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The observing side. `true` until the owning [`AliveGuard`] is dropped.
#[derive(Debug, Clone)]
pub struct AliveFlag {
    flag: Arc<AtomicBool>,
}

impl AliveFlag {
    pub fn is_alive(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_follows_guard_lifetime() {
        let guard = AliveGuard::new();
        let flag = guard.flag();
        let second = flag.clone();
        assert!(flag.is_alive());
        assert!(second.is_alive());

        drop(guard);
        assert!(!flag.is_alive());
        assert!(!second.is_alive());
    }
}
