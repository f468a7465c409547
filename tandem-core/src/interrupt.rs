//! Per-thread interruption flags.
//!
//! Each thread owns one flag. Any thread holding an [`InterruptHandle`] may
//! raise it; only the owning thread observes and clears it, via [`take`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
}

/// Handle to one thread's interruption flag.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Raise the flag. The owning thread unwinds at its next poll checkpoint.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether the flag is currently raised.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Handle to the calling thread's flag.
#[must_use]
pub fn current() -> InterruptHandle {
    CURRENT.with(|flag| InterruptHandle { flag: flag.clone() })
}

/// Check and clear the calling thread's flag.
pub fn take() -> bool {
    CURRENT.with(|flag| flag.swap(false, Ordering::AcqRel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_clears_flag() {
        let handle = current();
        assert!(!take());

        handle.interrupt();
        assert!(handle.is_interrupted());
        assert!(take());
        assert!(!take());
    }

    #[test]
    fn test_flags_are_per_thread() {
        let handle = current();
        let other = std::thread::spawn(|| {
            let theirs = current();
            theirs.interrupt();
            take()
        })
        .join()
        .unwrap();

        assert!(other);
        assert!(!handle.is_interrupted());
    }

    #[test]
    fn test_interrupt_from_another_thread() {
        let handle = current();
        let remote = handle.clone();
        std::thread::spawn(move || remote.interrupt()).join().unwrap();
        assert!(take());
    }
}
