//! Single-flight guard for drain passes.
//!
//! At most one drain pass runs per engine. The pass holds a [`DrainGuard`]
//! for its whole duration; the in-progress flag is released when the guard
//! is dropped, including on early return or panic.

use std::sync::atomic::{AtomicBool, Ordering};

/// RAII claim on a drain-in-progress flag.
///
/// # Example
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use larder_core::DrainGuard;
///
/// let flag = AtomicBool::new(false);
/// let guard = DrainGuard::try_acquire(&flag).expect("flag is free");
/// assert!(DrainGuard::try_acquire(&flag).is_none());
/// drop(guard);
/// assert!(DrainGuard::try_acquire(&flag).is_some());
/// ```
#[derive(Debug)]
pub struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    /// Claim the flag, or return `None` if another pass holds it.
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = DrainGuard::try_acquire(&flag).unwrap();
            assert!(flag.load(Ordering::Acquire));
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let flag = AtomicBool::new(false);
        let result = std::panic::catch_unwind(|| {
            let _guard = DrainGuard::try_acquire(&flag).unwrap();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }
}
