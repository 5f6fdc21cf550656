//! Single-flight slot preventing concurrent sessions

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use tracing::{debug, info};

/// Capacity-1 slot held for the duration of a session
///
/// Callers block until the slot is free. A session that panicked while
/// holding the slot does not wedge later sessions.
#[derive(Debug, Default)]
pub struct SessionSlot {
    inner: Mutex<()>,
}

/// Held while a session runs; releases the slot on drop
pub struct SessionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    name: String,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot and hold it
    pub fn acquire(&self, name: &str) -> SessionGuard<'_> {
        debug!(restic = %name, "Waiting for session slot");
        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        info!(restic = %name, "Acquired session slot");
        SessionGuard {
            _guard: guard,
            name: name.to_string(),
        }
    }

    /// Take the slot only if it is free
    pub fn try_acquire(&self, name: &str) -> Option<SessionGuard<'_>> {
        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(SessionGuard {
            _guard: guard,
            name: name.to_string(),
        })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.inner.try_lock(), Err(TryLockError::WouldBlock))
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        info!(restic = %self.name, "Released session slot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_slot_acquire_and_release() {
        let slot = SessionSlot::new();

        let guard = slot.acquire("stash-demo");
        assert!(slot.is_busy());
        assert!(slot.try_acquire("stash-demo").is_none());

        drop(guard);

        assert!(!slot.is_busy());
        assert!(slot.try_acquire("stash-demo").is_some());
    }

    #[test]
    fn test_slot_serializes_sessions() {
        let slot = Arc::new(SessionSlot::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    let _guard = slot.acquire("stash-demo");
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slot_survives_panicked_session() {
        let slot = Arc::new(SessionSlot::new());
        let cloned = Arc::clone(&slot);
        let _ = thread::spawn(move || {
            let _guard = cloned.acquire("stash-demo");
            panic!("session crashed");
        })
        .join();

        assert!(slot.try_acquire("stash-demo").is_some());
    }
}
