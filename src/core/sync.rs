//! Lock helpers
//!
//! A panic on one caller thread must not wedge the decision path for every
//! other thread, so poisoned locks are recovered instead of unwrapped.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Acquire a mutex, recovering the guard if a previous holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_recovers_from_poison() {
        let shared = Arc::new(Mutex::new(1));
        let cloned = shared.clone();

        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(shared.is_poisoned());
        *lock(&shared) += 1;
        assert_eq!(*lock(&shared), 2);
    }
}
