//! The single lock that serializes every filesystem operation

use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

/// Mutex around the shared mount state
#[derive(Debug, Default)]
pub struct Gate<T> {
    inner: Mutex<T>,
}

impl<T> Gate<T> {
    pub fn new(state: T) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Block until the gate is free and hold it until the guard is unlocked
    /// or dropped
    pub fn enter(&self) -> GateGuard<'_, T> {
        GateGuard {
            guard: Some(self.inner.lock()),
        }
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }
}

/// Scope guard over the gate
///
/// `unlock` may be called any number of times; the lock is released once,
/// at the first call or on drop.
pub struct GateGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
}

impl<T> GateGuard<'_, T> {
    pub fn unlock(&mut self) {
        self.guard.take();
    }

    pub fn is_locked(&self) -> bool {
        self.guard.is_some()
    }
}

impl<T> Deref for GateGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => guard,
            None => panic!("gate state accessed after unlock"),
        }
    }
}

impl<T> DerefMut for GateGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.guard {
            Some(guard) => guard,
            None => panic!("gate state accessed after unlock"),
        }
    }
}
