//! Lock wrappers that own the data they guard.
//!
//! Poisoning is recovered rather than propagated: a panic on another thread
//! never turns a table lookup into a second panic.

use std::ops::{Deref, DerefMut};
use std::sync::{self, PoisonError};
use std::time::Duration;

pub struct Mutex<T> {
    inner: sync::Mutex<T>,
}

pub struct MutexGuard<'a, T> {
    guard: sync::MutexGuard<'a, T>,
}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: sync::Mutex::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard {
            guard: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

pub struct RwLock<T> {
    inner: sync::RwLock<T>,
}

pub struct ReadGuard<'a, T> {
    guard: sync::RwLockReadGuard<'a, T>,
}

pub struct WriteGuard<'a, T> {
    guard: sync::RwLockWriteGuard<'a, T>,
}

impl<T> RwLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: sync::RwLock::new(data),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        ReadGuard {
            guard: self.inner.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn write(&self) -> WriteGuard<'_, T> {
        WriteGuard {
            guard: self.inner.write().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Condition variable paired with [`Mutex`].
#[derive(Default)]
pub struct Cond {
    inner: sync::Condvar,
}

impl Cond {
    pub const fn new() -> Self {
        Self {
            inner: sync::Condvar::new(),
        }
    }

    pub fn signal(&self) {
        self.inner.notify_one();
    }

    pub fn broadcast(&self) {
        self.inner.notify_all();
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        MutexGuard {
            guard: self
                .inner
                .wait(guard.guard)
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Wait at most `timeout`. The flag is `true` if the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let (guard, result) = self
            .inner
            .wait_timeout(guard.guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        (MutexGuard { guard }, result.timed_out())
    }

    /// Wait until the realtime clock reaches `deadline` (nanoseconds since
    /// the Unix epoch). Spurious wakeups are absorbed.
    pub fn wait_until_realtime<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        deadline: u64,
    ) -> MutexGuard<'a, T> {
        loop {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
                .unwrap_or(0);
            if now >= deadline {
                return guard;
            }
            let (next, timed_out) =
                self.wait_timeout(guard, Duration::from_nanos(deadline - now));
            guard = next;
            if timed_out {
                return guard;
            }
        }
    }
}
