//! Process-wide engine lock.
//!
//! The engine is single-threaded and not reentrant from the compatibility
//! surface. Every locked entry point holds an [`EngineGuard`] for its whole
//! duration; the guard releases on drop, including on unwinding and on `?`
//! early returns. Acquiring again from the thread that already holds the lock
//! fails with [`JscError::Reentrant`] instead of deadlocking.

use std::cell::Cell;
use std::marker::PhantomData;

use parking_lot::{Mutex, MutexGuard, const_mutex};

use crate::error::JscError;

static ENGINE: Mutex<()> = const_mutex(());

thread_local! {
    static HELD: Cell<bool> = const { Cell::new(false) };
}

/// Scoped ownership of the engine lock.
pub struct EngineGuard {
    _inner: MutexGuard<'static, ()>,
    // The held flag is per thread, so the guard must stay on its thread.
    _not_send: PhantomData<*const ()>,
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        HELD.with(|held| held.set(false));
    }
}

pub struct EngineLock;

impl EngineLock {
    /// Acquire the lock, blocking while another thread holds it.
    pub fn acquire() -> Result<EngineGuard, JscError> {
        if Self::is_held() {
            return Err(JscError::Reentrant);
        }
        let inner = ENGINE.lock();
        HELD.with(|held| held.set(true));
        Ok(EngineGuard {
            _inner: inner,
            _not_send: PhantomData,
        })
    }

    /// Acquire the lock unless this thread already holds it.
    ///
    /// Used by drop paths that may run either inside or outside a locked
    /// operation.
    pub(crate) fn hold() -> Option<EngineGuard> {
        Self::acquire().ok()
    }

    pub fn is_held() -> bool {
        HELD.with(|held| held.get())
    }
}
