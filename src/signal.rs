use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::{ProbeError, Result};

/// One-shot rendezvous between a completion worker and a waiting caller.
///
/// The signal carries no value. Whatever the worker produced is stored next
/// to the signal and read after [`CompletionSignal::wait`] returns.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal as fired and wake every waiter. Idempotent.
    pub fn signal(&self) {
        let mut fired = self.recover();
        if !*fired {
            *fired = true;
            self.cond.notify_all();
        }
    }

    /// Re-arm the signal for reuse.
    pub fn reset(&self) {
        *self.recover() = false;
    }

    pub fn is_signaled(&self) -> bool {
        *self.recover()
    }

    /// Block until the signal fires. Returns at once if it already has.
    pub fn wait(&self) -> Result<()> {
        let mut fired = self.lock()?;
        while !*fired {
            fired = self
                .cond
                .wait(fired)
                .map_err(|err| ProbeError::WaitFailed(err.to_string()))?;
        }
        Ok(())
    }

    /// Block until the signal fires or `timeout` elapses.
    /// Returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut fired = self.lock()?;
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self
                .cond
                .wait_timeout(fired, deadline - now)
                .map_err(|err| ProbeError::WaitFailed(err.to_string()))?;
            fired = guard;
        }
        Ok(true)
    }

    /// The flag is a plain bool, so a poisoned lock still holds a valid one.
    fn recover(&self) -> MutexGuard<'_, bool> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, bool>> {
        self.fired
            .lock()
            .map_err(|err| ProbeError::WaitFailed(err.to_string()))
    }
}
