//! # One-Shot Completion
//!
//! A [`Completer`] travels with the request to the simulation thread; the
//! matching [`Pending`] stays with the producer. The first resolution wins,
//! later ones are dropped. A completer dropped without resolving resolves
//! its pending side with [`RequestError::Disconnected`], so a wait never
//! hangs once the simulation loop is gone.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::RequestError;

struct CompletionSignal<T> {
    slot: Mutex<Option<Result<T, RequestError>>>,
    condvar: Condvar,
}

impl<T> CompletionSignal<T> {
    /// Stores the result unless one is already there. Returns true if stored.
    fn signal(&self, result: Result<T, RequestError>) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        self.condvar.notify_all();
        true
    }
}

/// Creates a connected completer/pending pair.
#[must_use]
pub fn completion<T>() -> (Completer<T>, Pending<T>) {
    let signal = Arc::new(CompletionSignal {
        slot: Mutex::new(None),
        condvar: Condvar::new(),
    });
    (
        Completer {
            signal: Arc::clone(&signal),
        },
        Pending { signal },
    )
}

/// Resolving side of a request.
pub struct Completer<T> {
    signal: Arc<CompletionSignal<T>>,
}

impl<T> Completer<T> {
    /// Resolves the request. Returns false if it was already resolved.
    pub fn complete(&self, result: Result<T, RequestError>) -> bool {
        self.signal.signal(result)
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        self.signal.signal(Err(RequestError::Disconnected));
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("resolved", &self.signal.slot.lock().is_some())
            .finish()
    }
}

/// Waiting side of a request.
pub struct Pending<T> {
    signal: Arc<CompletionSignal<T>>,
}

impl<T> Pending<T> {
    /// Blocks until the request is resolved.
    pub fn wait(self) -> Result<T, RequestError> {
        let mut slot = self.signal.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.signal.condvar.wait(&mut slot);
        }
    }

    /// Blocks for at most `timeout`. Gives the handle back on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<T, RequestError>, Self> {
        let mut slot = self.signal.slot.lock();
        if slot.is_none() {
            let _ = self
                .signal
                .condvar
                .wait_while_for(&mut slot, |slot| slot.is_none(), timeout);
        }
        match slot.take() {
            Some(result) => Ok(result),
            None => {
                drop(slot);
                Err(self)
            }
        }
    }

    /// Returns true once the request has been resolved.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.slot.lock().is_some()
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").field("done", &self.is_done()).finish()
    }
}
