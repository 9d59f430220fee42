//! Single-slot debounce timer.
//!
//! The first `schedule` runs its task inline; every later call aborts the
//! pending timer (if any) and arms a new one, so a burst of calls collapses
//! into a single run after the last one.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
pub(crate) struct Debouncer {
    state: Mutex<DebounceState>,
}

#[derive(Default)]
struct DebounceState {
    fired_once: bool,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `task` now (first call) or after `delay` of quiet.
    ///
    /// Outside a tokio runtime there is nothing to arm a timer on, so the
    /// task runs inline.
    pub(crate) fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if !state.fired_once {
            state.fired_once = true;
            drop(state);
            task();
            return;
        }

        if let Some(handle) = state.pending.take() {
            handle.abort();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                state.pending = Some(rt.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task();
                }));
            }
            Err(_) => {
                drop(state);
                task();
            }
        }
    }

    /// Abort the pending timer. Returns whether one was armed and unfinished.
    pub(crate) fn cancel(&self) -> bool {
        match self.state.lock().pending.take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }
}
