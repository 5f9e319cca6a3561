use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Capacity-1 hand-off where a new value replaces any undelivered one.
///
/// Used twice: capture → coordinator (so inference always sees the newest frame) and
/// coordinator → presentation (so the display never shows a backlog).
pub struct LatestSlot<T> {
    inner: Mutex<SlotState<T>>,
    ready: Condvar,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

pub enum Taken<T> {
    Value(T),
    Empty,
    Closed,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores `value`. Returns true when an undelivered value was overwritten.
    /// Values published after `close` are dropped.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let replaced = state.value.replace(value).is_some();
        drop(state);
        self.ready.notify_one();
        replaced
    }

    pub fn try_take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Waits up to `timeout` for a value. A pending value is still handed out after close.
    pub fn take_timeout(&self, timeout: Duration) -> Taken<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(value) = state.value.take() {
                return Taken::Value(value);
            }
            if state.closed {
                return Taken::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Taken::Empty;
            }
            state = match self.ready.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Closes the slot. With `discard` set, any undelivered value is dropped as well.
    pub fn close(&self, discard: bool) {
        let mut state = self.lock();
        state.closed = true;
        if discard {
            state.value = None;
        }
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
