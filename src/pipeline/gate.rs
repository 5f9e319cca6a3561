use std::sync::{Mutex, MutexGuard};

/// Serializes every sink delivery against shutdown.
///
/// `publish` runs its closure only while the gate is open and holds the gate for the
/// duration. `close` waits for a running delivery to finish, so once it returns nothing
/// further reaches any sink.
pub struct PublishGate {
    open: Mutex<bool>,
}

impl PublishGate {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn publish<R>(&self, deliver: impl FnOnce() -> R) -> Option<R> {
        let open = self.lock();
        if !*open {
            return None;
        }
        let out = deliver();
        drop(open);
        Some(out)
    }

    pub fn close(&self) {
        *self.lock() = false;
    }

    pub fn is_open(&self) -> bool {
        *self.lock()
    }
}

impl Default for PublishGate {
    fn default() -> Self {
        Self::new()
    }
}
