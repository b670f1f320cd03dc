//! Per-device exclusivity for mutating sessions.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Set of devices with a mutating session in progress.
///
/// Holders block in [`DeviceLocks::acquire`] until the device is free.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    busy: Mutex<HashSet<String>>,
    released: Condvar,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn busy(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set is only touched under short, non-panicking sections.
        self.busy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until `device` is free, then hold it until the guard drops.
    pub fn acquire(&self, device: &str) -> DeviceLockGuard<'_> {
        let mut busy = self.busy();
        while busy.contains(device) {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(|e| e.into_inner());
        }
        busy.insert(device.to_string());
        DeviceLockGuard {
            locks: self,
            device: device.to_string(),
        }
    }

    pub fn is_locked(&self, device: &str) -> bool {
        self.busy().contains(device)
    }
}

/// Releases the device on drop.
#[derive(Debug)]
pub struct DeviceLockGuard<'a> {
    locks: &'a DeviceLocks,
    device: String,
}

impl Drop for DeviceLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.busy().remove(&self.device);
        self.locks.released.notify_all();
    }
}
