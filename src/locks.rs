use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    /// Holder plus waiters, including waiters that may still be cancelled.
    users: usize,
}

type Slots = HashMap<String, Slot>;

/// Single-writer locks keyed by upload id.
///
/// Entries are created on first use and dropped again once the last holder or
/// waiter for that id is gone, so the map only ever holds ids with writes in
/// flight.
#[derive(Debug, Default, Clone)]
pub struct UploadLocks {
    slots: Arc<Mutex<Slots>>,
}

/// Counts one user of a slot; dropping it, whether after holding the lock or
/// while still waiting for it, releases the count.
#[derive(Debug)]
struct Registration {
    file_id: String,
    slots: Arc<Mutex<Slots>>,
}

/// Held for the duration of one mutation of an upload.
#[derive(Debug)]
pub struct UploadGuard {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl UploadLocks {
    pub fn new() -> Self {
        Default::default()
    }

    /// Waits until no other writer holds `file_id`.
    pub async fn lock(&self, file_id: &str) -> UploadGuard {
        let (mutex, registration) = {
            let mut slots = lock_slots(&self.slots);
            let slot = slots.entry(file_id.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;

            let registration = Registration {
                file_id: file_id.to_string(),
                slots: Arc::clone(&self.slots),
            };
            (Arc::clone(&slot.mutex), registration)
        };

        UploadGuard {
            _guard: mutex.lock_owned().await,
            _registration: registration,
        }
    }

    /// Number of ids with a holder or waiter.
    pub fn active(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        if let Some(slot) = slots.get_mut(&self.file_id) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&self.file_id);
            }
        }
    }
}
