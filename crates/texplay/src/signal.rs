use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Slot = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`Signal::connect`], used to disconnect later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection(u64);

/// Zero-argument multi-subscriber notification. Emitting with no subscribers does nothing
/// and nothing is queued for subscribers that connect later.
#[derive(Default)]
pub struct Signal {
    slots: Mutex<Vec<(u64, Slot)>>,
    next_id: AtomicU64,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, slot: impl Fn() + Send + Sync + 'static) -> Connection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(slot)));
        Connection(id)
    }

    pub fn disconnect(&self, connection: Connection) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|(id, _)| *id != connection.0);
        slots.len() != before
    }

    /// Calls every connected slot. Slots run outside the internal lock so they may
    /// connect or disconnect.
    pub fn emit(&self) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, slot)| slot.clone())
            .collect();
        for slot in slots {
            slot();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
