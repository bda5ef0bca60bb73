use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::types::{Fields, PeripheralId, SessionPhase, SessionStatus, Snapshot};

#[derive(Debug, Default)]
struct Slot {
    snapshot: Snapshot,
    status: SessionStatus,
}

/// Last known value of every peripheral, shared between the bluetooth thread and the consumer.
///
/// All slots sit behind one mutex; every operation holds it only for a copy or a small
/// in-place update, so a reader never sees half of an update.
#[derive(Debug, Clone)]
pub struct StateStore {
    slots: Arc<Mutex<Vec<Slot>>>,
}

impl StateStore {
    pub fn new(peripheral_count: usize) -> Self {
        let slots = (0..peripheral_count).map(|_| Slot::default()).collect();
        StateStore { slots: Arc::new(Mutex::new(slots)) }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // a panic while holding the lock can not leave a slot half-written, every
        // mutation below is a plain field assignment
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_slot<R>(&self, id: PeripheralId, f: impl FnOnce(&mut Slot) -> R) -> Option<R> {
        let mut slots = self.lock();
        slots.get_mut(id.0).map(f)
    }

    pub fn set(&self, id: PeripheralId, fields: &Fields) {
        self.with_slot(id, |slot| {
            slot.snapshot.telemetry.apply(fields);
            slot.status.frames_decoded += 1;
        });
    }

    pub fn set_connected(&self, id: PeripheralId, connected: bool) {
        self.with_slot(id, |slot| slot.snapshot.connected = connected);
    }

    /// Returns the snapshot of `id`, or the default snapshot for an unknown peripheral.
    pub fn get(&self, id: PeripheralId) -> Snapshot {
        self.with_slot(id, |slot| slot.snapshot).unwrap_or_default()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().iter().map(|slot| slot.snapshot).collect()
    }

    pub fn status(&self, id: PeripheralId) -> Option<SessionStatus> {
        self.with_slot(id, |slot| slot.status.clone())
    }

    pub fn any_connected(&self) -> bool {
        self.lock().iter().any(|slot| slot.snapshot.connected)
    }

    /// Handle that can only write to the slot of `id`.
    pub fn writer(&self, id: PeripheralId) -> SlotWriter {
        SlotWriter { store: self.clone(), id }
    }

    fn enter_phase(&self, id: PeripheralId, phase: SessionPhase) -> Option<SessionPhase> {
        self.with_slot(id, |slot| {
            let previous = slot.status.phase;
            slot.status.phase = phase;
            slot.snapshot.connected = phase == SessionPhase::Subscribed;
            previous
        })
    }
}

/// The write side of a single slot, owned by that peripheral's session.
#[derive(Debug, Clone)]
pub struct SlotWriter {
    store: StateStore,
    id: PeripheralId,
}

impl SlotWriter {
    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub fn set(&self, fields: &Fields) {
        self.store.set(self.id, fields);
    }

    /// Records the new phase and derives `connected` from it under the same lock.
    /// Returns the phase that was left.
    pub fn enter_phase(&self, phase: SessionPhase) -> SessionPhase {
        self.store.enter_phase(self.id, phase).unwrap_or(phase)
    }

    pub fn record_dropped_frame(&self, error: &str) {
        self.store.with_slot(self.id, |slot| {
            slot.status.frames_dropped += 1;
            slot.status.last_error = Some(error.to_string());
        });
    }

    pub fn record_error(&self, error: &str) {
        self.store.with_slot(self.id, |slot| slot.status.last_error = Some(error.to_string()));
    }

    pub fn record_connect_attempt(&self) {
        self.store.with_slot(self.id, |slot| slot.status.connect_attempts += 1);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.get(self.id)
    }
}
