//! Fixed-capacity client slot table and the state shared between threads

use parking_lot::{Mutex, MutexGuard};

use crate::mixer::stats::MixerStats;

/// One logical playback channel
pub struct ClientSlot<S> {
    stream: Option<S>,
    peer: String,
    /// Gain from the most recent header
    pub gain: f32,
    /// Gain that belongs to the lagged (previous) buffer
    pub prev_gain: f32,
}

impl<S> ClientSlot<S> {
    fn empty() -> Self {
        Self {
            stream: None,
            peer: String::new(),
            gain: 0.0,
            prev_gain: 0.0,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Clear the handle, returning the stream for closing
    pub fn evict(&mut self) -> Option<S> {
        self.stream.take()
    }

    /// Shift the current gain into the lagged position and take `next`
    pub fn advance_gain(&mut self, next: f32) {
        self.prev_gain = self.gain;
        self.gain = next;
    }
}

/// Arena of N slots indexed by slot number
pub struct SlotTable<S> {
    slots: Vec<ClientSlot<S>>,
}

impl<S> SlotTable<S> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, ClientSlot::empty);
        Self { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_occupied())
    }

    /// Store `stream` in the first free slot. Gives the stream back when
    /// every slot is taken.
    pub fn insert(&mut self, stream: S, peer: String) -> Result<usize, S> {
        match self.slots.iter().position(|s| !s.is_occupied()) {
            Some(index) => {
                let slot = &mut self.slots[index];
                *slot = ClientSlot {
                    stream: Some(stream),
                    peer,
                    gain: 0.0,
                    prev_gain: 0.0,
                };
                Ok(index)
            }
            None => Err(stream),
        }
    }

    /// Clear the slot's handle, returning the stream for closing. Gain
    /// state is left for the final lagged mix; [`SlotTable::reset`] clears it.
    pub fn evict(&mut self, index: usize) -> Option<S> {
        self.slots.get_mut(index).and_then(ClientSlot::evict)
    }

    /// Forget all per-client state of an empty slot
    pub fn reset(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            if !slot.is_occupied() {
                *slot = ClientSlot::empty();
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&ClientSlot<S>> {
        self.slots.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ClientSlot<S>> {
        self.slots.get_mut(index)
    }
}

/// State shared by the acceptor and the mixing engine. Slot occupancy is
/// only ever read or written under `slots`' lock.
pub struct MixerState<S> {
    slots: Mutex<SlotTable<S>>,
    capacity: usize,
    stats: MixerStats,
}

impl<S> MixerState<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(SlotTable::new(capacity)),
            capacity,
            stats: MixerStats::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotTable<S>> {
        self.slots.lock()
    }

    pub fn stats(&self) -> &MixerStats {
        &self.stats
    }

    /// Fixed at construction; does not take the lock
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Publish a new connection. Holds the lock only for scan-and-store.
    pub fn register(&self, stream: S, peer: String) -> Result<usize, S> {
        let result = self.slots.lock().insert(stream, peer);
        match result {
            Ok(_) => self.stats.record_accepted(),
            Err(_) => self.stats.record_rejected(),
        }
        result
    }
}
