// FILE: src\audio_engine\slot_store.rs
// ====================================

use std::sync::atomic::{AtomicI16, AtomicU32, Ordering};

/// Preallocated storage for one audio layer of a track: `slots` buffers of
/// `chunk` samples each.
///
/// Only the audio thread writes. The normalizer reads concurrently, which is
/// why samples are atomics rather than plain `i16`s (relaxed loads and stores
/// compile to ordinary moves).
///
/// A slot holds audio only while its stamp matches the store's generation.
/// Bumping the generation turns every slot back into silence in O(1), so
/// clearing or undoing a track never touches the sample memory on the audio
/// thread.
pub struct SlotStore {
    chunk: usize,
    samples: Box<[AtomicI16]>,
    stamps: Box<[AtomicU32]>,
    generation: AtomicU32,
}

impl SlotStore {
    pub fn new(slots: usize, chunk: usize) -> Self {
        Self {
            chunk,
            samples: (0..slots * chunk).map(|_| AtomicI16::new(0)).collect(),
            stamps: (0..slots).map(|_| AtomicU32::new(0)).collect(),
            generation: AtomicU32::new(1),
        }
    }

    pub fn slots(&self) -> usize {
        self.stamps.len()
    }

    pub fn chunk(&self) -> usize {
        self.chunk
    }

    pub fn is_live(&self, slot: usize) -> bool {
        self.stamps[slot].load(Ordering::Acquire) == self.generation.load(Ordering::Relaxed)
    }

    /// Raw samples of a live slot, `None` if it is silence.
    pub fn live_slot(&self, slot: usize) -> Option<&[AtomicI16]> {
        if self.is_live(slot) {
            Some(self.raw(slot))
        } else {
            None
        }
    }

    fn raw(&self, slot: usize) -> &[AtomicI16] {
        &self.samples[slot * self.chunk..(slot + 1) * self.chunk]
    }

    pub fn read_into(&self, slot: usize, out: &mut [i16]) {
        match self.live_slot(slot) {
            Some(raw) => {
                for (dst, src) in out.iter_mut().zip(raw) {
                    *dst = src.load(Ordering::Relaxed);
                }
            }
            None => out.fill(0),
        }
    }

    pub fn write(&self, slot: usize, data: &[i16]) {
        for (i, dst) in self.raw(slot).iter().enumerate() {
            dst.store(data.get(i).copied().unwrap_or(0), Ordering::Relaxed);
        }
        self.stamp(slot);
    }

    /// Read-modify-write of every sample in `slot`; a silent slot presents
    /// zeros to `f`. The slot is live afterwards.
    pub fn update(&self, slot: usize, mut f: impl FnMut(usize, i16) -> i16) {
        let live = self.is_live(slot);
        for (i, dst) in self.raw(slot).iter().enumerate() {
            let current = if live { dst.load(Ordering::Relaxed) } else { 0 };
            dst.store(f(i, current), Ordering::Relaxed);
        }
        self.stamp(slot);
    }

    pub fn invalidate_all(&self) {
        let next = self.generation.load(Ordering::Relaxed).wrapping_add(1);
        // stamp 0 marks never-written slots, keep it out of the cycle
        self.generation
            .store(if next == 0 { 1 } else { next }, Ordering::Release);
    }

    fn stamp(&self, slot: usize) {
        self.stamps[slot].store(self.generation.load(Ordering::Relaxed), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_is_silent() {
        let store = SlotStore::new(3, 2);
        let mut out = [7i16; 2];
        store.read_into(1, &mut out);
        assert_eq!(out, [0, 0]);
        assert!(store.live_slot(0).is_none());
    }

    #[test]
    fn test_invalidate_silences_previous_writes() {
        let store = SlotStore::new(2, 3);
        store.write(0, &[1, 2, 3]);
        assert!(store.is_live(0));

        store.invalidate_all();
        assert!(!store.is_live(0));

        // update on a silenced slot starts from zeros, not stale data
        store.update(0, |i, s| s + i as i16);
        let mut out = [0i16; 3];
        store.read_into(0, &mut out);
        assert_eq!(out, [0, 1, 2]);
    }

    #[test]
    fn test_short_write_pads_with_silence() {
        let store = SlotStore::new(1, 4);
        store.write(0, &[5, 6]);
        let mut out = [9i16; 4];
        store.read_into(0, &mut out);
        assert_eq!(out, [5, 6, 0, 0]);
    }
}
