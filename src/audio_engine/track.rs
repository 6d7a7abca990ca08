// FILE: src\audio_engine\track.rs
// ===============================

use super::slot_store::SlotStore;
use crate::looper::{SharedTrackState, TrackStatus};
use crate::sample_buffer::{ramp_down, scale, SampleBuffer};
use crate::settings::LoopConfig;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Existing audio is attenuated by this much every time a new layer is folded in.
const MAIN_DECAY: f32 = 0.9;
/// Applied to `dub_ratio` on each loop restart while still recording.
const DUB_RATIO_DECAY: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Capacity reached. The recording was discarded and `length` is 0.
    Overflow,
    /// The track already has a fixed length.
    Ignored,
}

/// One loop track. `main` holds committed audio, `overdub` only the most
/// recent overdub layer so that it can be undone.
pub struct Track {
    config: LoopConfig,
    main: Arc<SlotStore>,
    overdub: Arc<SlotStore>,
    length: usize,
    read_ptr: usize,
    write_ptr: usize,
    initialized: bool,
    playing: bool,
    recording: bool,
    waiting: bool,
    preceding_buffer: SampleBuffer,
    dub_ratio: f32,
    last_buffer_recorded: usize,
    pub shared_state: SharedTrackState,
}

impl Track {
    pub fn new(config: LoopConfig, shared_state: SharedTrackState) -> Self {
        Self {
            config,
            main: Arc::new(SlotStore::new(config.max_length, config.chunk)),
            overdub: Arc::new(SlotStore::new(config.max_length, config.chunk)),
            length: 0,
            read_ptr: 0,
            write_ptr: 0,
            initialized: false,
            playing: false,
            recording: false,
            waiting: false,
            preceding_buffer: SampleBuffer::silence(config.chunk),
            dub_ratio: 1.0,
            last_buffer_recorded: 0,
            shared_state,
        }
    }

    pub fn layers(&self) -> [Arc<SlotStore>; 2] {
        [self.main.clone(), self.overdub.clone()]
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn read_ptr(&self) -> usize {
        self.read_ptr
    }

    pub fn write_ptr(&self) -> usize {
        self.write_ptr
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn dub_ratio(&self) -> f32 {
        self.dub_ratio
    }

    pub fn last_buffer_recorded(&self) -> usize {
        self.last_buffer_recorded
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            initialized: self.initialized,
            playing: self.playing,
            recording: self.recording,
            waiting: self.waiting,
            read_ptr: self.read_ptr,
            length: self.length,
        }
    }

    pub fn publish(&self) {
        self.shared_state.publish(self.status());
    }

    /// Appends a buffer to a track that has no fixed length yet.
    pub fn append(&mut self, data: &SampleBuffer) -> AppendOutcome {
        if self.initialized {
            return AppendOutcome::Ignored;
        }
        if self.length >= self.config.max_length.saturating_sub(1) {
            self.length = 0;
            self.main.invalidate_all();
            return AppendOutcome::Overflow;
        }
        self.main.write(self.length, data.as_slice());
        self.length += 1;
        AppendOutcome::Appended
    }

    /// Fixes the loop length to a multiple of `master_length`, crossfades the
    /// seam and places the pointers. Does nothing on an initialized track or
    /// one with nothing recorded.
    pub fn initialize(&mut self, master_length: usize) {
        if self.initialized || self.length == 0 || master_length == 0 {
            return;
        }
        let raw_length = self.length;
        self.length = quantized_length(
            raw_length,
            master_length,
            self.config.overshoot,
            self.config.max_length,
        );

        // keep the write position in phase with the master: the next
        // buffer lands where the raw recording would have continued
        self.write_ptr = (raw_length - 1) % self.length;
        // overshoot past the loop end is dropped, the seam is the last slot kept
        self.last_buffer_recorded = (raw_length - 1).min(self.length - 1);

        let chunk = self.config.chunk;
        self.main
            .update(self.last_buffer_recorded, |i, s| scale(s, ramp_down(i, chunk)));
        self.preceding_buffer.fade_in();
        let lead_in = self.preceding_buffer.as_slice();
        self.main
            .update(self.length - 1, |i, s| s.saturating_add(lead_in[i]));

        // reading ahead of writing compensates for input + output latency
        self.read_ptr = (self.write_ptr + self.config.latency) % self.length;
        self.initialized = true;
        self.playing = true;
        self.advance_pointers();
    }

    pub fn advance_pointers(&mut self) {
        if self.length == 0 {
            return;
        }
        if self.read_ptr == self.length - 1 {
            self.read_ptr = 0;
            if self.recording {
                self.dub_ratio *= DUB_RATIO_DECAY;
            }
        } else {
            self.read_ptr += 1;
        }
        self.write_ptr = (self.write_ptr + 1) % self.length;
    }

    /// Fills `out` with this period's audio. Muted tracks output silence but
    /// keep moving so they stay in sync.
    pub fn read(&mut self, out: &mut SampleBuffer) {
        if !self.initialized {
            out.fill_silence();
            return;
        }
        if !self.playing {
            self.advance_pointers();
            out.fill_silence();
            return;
        }
        let slot = self.read_ptr;
        self.advance_pointers();
        self.main.read_into(slot, out.as_mut_slice());
        if let Some(layer) = self.overdub.live_slot(slot) {
            for (dst, src) in out.as_mut_slice().iter_mut().zip(layer) {
                *dst = dst.saturating_add(src.load(Ordering::Relaxed));
            }
        }
    }

    /// Bakes the pending overdub layer at `write_ptr` into `main`, then
    /// replaces it with `incoming`. With no pending layer there is nothing to
    /// fold and `main` is left as it is.
    pub fn dub(&mut self, incoming: &SampleBuffer) {
        if !self.initialized {
            return;
        }
        let slot = self.write_ptr;
        let ratio = self.dub_ratio;
        if let Some(layer) = self.overdub.live_slot(slot) {
            self.main.update(slot, |i, s| {
                let dubbed = layer[i].load(Ordering::Relaxed);
                (s as f32 * MAIN_DECAY + dubbed as f32 * ratio) as i16
            });
        }
        self.overdub.write(slot, incoming.as_slice());
    }

    pub fn toggle_mute(&mut self) {
        self.playing = !self.playing;
    }

    pub fn is_restarting(&self) -> bool {
        self.initialized && self.read_ptr == 0
    }

    pub fn clear(&mut self) {
        self.main.invalidate_all();
        self.overdub.invalidate_all();
        self.length = 0;
        self.read_ptr = 0;
        self.write_ptr = 0;
        self.initialized = false;
        self.playing = false;
        self.recording = false;
        self.waiting = false;
        self.preceding_buffer.fill_silence();
        self.dub_ratio = 1.0;
        self.last_buffer_recorded = 0;
    }

    /// Drops the most recent overdub layer. Layers already folded into
    /// `main` stay.
    pub fn undo(&mut self) {
        self.overdub.invalidate_all();
        self.recording = false;
        self.waiting = false;
    }

    /// Undo while audible, full clear while muted.
    pub fn clear_or_undo(&mut self) {
        if self.playing {
            self.undo();
        } else {
            self.clear();
        }
    }

    pub fn start_recording(&mut self, previous_buffer: &SampleBuffer) {
        self.recording = true;
        self.waiting = false;
        self.preceding_buffer.copy_from(previous_buffer.as_slice());
    }

    /// Stops immediately if recording (fixing the length on a first pass),
    /// otherwise arms the track for the next loop restart.
    pub fn set_recording(&mut self, master_length: usize) {
        let already_recording = self.recording;
        if self.recording && !self.initialized {
            self.initialize(master_length);
        }
        self.recording = false;
        self.waiting = false;
        if !already_recording {
            self.waiting = true;
        }
    }
}

/// `floor((raw - overshoot) / master) + 1` multiples of the master length,
/// at least one and never more than fits in `max_length`.
pub fn quantized_length(
    raw_length: usize,
    master_length: usize,
    overshoot: usize,
    max_length: usize,
) -> usize {
    let quotient = (raw_length as i64 - overshoot as i64).div_euclid(master_length as i64);
    let factor = (quotient + 1).max(1) as usize;
    let max_factor = (max_length / master_length).max(1);
    factor.min(max_factor) * master_length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LoopConfig {
        LoopConfig {
            sample_rate: 8000,
            chunk: 4,
            latency: 0,
            overshoot: 5,
            max_length: 512,
        }
    }

    fn new_track(config: LoopConfig) -> Track {
        Track::new(config, SharedTrackState::new())
    }

    fn buf(value: i16) -> SampleBuffer {
        SampleBuffer::from_samples(vec![value; 4])
    }

    fn record(track: &mut Track, buffers: usize, value: i16) {
        for _ in 0..buffers {
            assert_eq!(track.append(&buf(value)), AppendOutcome::Appended);
        }
    }

    fn main_slot(track: &Track, slot: usize) -> Vec<i16> {
        let mut out = vec![0; track.config.chunk];
        track.main.read_into(slot, &mut out);
        out
    }

    #[test]
    fn test_master_and_second_track_quantization() {
        let mut master = new_track(config());
        master.start_recording(&buf(0));
        record(&mut master, 100, 10);
        master.set_recording(100);
        assert!(master.is_initialized());
        assert!(!master.is_recording());
        assert!(!master.is_waiting());
        assert_eq!(master.length(), 100);

        let mut second = new_track(config());
        second.start_recording(&buf(0));
        record(&mut second, 130, 10);
        second.set_recording(master.length());
        // floor((130 - 5) / 100) + 1 = 2
        assert_eq!(second.length(), 200);
    }

    #[test]
    fn test_quantized_length_is_a_positive_multiple() {
        for raw in 1..300 {
            let length = quantized_length(raw, 37, 5, 512);
            assert!(length > 0);
            assert_eq!(length % 37, 0);
        }
        // stopping within the overshoot allowance stays in the same loop
        assert_eq!(quantized_length(104, 100, 5, 512), 100);
        assert_eq!(quantized_length(105, 100, 5, 512), 200);
        // never more than the storage holds
        assert_eq!(quantized_length(510, 100, 5, 512), 500);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut track = new_track(config());
        record(&mut track, 10, 100);
        track.initialize(10);
        let status = track.status();
        let write_ptr = track.write_ptr();
        let seam = main_slot(&track, 9);

        track.initialize(10);
        assert_eq!(track.status(), status);
        assert_eq!(track.write_ptr(), write_ptr);
        assert_eq!(main_slot(&track, 9), seam);
    }

    #[test]
    fn test_initialize_without_audio_does_nothing() {
        let mut track = new_track(config());
        track.initialize(10);
        assert!(!track.is_initialized());
        assert_eq!(track.length(), 0);
    }

    #[test]
    fn test_crossfade_at_seam() {
        let mut track = new_track(config());
        track.start_recording(&buf(2000));
        record(&mut track, 4, 1000);
        track.set_recording(4);

        // fade-out of the last buffer plus fade-in of the lead-in buffer
        assert_eq!(main_slot(&track, 3), vec![1000, 1332, 1666, 2000]);
        assert_eq!(main_slot(&track, 0), vec![1000; 4]);
    }

    #[test]
    fn test_overshoot_seam_stays_inside_loop() {
        let mut track = new_track(config());
        track.start_recording(&buf(2000));
        record(&mut track, 6, 1000);
        // 6 raw buffers over a 4-buffer master, within the overshoot
        track.initialize(4);
        assert_eq!(track.length(), 4);
        assert_eq!(track.last_buffer_recorded(), 3);
        assert_eq!(main_slot(&track, 3), vec![1000, 1332, 1666, 2000]);
        // next write continues the raw recording's phase: slot 6 % 4, then one advance
        assert_eq!(track.write_ptr(), 2);
    }

    #[test]
    fn test_read_leads_write_by_latency() {
        let mut track = new_track(LoopConfig {
            latency: 2,
            ..config()
        });
        record(&mut track, 10, 1);
        track.initialize(10);
        assert_eq!(track.write_ptr(), 0);
        assert_eq!(track.read_ptr(), 2);

        let mut out = buf(0);
        for _ in 0..25 {
            track.read(&mut out);
            assert_eq!((track.read_ptr() + 10 - track.write_ptr()) % 10, 2);
        }
    }

    #[test]
    fn test_write_pointer_keeps_phase_of_raw_recording() {
        let mut track = new_track(config());
        record(&mut track, 130, 1);
        track.initialize(100);
        assert_eq!(track.last_buffer_recorded(), 129);
        assert_eq!(track.write_ptr(), 130);
        assert_eq!(track.read_ptr(), 130);
    }

    #[test]
    fn test_muted_track_stays_in_sync() {
        let mut audible = new_track(config());
        let mut muted = new_track(config());
        record(&mut audible, 10, 500);
        record(&mut muted, 10, 500);
        audible.initialize(10);
        muted.initialize(10);
        muted.toggle_mute();

        let mut a = buf(0);
        let mut m = buf(0);
        for _ in 0..25 {
            audible.read(&mut a);
            muted.read(&mut m);
            assert!(m.is_silent());
            assert_eq!(audible.read_ptr(), muted.read_ptr());
            assert_eq!(audible.write_ptr(), muted.write_ptr());
        }

        muted.toggle_mute();
        audible.read(&mut a);
        muted.read(&mut m);
        assert_eq!(a, m);
    }

    #[test]
    fn test_uninitialized_read_is_silent_and_still() {
        let mut track = new_track(config());
        record(&mut track, 3, 100);
        let mut out = buf(9);
        track.read(&mut out);
        assert!(out.is_silent());
        assert_eq!(track.read_ptr(), 0);
    }

    #[test]
    fn test_dub_ratio_decays_once_per_restart_while_recording() {
        let mut track = new_track(config());
        record(&mut track, 10, 100);
        track.initialize(10);
        assert_eq!(track.read_ptr(), 0);

        let mut out = buf(0);
        for _ in 0..10 {
            track.read(&mut out);
        }
        assert_eq!(track.dub_ratio(), 1.0);

        track.start_recording(&buf(0));
        let mut expected = 1.0f32;
        let mut previous = track.dub_ratio();
        for _ in 0..30 {
            let wraps = track.read_ptr() == track.length() - 1;
            track.dub(&buf(50));
            track.read(&mut out);
            if wraps {
                expected *= 0.9;
            }
            assert!(track.dub_ratio() <= previous);
            assert_eq!(track.dub_ratio(), expected);
            previous = track.dub_ratio();
        }
        assert!((track.dub_ratio() - 0.729).abs() < 1e-6);
    }

    #[test]
    fn test_undo_after_single_dub_restores_main() {
        let mut track = new_track(config());
        record(&mut track, 10, 1000);
        track.initialize(10);
        let before: Vec<Vec<i16>> = (0..10).map(|slot| main_slot(&track, slot)).collect();

        track.start_recording(&buf(0));
        track.dub(&buf(700));
        track.undo();

        let after: Vec<Vec<i16>> = (0..10).map(|slot| main_slot(&track, slot)).collect();
        assert_eq!(before, after);
        assert!(!track.is_recording());
        assert!(!track.is_waiting());
    }

    #[test]
    fn test_dub_folds_previous_layer_on_next_pass() {
        let mut track = new_track(config());
        record(&mut track, 2, 1000);
        track.initialize(2);
        track.start_recording(&buf(0));
        let slot = track.write_ptr();

        track.dub(&buf(500));
        let mut out = buf(0);
        track.read(&mut out);
        track.dub(&buf(0));
        track.read(&mut out);
        assert_eq!(track.write_ptr(), slot);

        // second pass over the slot: 1000 * 0.9 + 500 * ratio
        let ratio = track.dub_ratio();
        track.dub(&buf(0));
        let expected = (1000.0f32 * 0.9 + 500.0 * ratio) as i16;
        assert_eq!(main_slot(&track, slot)[1], expected);
    }

    #[test]
    fn test_read_sums_main_and_overdub() {
        let mut track = new_track(config());
        record(&mut track, 2, 30000);
        track.initialize(2);
        let slot = track.write_ptr();
        track.dub(&buf(5000));
        while track.read_ptr() != slot {
            track.advance_pointers();
        }
        let mut out = buf(0);
        track.read(&mut out);
        // saturates instead of wrapping around
        assert_eq!(out.as_slice()[1], i16::MAX);
    }

    #[test]
    fn test_overflow_discards_recording() {
        let mut track = new_track(LoopConfig {
            max_length: 8,
            ..config()
        });
        record(&mut track, 7, 100);
        assert_eq!(track.length(), 7);

        assert_eq!(track.append(&buf(100)), AppendOutcome::Overflow);
        assert_eq!(track.length(), 0);
        assert!(!track.main.is_live(7));
        assert!(main_slot(&track, 0).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_append_after_initialize_is_ignored() {
        let mut track = new_track(config());
        record(&mut track, 4, 100);
        track.initialize(4);
        assert_eq!(track.append(&buf(1)), AppendOutcome::Ignored);
        assert_eq!(track.length(), 4);
    }

    #[test]
    fn test_set_recording_arms_then_stops() {
        let mut track = new_track(config());
        track.set_recording(10);
        assert!(track.is_waiting());
        assert!(!track.is_recording());

        // pressing again while armed keeps it armed
        track.set_recording(10);
        assert!(track.is_waiting());

        track.start_recording(&buf(0));
        assert!(track.is_recording());
        assert!(!track.is_waiting());
        record(&mut track, 12, 100);

        track.set_recording(10);
        assert!(track.is_initialized());
        assert!(!track.is_recording());
        assert!(!track.is_waiting());
        assert_eq!(track.length(), 10);

        track.set_recording(10);
        assert!(track.is_waiting());
        assert!(!(track.is_waiting() && track.is_recording()));
    }

    #[test]
    fn test_clear_or_undo_depends_on_mute() {
        let mut track = new_track(config());
        record(&mut track, 4, 100);
        track.initialize(4);
        track.start_recording(&buf(0));
        track.dub(&buf(300));

        track.clear_or_undo();
        assert!(track.is_initialized());
        assert!(!track.overdub.is_live(0) && !track.overdub.is_live(1));

        track.toggle_mute();
        track.clear_or_undo();
        assert!(!track.is_initialized());
        assert!(!track.is_playing());
        assert_eq!(track.length(), 0);
        assert_eq!(track.dub_ratio(), 1.0);
        assert!(main_slot(&track, 0).iter().all(|&s| s == 0));
    }

    #[test]
    fn test_is_restarting_at_slot_zero() {
        let mut track = new_track(config());
        assert!(!track.is_restarting());
        record(&mut track, 3, 1);
        track.initialize(3);
        assert!(track.is_restarting());
        track.advance_pointers();
        assert!(!track.is_restarting());
    }

    #[test]
    fn test_publish_reaches_shared_state() {
        let shared = SharedTrackState::new();
        let mut track = Track::new(config(), shared.clone());
        record(&mut track, 4, 1);
        track.initialize(4);
        track.publish();
        let status = shared.get();
        assert!(status.initialized && status.playing);
        assert_eq!(status.length, 4);
    }
}
