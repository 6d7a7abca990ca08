// src/looper.rs
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

pub const NUM_TRACKS: usize = 4;
pub const MASTER_TRACK: usize = 0;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingMaster,
    RecordingMaster,
    Looping,
    Stopped,
}

impl From<u8> for SessionPhase {
    fn from(val: u8) -> Self {
        match val {
            0 => SessionPhase::AwaitingMaster,
            1 => SessionPhase::RecordingMaster,
            2 => SessionPhase::Looping,
            3 => SessionPhase::Stopped,
            _ => SessionPhase::AwaitingMaster,
        }
    }
}

/// A point-in-time copy of one track's flags and position.
///
/// The four flags are independent. The combinations that actually occur:
///
/// | initialized | playing | recording | waiting | meaning                         |
/// |-------------|---------|-----------|---------|---------------------------------|
/// | false       | false   | false     | false   | empty                           |
/// | false       | *       | false     | true    | armed for its first pass        |
/// | false       | *       | true      | false   | first pass, appending           |
/// | true        | *       | false     | false   | looping (audible or muted)      |
/// | true        | *       | false     | true    | armed to overdub at next restart|
/// | true        | *       | true      | false   | overdubbing                     |
///
/// `recording` and `waiting` are never both set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackStatus {
    pub initialized: bool,
    pub playing: bool,
    pub recording: bool,
    pub waiting: bool,
    pub read_ptr: usize,
    pub length: usize,
}

impl TrackStatus {
    /// Fraction of the loop already played, `0.0` for an empty track.
    pub fn position(&self) -> f32 {
        if self.length == 0 {
            return 0.0;
        }
        self.read_ptr as f32 / self.length as f32
    }
}

/// Track state published by the audio thread for the control and status
/// threads. Readers may see a mix of two consecutive buffers' values.
#[derive(Clone)]
pub struct SharedTrackState {
    initialized: Arc<AtomicBool>,
    playing: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    waiting: Arc<AtomicBool>,
    read_ptr: Arc<AtomicUsize>,
    length: Arc<AtomicUsize>,
}

impl SharedTrackState {
    pub fn new() -> Self {
        Self {
            initialized: Arc::new(AtomicBool::new(false)),
            playing: Arc::new(AtomicBool::new(false)),
            recording: Arc::new(AtomicBool::new(false)),
            waiting: Arc::new(AtomicBool::new(false)),
            read_ptr: Arc::new(AtomicUsize::new(0)),
            length: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn publish(&self, status: TrackStatus) {
        self.initialized.store(status.initialized, Ordering::Relaxed);
        self.playing.store(status.playing, Ordering::Relaxed);
        self.recording.store(status.recording, Ordering::Relaxed);
        self.waiting.store(status.waiting, Ordering::Relaxed);
        self.read_ptr.store(status.read_ptr, Ordering::Relaxed);
        self.length.store(status.length, Ordering::Relaxed);
    }

    pub fn get(&self) -> TrackStatus {
        TrackStatus {
            initialized: self.initialized.load(Ordering::Relaxed),
            playing: self.playing.load(Ordering::Relaxed),
            recording: self.recording.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            read_ptr: self.read_ptr.load(Ordering::Relaxed),
            length: self.length.load(Ordering::Relaxed),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }
}

impl Default for SharedTrackState {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-wide state shared between the audio thread and everything else.
/// `gain` is the only value written from outside the audio thread.
#[derive(Clone)]
pub struct SharedEngineState {
    pub tracks: Vec<SharedTrackState>,
    phase: Arc<AtomicU8>,
    master_length: Arc<AtomicUsize>,
    gain: Arc<AtomicU32>,
}

impl SharedEngineState {
    pub fn new() -> Self {
        Self {
            tracks: (0..NUM_TRACKS).map(|_| SharedTrackState::new()).collect(),
            phase: Arc::new(AtomicU8::new(SessionPhase::AwaitingMaster as u8)),
            master_length: Arc::new(AtomicUsize::new(0)),
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.load(Ordering::Relaxed).into()
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn master_length(&self) -> usize {
        self.master_length.load(Ordering::Relaxed)
    }

    pub fn set_master_length(&self, length: usize) {
        self.master_length.store(length, Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Acquire))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Release);
    }

    pub fn track_statuses(&self) -> [TrackStatus; NUM_TRACKS] {
        let mut out = [TrackStatus::default(); NUM_TRACKS];
        for (slot, shared) in out.iter_mut().zip(&self.tracks) {
            *slot = shared.get();
        }
        out
    }
}

impl Default for SharedEngineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_round_trips_through_bits() {
        let shared = SharedEngineState::new();
        assert_eq!(shared.gain(), 1.0);
        shared.set_gain(0.4375);
        assert_eq!(shared.gain(), 0.4375);
    }

    #[test]
    fn test_phase_and_position() {
        let shared = SharedEngineState::new();
        assert_eq!(shared.phase(), SessionPhase::AwaitingMaster);
        shared.set_phase(SessionPhase::Looping);
        assert_eq!(shared.phase(), SessionPhase::Looping);

        let status = TrackStatus {
            read_ptr: 25,
            length: 100,
            ..Default::default()
        };
        assert_eq!(status.position(), 0.25);
        assert_eq!(TrackStatus::default().position(), 0.0);
    }

    #[test]
    fn test_clones_share_track_state() {
        let shared = SharedEngineState::new();
        let observer = shared.clone();
        shared.tracks[2].publish(TrackStatus {
            initialized: true,
            playing: true,
            length: 8,
            ..Default::default()
        });
        assert!(observer.tracks[2].is_initialized());
        assert_eq!(observer.track_statuses()[2].length, 8);
    }
}
