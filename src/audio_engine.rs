// src/audio_engine.rs

pub mod command;
pub mod normalizer;
pub mod slot_store;
pub mod track;
pub mod transport;

use crate::looper::{SessionPhase, SharedEngineState, MASTER_TRACK, NUM_TRACKS};
use crate::sample_buffer::SampleBuffer;
use crate::settings::LoopConfig;
use command::{EngineCommand, EngineEvent};
use normalizer::VolumeNormalizer;
use ringbuf::{HeapConsumer, HeapProducer};
use track::{AppendOutcome, Track};

/// Raw input is shifted right by this many bits before it is recorded.
pub const INPUT_HEADROOM_SHIFT: u32 = 2;

pub struct AudioEngine {
    config: LoopConfig,
    command_consumer: HeapConsumer<EngineCommand>,
    event_producer: HeapProducer<EngineEvent>,
    tracks: Vec<Track>,
    phase: SessionPhase,
    /// `LENGTH`: the master loop length in buffers, 0 until setup records.
    master_length: usize,
    prev_input: SampleBuffer,
    current_input: SampleBuffer,
    track_output: SampleBuffer,
    mix_buffer: Vec<i32>,
    output_buffer: SampleBuffer,
    shared: SharedEngineState,
}

impl AudioEngine {
    /// Allocates every buffer the engine will ever use. Nothing on the
    /// per-buffer path allocates afterwards.
    pub fn new(
        config: LoopConfig,
        command_consumer: HeapConsumer<EngineCommand>,
        event_producer: HeapProducer<EngineEvent>,
    ) -> (Self, SharedEngineState) {
        let shared = SharedEngineState::new();
        let tracks: Vec<Track> = shared
            .tracks
            .iter()
            .map(|s| Track::new(config, s.clone()))
            .collect();

        let engine = Self {
            config,
            command_consumer,
            event_producer,
            tracks,
            phase: SessionPhase::AwaitingMaster,
            master_length: 0,
            prev_input: SampleBuffer::silence(config.chunk),
            current_input: SampleBuffer::silence(config.chunk),
            track_output: SampleBuffer::silence(config.chunk),
            mix_buffer: vec![0; config.chunk],
            output_buffer: SampleBuffer::silence(config.chunk),
            shared: shared.clone(),
        };
        engine.publish();
        (engine, shared)
    }

    pub fn config(&self) -> LoopConfig {
        self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn master_length(&self) -> usize {
        self.master_length
    }

    /// A normalizer over every layer of every track, for the control thread.
    pub fn normalizer(&self) -> VolumeNormalizer {
        let layers = self.tracks.iter().flat_map(|t| t.layers()).collect();
        VolumeNormalizer::new(layers, self.shared.clone())
    }

    pub fn handle_commands(&mut self) {
        while let Some(command) = self.command_consumer.pop() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Shutdown => self.shutdown(),
            EngineCommand::RecordToggle(id) if id < NUM_TRACKS => self.toggle_record(id),
            EngineCommand::ClearOrUndo(id)
                if id < NUM_TRACKS && self.phase == SessionPhase::Looping =>
            {
                let track = &mut self.tracks[id];
                let was_playing = track.is_playing();
                track.clear_or_undo();
                self.emit(if was_playing {
                    EngineEvent::Undone { track: id }
                } else {
                    EngineEvent::Cleared { track: id }
                });
            }
            EngineCommand::MuteToggle(id)
                if id < NUM_TRACKS && self.phase == SessionPhase::Looping =>
            {
                self.tracks[id].toggle_mute();
            }
            _ => self.emit(EngineEvent::CommandIgnored(command)),
        }
    }

    fn toggle_record(&mut self, id: usize) {
        match (self.phase, id) {
            (SessionPhase::AwaitingMaster, MASTER_TRACK) => {
                self.tracks[MASTER_TRACK].start_recording(&self.prev_input);
                self.set_phase(SessionPhase::RecordingMaster);
                self.emit(EngineEvent::MasterRecordingStarted);
            }
            (SessionPhase::RecordingMaster, MASTER_TRACK) => self.finish_setup(),
            (SessionPhase::Looping, _) => {
                let track = &mut self.tracks[id];
                let was_initialized = track.is_initialized();
                track.set_recording(self.master_length);
                if !was_initialized && track.is_initialized() {
                    let length = track.length();
                    self.emit(EngineEvent::TrackInitialized { track: id, length });
                }
            }
            _ => self.emit(EngineEvent::CommandIgnored(EngineCommand::RecordToggle(id))),
        }
    }

    /// The master's first pass is over: its raw length becomes `LENGTH`.
    fn finish_setup(&mut self) {
        let master = &mut self.tracks[MASTER_TRACK];
        let raw_length = master.length();
        if raw_length == 0 {
            master.clear();
            self.set_master_length(0);
            self.set_phase(SessionPhase::AwaitingMaster);
            self.emit(EngineEvent::SetupDiscarded);
            return;
        }
        master.set_recording(raw_length);
        self.set_master_length(raw_length);
        self.set_phase(SessionPhase::Looping);
        self.emit(EngineEvent::MasterDefined { length: raw_length });
    }

    /// Silences the engine for good; every later buffer is silence.
    pub fn shutdown(&mut self) {
        for track in self.tracks.iter_mut() {
            track.clear();
        }
        self.set_phase(SessionPhase::Stopped);
        self.emit(EngineEvent::Stopped);
    }

    /// Runs one buffer period: pending commands, recording, mixing.
    /// `input` is raw device audio, one `chunk` long.
    pub fn process_one_buffer(&mut self, input: &[i16]) -> &SampleBuffer {
        self.handle_commands();
        self.current_input.attenuate_from(input, INPUT_HEADROOM_SHIFT);

        match self.phase {
            SessionPhase::Looping => {
                self.record_step();
                self.mix_step();
            }
            SessionPhase::RecordingMaster => {
                self.setup_step();
                self.output_buffer.fill_silence();
            }
            SessionPhase::AwaitingMaster | SessionPhase::Stopped => {
                self.output_buffer.fill_silence();
            }
        }

        std::mem::swap(&mut self.prev_input, &mut self.current_input);
        self.publish();
        &self.output_buffer
    }

    fn setup_step(&mut self) {
        let master = &mut self.tracks[MASTER_TRACK];
        match master.append(&self.current_input) {
            AppendOutcome::Overflow => {
                master.clear();
                self.set_master_length(0);
                self.set_phase(SessionPhase::AwaitingMaster);
                self.emit(EngineEvent::Overflow {
                    track: MASTER_TRACK,
                });
            }
            _ => {
                let length = master.length();
                self.set_master_length(length);
            }
        }
    }

    fn record_step(&mut self) {
        // arming resolves before recording so a track armed on this restart
        // records this buffer too
        if self.tracks[MASTER_TRACK].is_restarting() {
            for (id, track) in self.tracks.iter_mut().enumerate() {
                if track.is_waiting() {
                    track.start_recording(&self.prev_input);
                    push_event(
                        &mut self.event_producer,
                        EngineEvent::RecordingStarted { track: id },
                    );
                }
            }
        }
        let master = &mut self.tracks[MASTER_TRACK];
        if master.is_waiting() && !master.is_initialized() {
            master.start_recording(&self.prev_input);
            push_event(
                &mut self.event_producer,
                EngineEvent::RecordingStarted {
                    track: MASTER_TRACK,
                },
            );
        }

        for (id, track) in self.tracks.iter_mut().enumerate() {
            if !track.is_recording() {
                continue;
            }
            if track.is_initialized() {
                track.dub(&self.current_input);
            } else if track.append(&self.current_input) == AppendOutcome::Overflow {
                track.clear();
                push_event(&mut self.event_producer, EngineEvent::Overflow { track: id });
            }
        }
    }

    fn mix_step(&mut self) {
        self.mix_buffer.fill(0);
        for track in self.tracks.iter_mut() {
            track.read(&mut self.track_output);
            for (sum, &s) in self.mix_buffer.iter_mut().zip(self.track_output.as_slice()) {
                *sum += s as i32;
            }
        }
        apply_gain(
            &self.mix_buffer,
            self.shared.gain(),
            self.output_buffer.as_mut_slice(),
        );
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        self.shared.set_phase(phase);
    }

    fn set_master_length(&mut self, length: usize) {
        self.master_length = length;
        self.shared.set_master_length(length);
    }

    fn publish(&self) {
        for track in &self.tracks {
            track.publish();
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        push_event(&mut self.event_producer, event);
    }
}

fn push_event(producer: &mut HeapProducer<EngineEvent>, event: EngineEvent) {
    // a full queue means the status thread is behind; dropping is fine
    let _ = producer.push(event);
}

/// Scales the widened mix and narrows it back to samples, truncating toward
/// zero and saturating at the 16-bit limits.
pub fn apply_gain(mix: &[i32], gain: f32, out: &mut [i16]) {
    for (dst, &sum) in out.iter_mut().zip(mix) {
        *dst = (sum as f32 * gain) as i16;
    }
}
