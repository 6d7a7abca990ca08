// FILE: src\audio_engine\transport.rs
// ====================================

use super::AudioEngine;
use crate::sample_buffer::SampleBuffer;
use ringbuf::HeapConsumer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Adapts device callbacks of any size to the engine's fixed `chunk`.
///
/// Runs inside the output callback. Input arrives through a ring buffer fed
/// by the input callback; whenever the previous engine block has been played
/// out, the next `chunk` input samples are pulled and processed.
pub struct Transport {
    engine: AudioEngine,
    input_consumer: HeapConsumer<i16>,
    input_block: Vec<i16>,
    pending: SampleBuffer,
    cursor: usize,
    max_backlog: usize,
    underruns: Arc<AtomicUsize>,
}

impl Transport {
    pub fn new(engine: AudioEngine, input_consumer: HeapConsumer<i16>) -> Self {
        let chunk = engine.config().chunk;
        Self {
            engine,
            input_consumer,
            input_block: vec![0; chunk],
            pending: SampleBuffer::silence(chunk),
            cursor: chunk,
            max_backlog: 2 * chunk,
            underruns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn engine(&self) -> &AudioEngine {
        &self.engine
    }

    /// Counts engine blocks that had to be padded with silence because the
    /// input side had not delivered enough samples.
    pub fn underruns(&self) -> Arc<AtomicUsize> {
        self.underruns.clone()
    }

    pub fn backlog(&self) -> usize {
        self.input_consumer.len()
    }

    /// Fills `out` with mono output, running the engine as often as needed.
    pub fn fill(&mut self, out: &mut [i16]) {
        let chunk = self.pending.len();
        for sample in out.iter_mut() {
            if self.cursor == chunk {
                self.next_block();
                self.cursor = 0;
            }
            *sample = self.pending.as_slice()[self.cursor];
            self.cursor += 1;
        }
    }

    fn next_block(&mut self) {
        // input running ahead of output only adds delay; drop the excess
        let backlog = self.input_consumer.len();
        if backlog > self.max_backlog {
            self.input_consumer.skip(backlog - self.max_backlog);
        }

        let read = self.input_consumer.pop_slice(&mut self.input_block);
        if read < self.input_block.len() {
            self.input_block[read..].fill(0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }

        let output = self.engine.process_one_buffer(&self.input_block);
        self.pending.copy_from(output.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::command::{EngineCommand, EngineEvent};
    use crate::looper::SessionPhase;
    use crate::settings::LoopConfig;
    use ringbuf::{HeapProducer, HeapRb};

    struct Rig {
        transport: Transport,
        input: HeapProducer<i16>,
        commands: HeapProducer<EngineCommand>,
        _events: HeapConsumer<EngineEvent>,
    }

    fn rig() -> Rig {
        let config = LoopConfig {
            sample_rate: 8000,
            chunk: 4,
            latency: 0,
            overshoot: 5,
            max_length: 64,
        };
        let (commands, command_consumer) = HeapRb::<EngineCommand>::new(16).split();
        let (event_producer, events) = HeapRb::<EngineEvent>::new(256).split();
        let (input, input_consumer) = HeapRb::<i16>::new(256).split();
        let (engine, _shared) = AudioEngine::new(config, command_consumer, event_producer);
        Rig {
            transport: Transport::new(engine, input_consumer),
            input,
            commands,
            _events: events,
        }
    }

    #[test]
    fn test_underrun_pads_and_counts() {
        let mut rig = rig();
        let underruns = rig.transport.underruns();
        let mut out = [5i16; 10];
        rig.transport.fill(&mut out);
        assert_eq!(out, [0; 10]);
        // 10 samples need three 4-sample blocks
        assert_eq!(underruns.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_excess_backlog_is_skipped() {
        let mut rig = rig();
        for _ in 0..40 {
            rig.input.push(1).unwrap();
        }
        let mut out = [0i16; 4];
        rig.transport.fill(&mut out);
        // trimmed to two blocks, then one block consumed
        assert_eq!(rig.transport.backlog(), 4);
        assert_eq!(rig.transport.underruns().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_odd_callback_sizes_play_blocks_in_order() {
        let mut rig = rig();
        rig.commands.push(EngineCommand::RecordToggle(0)).unwrap();
        let mut scratch = [0i16; 32];
        for _ in 0..8 {
            for _ in 0..4 {
                rig.input.push(4000).unwrap();
            }
            rig.transport.fill(&mut scratch[..4]);
        }
        assert_eq!(rig.transport.engine().phase(), SessionPhase::RecordingMaster);
        assert_eq!(rig.transport.engine().master_length(), 8);

        rig.commands.push(EngineCommand::RecordToggle(0)).unwrap();
        let mut played = Vec::new();
        for size in [5, 5, 5, 5, 5, 3] {
            let mut out = vec![0i16; size];
            rig.transport.fill(&mut out);
            played.extend(out);
        }
        assert_eq!(rig.transport.engine().phase(), SessionPhase::Looping);
        // master slots 0..6, each 4000 >> 2; slot 7 holds the seam
        assert_eq!(played, vec![1000; 28]);
    }
}
