// src/app.rs
use crate::audio_engine::command::{EngineCommand, EngineEvent};
use crate::audio_engine::transport::Transport;
use crate::audio_engine::AudioEngine;
use crate::audio_io;
use crate::controls::{self, ButtonTracker, ControlDispatcher, ControlInput, SessionEnd};
use crate::midi;
use crate::settings::{AppSettings, LoopConfig};
use crate::status;
use anyhow::{Context, Result};
use cpal::Stream;
use midir::MidiInputConnection;
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const COMMAND_QUEUE_SIZE: usize = 256;
const EVENT_QUEUE_SIZE: usize = 1024;

/// One looping session: streams, MIDI and the status thread, from the first
/// master recording until quit or restart.
pub struct Session {
    config: LoopConfig,
    dispatcher: ControlDispatcher,
    tracker: ButtonTracker,
    _input_stream: Option<Stream>,
    _output_stream: Option<Stream>,
    _midi_connection: Option<MidiInputConnection<()>>,
    status_stop: Arc<AtomicBool>,
    status_handle: Option<JoinHandle<()>>,
}

impl Session {
    pub fn start(settings: &AppSettings, control_sender: &Sender<ControlInput>) -> Result<Self> {
        let config = LoopConfig::from_settings(settings).context("Invalid settings")?;
        log::info!(
            "Loop config: {} Hz, {} samples per buffer, latency {} buffers, overshoot {} buffers, capacity {} buffers ({:.1}s)",
            config.sample_rate,
            config.chunk,
            config.latency,
            config.overshoot,
            config.max_length,
            config.seconds(config.max_length)
        );

        let (command_producer, command_consumer) =
            HeapRb::<EngineCommand>::new(COMMAND_QUEUE_SIZE).split();
        let (event_producer, event_consumer) =
            HeapRb::<EngineEvent>::new(EVENT_QUEUE_SIZE).split();
        let (audio_producer, audio_consumer) = HeapRb::<i16>::new(config.chunk * 16).split();

        let (engine, shared) = AudioEngine::new(config, command_consumer, event_producer);
        let normalizer = engine.normalizer();
        let transport = Transport::new(engine, audio_consumer);
        let xrun_count = Arc::new(AtomicUsize::new(0));
        let underruns = transport.underruns();

        let (input_stream, output_stream) = audio_io::init_and_run_streams(
            settings,
            config,
            audio_producer,
            transport,
            xrun_count.clone(),
        )
        .context("Failed to open audio streams")?;

        let status_stop = Arc::new(AtomicBool::new(false));
        let status_handle = status::spawn_status_thread(
            shared.clone(),
            event_consumer,
            config,
            xrun_count,
            underruns,
            status_stop.clone(),
        );

        let midi_connection = match midi::connect_buttons(
            settings.midi_port_name.as_deref(),
            settings.midi_channel,
            settings.controls.clone(),
            control_sender.clone(),
        ) {
            Ok(connection) => connection,
            Err(e) => {
                log::warn!("MIDI unavailable: {:#}", e);
                None
            }
        };

        log::info!("Press record on track 1 to start the master loop");

        Ok(Self {
            config,
            dispatcher: ControlDispatcher::new(
                command_producer,
                normalizer,
                shared,
                Duration::from_millis(settings.settle_ms),
            ),
            tracker: ButtonTracker::from_map(&settings.controls),
            _input_stream: Some(input_stream),
            _output_stream: Some(output_stream),
            _midi_connection: midi_connection,
            status_stop,
            status_handle: Some(status_handle),
        })
    }

    /// Blocks on control input until the session ends.
    pub fn run(&mut self, inputs: &Receiver<ControlInput>) -> SessionEnd {
        // edges left over from a previous session
        while inputs.try_recv().is_ok() {}
        controls::run_control_loop(inputs, &mut self.tracker, &mut self.dispatcher)
    }

    pub fn stop(&mut self) {
        if self._output_stream.is_some() {
            // give the engine a couple of buffers to act on the shutdown
            thread::sleep(Duration::from_secs_f32(self.config.seconds(2)));
        }
        self._midi_connection.take();
        self._input_stream.take();
        self._output_stream.take();
        self.status_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.status_handle.take() {
            if handle.join().is_err() {
                log::error!("Status thread panicked");
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn run_session(
    settings: &AppSettings,
    inputs: &Receiver<ControlInput>,
    control_sender: &Sender<ControlInput>,
) -> Result<SessionEnd> {
    let mut session = Session::start(settings, control_sender)?;
    let end = session.run(inputs);
    session.stop();
    log::info!("Session ended: {:?}", end);
    Ok(end)
}
