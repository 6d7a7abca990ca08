// src/status.rs

use crate::audio_engine::command::EngineEvent;
use crate::looper::{SharedEngineState, TrackStatus, MASTER_TRACK, NUM_TRACKS};
use crate::settings::LoopConfig;
use ringbuf::HeapConsumer;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// One character per track, the way the indicator lights read.
pub fn indicator(status: &TrackStatus) -> char {
    if status.recording {
        'R'
    } else if status.waiting {
        'W'
    } else if status.initialized && status.playing {
        'P'
    } else if status.initialized {
        'M'
    } else {
        '-'
    }
}

pub fn indicators(statuses: &[TrackStatus; NUM_TRACKS]) -> [char; NUM_TRACKS] {
    let mut out = ['-'; NUM_TRACKS];
    for (c, status) in out.iter_mut().zip(statuses) {
        *c = indicator(status);
    }
    out
}

pub fn render_line(
    statuses: &[TrackStatus; NUM_TRACKS],
    master_length: usize,
    gain: f32,
    config: &LoopConfig,
) -> String {
    let lights: String = indicators(statuses)
        .iter()
        .map(|c| format!("[{}]", c))
        .collect::<Vec<_>>()
        .join(" ");
    let master = &statuses[MASTER_TRACK];
    format!(
        "{}  {:>5.1}%  {:>6.2}s / {:.2}s  gain {:.2}",
        lights,
        master.position() * 100.0,
        config.seconds(master.read_ptr),
        config.seconds(master_length),
        gain
    )
}

pub fn describe_event(event: &EngineEvent) -> String {
    match event {
        EngineEvent::MasterRecordingStarted => "Recording master loop".to_string(),
        EngineEvent::MasterDefined { length } => {
            format!("Master loop defined: {} buffers", length)
        }
        EngineEvent::SetupDiscarded => "Master recording discarded".to_string(),
        EngineEvent::RecordingStarted { track } => format!("Track {} recording", track + 1),
        EngineEvent::TrackInitialized { track, length } => {
            format!("Track {} looping: {} buffers", track + 1, length)
        }
        EngineEvent::Overflow { track } => {
            format!("Track {} ran out of memory, recording discarded", track + 1)
        }
        EngineEvent::Cleared { track } => format!("Track {} cleared", track + 1),
        EngineEvent::Undone { track } => format!("Track {} overdub undone", track + 1),
        EngineEvent::CommandIgnored(command) => format!("Ignored {:?}", command),
        EngineEvent::Stopped => "Engine stopped".to_string(),
    }
}

fn log_event(event: &EngineEvent) {
    let text = describe_event(event);
    match event {
        EngineEvent::Overflow { .. } => log::warn!("{}", text),
        EngineEvent::CommandIgnored(_) => log::debug!("{}", text),
        _ => log::info!("{}", text),
    }
}

/// Drains engine events and redraws the status line until `stop` is set.
pub fn spawn_status_thread(
    shared: SharedEngineState,
    mut events: HeapConsumer<EngineEvent>,
    config: LoopConfig,
    xrun_count: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut last_lights = ['-'; NUM_TRACKS];
        let mut last_xruns = 0;
        let mut last_underruns = 0;
        let mut stdout = std::io::stdout();
        while !stop.load(Ordering::Relaxed) {
            while let Some(event) = events.pop() {
                log_event(&event);
            }

            let statuses = shared.track_statuses();
            let lights = indicators(&statuses);
            if lights != last_lights {
                log::debug!("Tracks {}", lights.iter().collect::<String>());
                last_lights = lights;
            }
            let xruns = xrun_count.load(Ordering::Relaxed);
            if xruns != last_xruns {
                log::warn!("{} stream errors so far", xruns);
                last_xruns = xruns;
            }
            // the first blocks before input starts flowing always run short
            let short = underruns.load(Ordering::Relaxed);
            if short > last_underruns + 10 {
                log::debug!("{} engine buffers padded with silence", short);
                last_underruns = short;
            }

            let line = render_line(&statuses, shared.master_length(), shared.gain(), &config);
            // a closed terminal must not take the session down
            let _ = write!(stdout, "\r{}", line);
            let _ = stdout.flush();

            thread::sleep(REFRESH_INTERVAL);
        }
        while let Some(event) = events.pop() {
            log_event(&event);
        }
        let _ = writeln!(stdout);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(initialized: bool, playing: bool, recording: bool, waiting: bool) -> TrackStatus {
        TrackStatus {
            initialized,
            playing,
            recording,
            waiting,
            ..Default::default()
        }
    }

    #[test]
    fn test_indicators() {
        let statuses = [
            status(true, true, false, false),
            status(true, false, false, false),
            status(false, false, true, false),
            status(false, false, false, true),
        ];
        assert_eq!(indicators(&statuses), ['P', 'M', 'R', 'W']);
        assert_eq!(indicator(&TrackStatus::default()), '-');
    }

    #[test]
    fn test_render_line_shows_master_position() {
        let config = LoopConfig {
            sample_rate: 1000,
            chunk: 100,
            latency: 0,
            overshoot: 1,
            max_length: 100,
        };
        let mut statuses = [TrackStatus::default(); NUM_TRACKS];
        statuses[0] = TrackStatus {
            initialized: true,
            playing: true,
            read_ptr: 5,
            length: 20,
            ..Default::default()
        };
        let line = render_line(&statuses, 20, 0.75, &config);
        assert!(line.starts_with("[P] [-] [-] [-]"));
        assert!(line.contains("25.0%"));
        assert!(line.contains("0.50s / 2.00s"));
        assert!(line.ends_with("gain 0.75"));
    }

    #[test]
    fn test_describe_event_numbers_tracks_from_one() {
        assert_eq!(
            describe_event(&EngineEvent::TrackInitialized { track: 1, length: 200 }),
            "Track 2 looping: 200 buffers"
        );
        assert_eq!(
            describe_event(&EngineEvent::MasterDefined { length: 100 }),
            "Master loop defined: 100 buffers"
        );
    }
}
