// src/controls.rs

use crate::audio_engine::command::EngineCommand;
use crate::audio_engine::normalizer::VolumeNormalizer;
use crate::looper::{SessionPhase, SharedEngineState, NUM_TRACKS};
use crate::settings::ControlMap;
use ringbuf::HeapProducer;
use std::io::BufRead;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const HOLD_CHECK_INTERVAL: Duration = Duration::from_millis(20);
const QUIT_BUTTON: usize = 3;
const RESTART_BUTTON: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlIntent {
    RecordToggle(usize),
    ClearOrUndo(usize),
    MuteToggle(usize),
    RecomputeGain,
    Quit,
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    Record,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonId {
    pub kind: ButtonKind,
    pub track: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGesture {
    Pressed,
    Held,
    Released,
}

/// Everything the control thread reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInput {
    /// A raw edge from a physical button.
    Button {
        id: ButtonId,
        pressed: bool,
        at: Instant,
    },
    /// An intent that needs no gesture detection (console).
    Intent(ControlIntent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Restart,
}

pub fn intent_for(id: ButtonId, gesture: ButtonGesture) -> Option<ControlIntent> {
    match (id.kind, gesture) {
        (ButtonKind::Record, ButtonGesture::Pressed) => Some(ControlIntent::RecordToggle(id.track)),
        (ButtonKind::Record, ButtonGesture::Held) => Some(ControlIntent::ClearOrUndo(id.track)),
        (ButtonKind::Record, ButtonGesture::Released) => Some(ControlIntent::RecomputeGain),
        (ButtonKind::Play, ButtonGesture::Pressed) => Some(ControlIntent::MuteToggle(id.track)),
        (ButtonKind::Play, ButtonGesture::Held) if id.track == QUIT_BUTTON => {
            Some(ControlIntent::Quit)
        }
        (ButtonKind::Play, ButtonGesture::Held) if id.track == RESTART_BUTTON => {
            Some(ControlIntent::Restart)
        }
        _ => None,
    }
}

pub fn button_for_note(map: &ControlMap, note: u8) -> Option<ButtonId> {
    if let Some(track) = map.record_notes.iter().position(|&n| n == note) {
        return Some(ButtonId {
            kind: ButtonKind::Record,
            track,
        });
    }
    map.play_notes
        .iter()
        .position(|&n| n == note)
        .map(|track| ButtonId {
            kind: ButtonKind::Play,
            track,
        })
}

#[derive(Debug, Clone, Copy, Default)]
struct ButtonState {
    down: bool,
    pressed_at: Option<Instant>,
    last_edge: Option<Instant>,
    held_fired: bool,
}

/// Turns raw button edges into press, hold and release gestures.
pub struct ButtonTracker {
    debounce: Duration,
    hold: Duration,
    record: [ButtonState; NUM_TRACKS],
    play: [ButtonState; NUM_TRACKS],
}

impl ButtonTracker {
    pub fn new(debounce: Duration, hold: Duration) -> Self {
        Self {
            debounce,
            hold,
            record: [ButtonState::default(); NUM_TRACKS],
            play: [ButtonState::default(); NUM_TRACKS],
        }
    }

    pub fn from_map(map: &ControlMap) -> Self {
        Self::new(
            Duration::from_millis(map.debounce_ms),
            Duration::from_millis(map.hold_ms),
        )
    }

    fn state_mut(&mut self, id: ButtonId) -> Option<&mut ButtonState> {
        match id.kind {
            ButtonKind::Record => self.record.get_mut(id.track),
            ButtonKind::Play => self.play.get_mut(id.track),
        }
    }

    pub fn edge(&mut self, id: ButtonId, pressed: bool, at: Instant) -> Option<ButtonGesture> {
        let debounce = self.debounce;
        let state = self.state_mut(id)?;
        if state.down == pressed {
            return None;
        }
        if let Some(last) = state.last_edge {
            if at.saturating_duration_since(last) < debounce {
                return None;
            }
        }
        state.last_edge = Some(at);
        state.down = pressed;
        if pressed {
            state.pressed_at = Some(at);
            state.held_fired = false;
            Some(ButtonGesture::Pressed)
        } else {
            state.pressed_at = None;
            Some(ButtonGesture::Released)
        }
    }

    /// Reports buttons that have just crossed the hold threshold. A hold fires
    /// once per press.
    pub fn poll_holds(&mut self, now: Instant) -> Vec<ButtonId> {
        let hold = self.hold;
        let mut held = Vec::new();
        for (kind, states) in [
            (ButtonKind::Record, &mut self.record),
            (ButtonKind::Play, &mut self.play),
        ] {
            for (track, state) in states.iter_mut().enumerate() {
                let Some(pressed_at) = state.pressed_at else {
                    continue;
                };
                if state.down && !state.held_fired && now.saturating_duration_since(pressed_at) >= hold
                {
                    state.held_fired = true;
                    held.push(ButtonId { kind, track });
                }
            }
        }
        held
    }
}

/// Quit and restart are only honoured once the session has been looping for
/// `settle`, so a stray hold during setup does not end it.
pub struct SessionGate {
    settle: Duration,
    looping_since: Option<Instant>,
}

impl SessionGate {
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            looping_since: None,
        }
    }

    pub fn observe(&mut self, phase: SessionPhase, now: Instant) {
        if phase == SessionPhase::Looping && self.looping_since.is_none() {
            self.looping_since = Some(now);
        }
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.looping_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.settle)
    }
}

/// Routes intents: track intents to the audio thread, gain recomputation to
/// the normalizer, quit and restart to the caller.
pub struct ControlDispatcher {
    commands: HeapProducer<EngineCommand>,
    normalizer: VolumeNormalizer,
    shared: SharedEngineState,
    gate: SessionGate,
}

impl ControlDispatcher {
    pub fn new(
        commands: HeapProducer<EngineCommand>,
        normalizer: VolumeNormalizer,
        shared: SharedEngineState,
        settle: Duration,
    ) -> Self {
        Self {
            commands,
            normalizer,
            shared,
            gate: SessionGate::new(settle),
        }
    }

    pub fn observe(&mut self, now: Instant) {
        self.gate.observe(self.shared.phase(), now);
    }

    pub fn dispatch(&mut self, intent: ControlIntent, now: Instant) -> Option<SessionEnd> {
        self.observe(now);
        match intent {
            ControlIntent::RecordToggle(track) => self.send(EngineCommand::RecordToggle(track)),
            ControlIntent::ClearOrUndo(track) => self.send(EngineCommand::ClearOrUndo(track)),
            ControlIntent::MuteToggle(track) => self.send(EngineCommand::MuteToggle(track)),
            ControlIntent::RecomputeGain => {
                if let Some(gain) = self.normalizer.recompute_gain() {
                    log::info!("Output gain set to {:.3}", gain);
                }
            }
            ControlIntent::Quit | ControlIntent::Restart => {
                if !self.gate.is_active(now) {
                    log::info!("{:?} ignored, session not active yet", intent);
                    return None;
                }
                self.send(EngineCommand::Shutdown);
                return Some(if intent == ControlIntent::Quit {
                    SessionEnd::Quit
                } else {
                    SessionEnd::Restart
                });
            }
        }
        None
    }

    fn send(&mut self, command: EngineCommand) {
        if self.commands.push(command).is_err() {
            log::warn!("Command queue full, dropped {:?}", command);
        }
    }
}

/// Runs the control thread until an intent ends the session. A closed input
/// channel ends it as a quit.
pub fn run_control_loop(
    inputs: &Receiver<ControlInput>,
    tracker: &mut ButtonTracker,
    dispatcher: &mut ControlDispatcher,
) -> SessionEnd {
    loop {
        let mut intents = Vec::new();
        match inputs.recv_timeout(HOLD_CHECK_INTERVAL) {
            Ok(ControlInput::Button { id, pressed, at }) => {
                if let Some(gesture) = tracker.edge(id, pressed, at) {
                    log::debug!("{:?} {:?}", id, gesture);
                    intents.extend(intent_for(id, gesture));
                }
            }
            Ok(ControlInput::Intent(intent)) => intents.push(intent),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return SessionEnd::Quit,
        }

        let now = Instant::now();
        for id in tracker.poll_holds(now) {
            log::debug!("{:?} held", id);
            intents.extend(intent_for(id, ButtonGesture::Held));
        }
        dispatcher.observe(now);
        for intent in intents {
            if let Some(end) = dispatcher.dispatch(intent, now) {
                return end;
            }
        }
    }
}

/// Console syntax: `r N`, `c N`, `m N` with tracks numbered from 1, then
/// `g`, `q` and `restart`.
pub fn parse_console_line(line: &str) -> Option<ControlIntent> {
    let mut words = line.split_whitespace();
    let verb = words.next()?;
    let track = words
        .next()
        .and_then(|w| w.parse::<usize>().ok())
        .filter(|n| (1..=NUM_TRACKS).contains(n))
        .map(|n| n - 1);
    match (verb, track) {
        ("r", Some(t)) => Some(ControlIntent::RecordToggle(t)),
        ("c", Some(t)) => Some(ControlIntent::ClearOrUndo(t)),
        ("m", Some(t)) => Some(ControlIntent::MuteToggle(t)),
        ("g", _) => Some(ControlIntent::RecomputeGain),
        ("q" | "quit", _) => Some(ControlIntent::Quit),
        ("restart", _) => Some(ControlIntent::Restart),
        _ => None,
    }
}

/// Reads console commands from stdin for the lifetime of the process.
pub fn spawn_console(sender: Sender<ControlInput>) -> JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_console_line(&line) {
                Some(intent) => {
                    if sender.send(ControlInput::Intent(intent)).is_err() {
                        break;
                    }
                }
                None => log::warn!("Unknown command '{}'", line.trim()),
            }
        }
        log::debug!("Console input closed");
    })
}
