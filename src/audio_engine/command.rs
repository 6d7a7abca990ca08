// FILE: src\audio_engine\command.rs
// ==================================

/// Control intents for the audio thread. Queued by the control thread and
/// drained at the start of every buffer, so a track is never mutated while
/// it is being read or dubbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    RecordToggle(usize),
    ClearOrUndo(usize),
    MuteToggle(usize),
    Shutdown,
}

/// Notifications from the audio thread. The audio thread cannot log, so it
/// pushes these into a ring buffer for the status thread to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    MasterRecordingStarted,
    MasterDefined { length: usize },
    /// Setup ended without a single recorded buffer.
    SetupDiscarded,
    RecordingStarted { track: usize },
    TrackInitialized { track: usize, length: usize },
    Overflow { track: usize },
    Cleared { track: usize },
    Undone { track: usize },
    CommandIgnored(EngineCommand),
    Stopped,
}
