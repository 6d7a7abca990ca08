use crate::controls::{button_for_note, ControlInput};
use crate::settings::ControlMap;
use anyhow::{Context, Result};
use midir::{Ignore, MidiInput, MidiInputConnection, MidiInputPort};
use std::sync::mpsc::Sender;
use std::time::Instant;

const APP_NAME: &str = "quadloop";

pub fn get_midi_ports() -> Result<Vec<(String, MidiInputPort)>> {
    let midi_in = MidiInput::new(APP_NAME)?;
    let ports = midi_in.ports();
    let mut result = Vec::with_capacity(ports.len());
    for port in ports.iter() {
        let name = midi_in.port_name(port)?;
        result.push((name, port.clone()));
    }
    Ok(result)
}

/// Note on/off on `channel` as `(note, pressed)`. Note on with velocity 0 is
/// a release.
pub fn parse_note_message(message: &[u8], channel: u8) -> Option<(u8, bool)> {
    if message.len() < 3 || message[0] & 0x0F != channel {
        return None;
    }
    match message[0] & 0xF0 {
        0x90 => Some((message[1], message[2] > 0)),
        0x80 => Some((message[1], false)),
        _ => None,
    }
}

/// Connects the MIDI button surface. With no port configured the first
/// available port is used; with no ports at all this returns `Ok(None)`.
pub fn connect_buttons(
    port_name: Option<&str>,
    channel: u8,
    controls: ControlMap,
    sender: Sender<ControlInput>,
) -> Result<Option<MidiInputConnection<()>>> {
    let ports = get_midi_ports()?;
    let selected = match port_name {
        Some(wanted) => Some(
            ports
                .into_iter()
                .find(|(name, _)| name == wanted)
                .with_context(|| format!("MIDI port not found: {}", wanted))?,
        ),
        None => ports.into_iter().next(),
    };
    let Some((name, port)) = selected else {
        log::info!("No MIDI input ports, buttons unavailable");
        return Ok(None);
    };

    let mut midi_in = MidiInput::new(APP_NAME)?;
    midi_in.ignore(Ignore::All);
    log::info!("Opening MIDI connection to: {}", name);

    let connection = midi_in
        .connect(
            &port,
            "quadloop-buttons",
            move |_stamp, message, _| {
                let Some((note, pressed)) = parse_note_message(message, channel) else {
                    return;
                };
                if let Some(id) = button_for_note(&controls, note) {
                    // the receiver is gone once the session ends
                    let _ = sender.send(ControlInput::Button {
                        id,
                        pressed,
                        at: Instant::now(),
                    });
                }
            },
            (),
        )
        .map_err(|e| anyhow::anyhow!("Failed to connect to MIDI port {}: {}", name, e))?;
    Ok(Some(connection))
}
