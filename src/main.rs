mod app;
mod audio_device;
mod audio_engine;
mod audio_io;
mod controls;
mod looper;
mod midi;
mod sample_buffer;
mod settings;
mod status;

use crate::controls::SessionEnd;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::mpsc;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let settings_path = std::env::args().nth(1).map(PathBuf::from);

    // the console outlives individual sessions, so the channel does too
    let (control_sender, control_receiver) = mpsc::channel();
    controls::spawn_console(control_sender.clone());

    loop {
        let settings = settings::load_settings(settings_path.as_deref())
            .context("Failed to load settings")?;
        match app::run_session(&settings, &control_receiver, &control_sender)? {
            SessionEnd::Quit => break,
            SessionEnd::Restart => log::info!("Restarting session"),
        }
    }
    Ok(())
}
