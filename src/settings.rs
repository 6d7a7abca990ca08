use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::looper::NUM_TRACKS;

/// Sample budget for one layer of one track, the same for every buffer size.
pub const DEFAULT_CAPACITY_SAMPLES: usize = 12_582_912;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("sample rate must be positive")]
    ZeroSampleRate,

    #[error("buffer size must be positive")]
    ZeroBufferSize,

    #[error("capacity of {capacity} samples holds fewer than two buffers of {chunk}")]
    CapacityTooSmall { capacity: usize, chunk: usize },

    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControlMap {
    pub record_notes: [u8; NUM_TRACKS],
    pub play_notes: [u8; NUM_TRACKS],
    pub debounce_ms: u64,
    pub hold_ms: u64,
}

impl Default for ControlMap {
    fn default() -> Self {
        Self {
            record_notes: [36, 37, 38, 39],
            play_notes: [40, 41, 42, 43],
            debounce_ms: 30,
            hold_ms: 2000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub host_name: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub buffer_size: u32,
    pub latency_ms: u32,
    pub overshoot_ms: u32,
    pub capacity_samples: usize,
    pub settle_ms: u64,
    pub midi_port_name: Option<String>,
    pub midi_channel: u8,
    pub controls: ControlMap,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            host_name: None,
            input_device: None,
            output_device: None,
            sample_rate: 44100,
            buffer_size: 512,
            latency_ms: 20,
            overshoot_ms: 100,
            capacity_samples: DEFAULT_CAPACITY_SAMPLES,
            settle_ms: 3000,
            midi_port_name: None,
            midi_channel: 0,
            controls: ControlMap::default(),
        }
    }
}

/// Process-wide loop constants, all in buffer units except the rate.
/// Fixed once the session starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopConfig {
    pub sample_rate: u32,
    pub chunk: usize,
    pub latency: usize,
    pub overshoot: usize,
    pub max_length: usize,
}

impl LoopConfig {
    pub fn from_settings(settings: &AppSettings) -> Result<Self, SettingsError> {
        if settings.sample_rate == 0 {
            return Err(SettingsError::ZeroSampleRate);
        }
        if settings.buffer_size == 0 {
            return Err(SettingsError::ZeroBufferSize);
        }
        let chunk = settings.buffer_size as usize;
        let max_length = settings.capacity_samples / chunk;
        if max_length < 2 {
            return Err(SettingsError::CapacityTooSmall {
                capacity: settings.capacity_samples,
                chunk,
            });
        }

        let buffers_per_second = settings.sample_rate as f64 / chunk as f64;
        let to_buffers = |ms: u32| ((ms as f64 / 1000.0) * buffers_per_second).round() as usize;

        Ok(Self {
            sample_rate: settings.sample_rate,
            chunk,
            latency: to_buffers(settings.latency_ms),
            overshoot: to_buffers(settings.overshoot_ms),
            max_length,
        })
    }

    /// Wall-clock duration of `buffers` buffers.
    pub fn seconds(&self, buffers: usize) -> f32 {
        (buffers * self.chunk) as f32 / self.sample_rate as f32
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "quadloop").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn read_settings(path: &Path) -> Result<AppSettings, SettingsError> {
    let json_string = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&json_string).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn save_settings(settings: &AppSettings, path: &Path) {
    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir) {
            log::warn!("Failed to create directory at {}: {}", dir.display(), e);
            return;
        }
    }
    match serde_json::to_string_pretty(settings) {
        Ok(json_string) => {
            if let Err(e) = fs::write(path, json_string) {
                log::warn!("Failed to write settings to {}: {}", path.display(), e);
            }
        }
        Err(e) => log::warn!("Failed to serialize settings: {}", e),
    }
}

/// An explicit path must load. The default location falls back to defaults,
/// writing them out first if no file exists yet.
pub fn load_settings(explicit: Option<&Path>) -> Result<AppSettings, SettingsError> {
    if let Some(path) = explicit {
        return read_settings(path);
    }
    let Some(path) = get_config_dir().map(|dir| dir.join("settings.json")) else {
        log::warn!("Could not determine config directory, using default settings");
        return Ok(AppSettings::default());
    };
    if !path.exists() {
        let settings = AppSettings::default();
        save_settings(&settings, &path);
        log::info!("Wrote default settings to {}", path.display());
        return Ok(settings);
    }
    match read_settings(&path) {
        Ok(settings) => Ok(settings),
        Err(e) => {
            log::warn!("{}, using defaults", e);
            Ok(AppSettings::default())
        }
    }
}
