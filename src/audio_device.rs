use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, HostId};

/// The named host, or the platform default when `name` is `None`.
pub fn get_host(name: Option<&str>) -> Result<Host> {
    let Some(name) = name else {
        return Ok(cpal::default_host());
    };
    let host_id = find_host_id(name)
        .with_context(|| format!("Audio host not available: {}", name))?;
    cpal::host_from_id(host_id).map_err(|e| anyhow::anyhow!("Failed to get audio host: {}", e))
}

fn find_host_id(name: &str) -> Option<HostId> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| id.name().eq_ignore_ascii_case(name))
}

pub fn get_input_devices(host: &Host) -> Result<Vec<(String, Device)>> {
    let devices = host.input_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn get_output_devices(host: &Host) -> Result<Vec<(String, Device)>> {
    let devices = host.output_devices()?;
    let mut result = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            result.push((name, device));
        }
    }
    Ok(result)
}

pub fn find_input_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => get_input_devices(host)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
            .ok_or_else(|| anyhow::anyhow!("Input device not found: {}", name)),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow::anyhow!("No default input device")),
    }
}

pub fn find_output_device(host: &Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(name) => get_output_devices(host)?
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
            .ok_or_else(|| anyhow::anyhow!("Output device not found: {}", name)),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device")),
    }
}
