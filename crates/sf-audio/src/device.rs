//! Audio output device enumeration and selection.
//!
//! This engine only ever plays back; there is no capture path, so unlike the
//! underlying `cpal` API, this module only deals in output devices.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};

use crate::{AudioError, AudioResult};

/// Audio output device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub output_channels: u16,
    pub sample_rates: Vec<u32>,
}

/// Get the audio host (platform-specific backend)
pub fn get_host() -> Host {
    // On macOS, use CoreAudio
    // On Windows, prefer ASIO if available, otherwise WASAPI
    // On Linux, prefer JACK, otherwise use default

    #[cfg(target_os = "macos")]
    {
        cpal::default_host()
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(host) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Asio)
        {
            if let Ok(host) = cpal::host_from_id(host) {
                return host;
            }
        }
        cpal::default_host()
    }

    #[cfg(target_os = "linux")]
    {
        // JACK support requires cpal's `jack` feature, which this crate does
        // not enable; fall through to the default ALSA host.
        cpal::default_host()
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        cpal::default_host()
    }
}

/// List available output devices
pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_device = host.default_output_device();
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    let mut devices = Vec::new();

    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_ref().map(|d| d == &name).unwrap_or(false);
            let (output_channels, sample_rates) = get_output_device_info(&device);

            devices.push(DeviceInfo {
                name,
                is_default,
                output_channels,
                sample_rates,
            });
        }
    }

    Ok(devices)
}

/// Get default output device
pub fn get_default_output_device() -> AudioResult<Device> {
    let host = get_host();
    host.default_output_device().ok_or(AudioError::NoDevice)
}

/// Get output device by name
pub fn get_output_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();

    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(device);
            }
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn get_output_device_info(device: &Device) -> (u16, Vec<u32>) {
    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map(|c| c.collect())
        .unwrap_or_default();

    extract_device_info(&configs)
}

fn extract_device_info(configs: &[SupportedStreamConfigRange]) -> (u16, Vec<u32>) {
    let max_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);

    let mut sample_rates: Vec<u32> = configs
        .iter()
        .flat_map(|c| {
            let min = c.min_sample_rate();
            let max = c.max_sample_rate();

            [44100, 48000, 88200, 96000, 176400, 192000]
                .into_iter()
                .filter(move |&rate| rate >= min && rate <= max)
        })
        .collect();

    sample_rates.sort_unstable();
    sample_rates.dedup();

    (max_channels, sample_rates)
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEVICE SELECTOR
// ═══════════════════════════════════════════════════════════════════════════════

use parking_lot::RwLock;

/// Device selection state
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            output_device: None,
            sample_rate: 48000,
            buffer_size: 256,
        }
    }
}

/// Device manager for hot-plugging and device changes
pub struct DeviceManager {
    selection: RwLock<DeviceSelection>,
    output_devices: RwLock<Vec<DeviceInfo>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        let manager = Self {
            selection: RwLock::new(DeviceSelection::default()),
            output_devices: RwLock::new(Vec::new()),
        };

        manager.refresh_devices();
        manager
    }

    /// Refresh the cached device list
    pub fn refresh_devices(&self) {
        if let Ok(outputs) = list_output_devices() {
            *self.output_devices.write() = outputs;
        }
    }

    pub fn output_devices(&self) -> Vec<DeviceInfo> {
        self.output_devices.read().clone()
    }

    pub fn selection(&self) -> DeviceSelection {
        self.selection.read().clone()
    }

    pub fn set_output_device(&self, name: Option<String>) {
        self.selection.write().output_device = name;
    }

    pub fn set_sample_rate(&self, rate: u32) {
        self.selection.write().sample_rate = rate;
    }

    pub fn set_buffer_size(&self, size: u32) {
        self.selection.write().buffer_size = size;
    }

    pub fn default_output_name(&self) -> Option<String> {
        self.output_devices
            .read()
            .iter()
            .find(|d| d.is_default)
            .map(|d| d.name.clone())
    }

    pub fn supported_sample_rates(&self) -> Vec<u32> {
        let selection = self.selection.read();
        let outputs = self.output_devices.read();

        if let Some(ref name) = selection.output_device {
            outputs
                .iter()
                .find(|d| &d.name == name)
                .map(|d| d.sample_rates.clone())
                .unwrap_or_default()
        } else {
            outputs
                .iter()
                .find(|d| d.is_default)
                .map(|d| d.sample_rates.clone())
                .unwrap_or_else(|| vec![44100, 48000, 96000])
        }
    }

    pub fn is_device_available(&self, name: &str) -> bool {
        self.output_devices.read().iter().any(|d| d.name == name)
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST INFO
// ═══════════════════════════════════════════════════════════════════════════════

/// Audio backend information
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub name: String,
    pub is_asio: bool,
    pub is_jack: bool,
    pub is_core_audio: bool,
}

/// Get current audio host info
pub fn get_host_info() -> HostInfo {
    let host = get_host();
    let id = host.id();

    HostInfo {
        name: format!("{:?}", id),
        is_asio: cfg!(target_os = "windows") && format!("{:?}", id).contains("Asio"),
        is_jack: cfg!(target_os = "linux") && format!("{:?}", id).contains("Jack"),
        is_core_audio: cfg!(target_os = "macos"),
    }
}

/// List available audio backends
pub fn list_available_hosts() -> Vec<String> {
    cpal::available_hosts()
        .into_iter()
        .map(|h| format!("{:?}", h))
        .collect()
}
