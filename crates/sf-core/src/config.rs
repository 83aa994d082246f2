//! Engine configuration (C1)
//!
//! Mostly static tuning values. Fields marked "runtime" are filled in after
//! the native backend reports the device's actual sample rate; the rest are
//! fixed at startup and changing them requires a restart.

use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

/// Gated log category — checked before formatting a debug/trace message so
/// hot per-frame paths don't pay for string formatting when disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Audio,
    AudioRender,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Mixer sample rate in Hz. Obtained at init from the device (runtime).
    pub sample_rate_hz: u32,
    /// How often the host drives `complete_frame`, in milliseconds.
    pub update_period_ms: f64,
    /// Software playback buffer length, in milliseconds.
    pub playback_buffer_ms: f64,
    /// Hardware device buffer length, in milliseconds.
    pub device_buffer_ms: f64,
    /// FFT bin count for the analysis context (must be a power of two).
    pub fft_bins: usize,
    /// Number of log-spaced frequency bands (C8).
    pub band_count: usize,
    /// Number of samples retained per waveform buffer.
    pub waveform_samples: usize,
    /// Low-pass cutoff separating the low waveform band, in Hz.
    pub low_band_cutoff_hz: f64,
    /// High-pass cutoff separating the high waveform band, in Hz.
    pub high_band_cutoff_hz: f64,
    /// Linear 3D distance-attenuation factor scale.
    pub distance_factor: f64,
    /// Native rolloff factor passed to the 3D engine.
    pub rolloff_factor: f64,
    /// Doppler factor passed to the 3D engine.
    pub doppler_factor: f64,
    /// Peak level metering window, in seconds.
    pub level_metering_window_s: f64,
    /// Soundtrack resync threshold, as a multiple of playback speed.
    pub resync_threshold: f64,
    /// Seconds added past the target position on resync, to absorb decode latency.
    pub resync_offset_s: f64,
    /// Gate for the "audio" log category.
    pub log_audio: bool,
    /// Gate for the "audio-render" log category.
    pub log_audio_render: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48_000,
            update_period_ms: 16.667,
            playback_buffer_ms: 20.0,
            device_buffer_ms: 10.0,
            fft_bins: 1024,
            band_count: 32,
            waveform_samples: 1024,
            low_band_cutoff_hz: 250.0,
            high_band_cutoff_hz: 4_000.0,
            distance_factor: 1.0,
            rolloff_factor: 1.0,
            doppler_factor: 1.0,
            level_metering_window_s: 0.3,
            resync_threshold: 0.15,
            resync_offset_s: 0.05,
            log_audio: true,
            log_audio_render: false,
        }
    }
}

/// Mirror of [`Config`] with every field optional, used to parse a partial
/// TOML document without requiring every key to be present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConfigFile {
    sample_rate_hz: Option<u32>,
    update_period_ms: Option<f64>,
    playback_buffer_ms: Option<f64>,
    device_buffer_ms: Option<f64>,
    fft_bins: Option<usize>,
    band_count: Option<usize>,
    waveform_samples: Option<usize>,
    low_band_cutoff_hz: Option<f64>,
    high_band_cutoff_hz: Option<f64>,
    distance_factor: Option<f64>,
    rolloff_factor: Option<f64>,
    doppler_factor: Option<f64>,
    level_metering_window_s: Option<f64>,
    resync_threshold: Option<f64>,
    resync_offset_s: Option<f64>,
    log_audio: Option<bool>,
    log_audio_render: Option<bool>,
}

impl Config {
    /// Whether a gated log category should emit at `debug`/`trace` level.
    #[inline]
    pub fn log_enabled(&self, category: LogCategory) -> bool {
        match category {
            LogCategory::Audio => self.log_audio,
            LogCategory::AudioRender => self.log_audio_render,
        }
    }

    /// Load configuration layered as: built-in defaults, then an optional
    /// TOML file, then `SCENEFORGE_*` environment overrides. Each layer may
    /// override individual fields without specifying the rest.
    pub fn load(toml_path: Option<&Path>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = toml_path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                let file: ConfigFile = toml::from_str(&text).map_err(|e| EngineError::Config {
                    key: path.display().to_string(),
                    reason: e.to_string(),
                })?;
                config.apply_file(file);
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = file.$field {
                    self.$field = v;
                }
            };
        }
        take!(sample_rate_hz);
        take!(update_period_ms);
        take!(playback_buffer_ms);
        take!(device_buffer_ms);
        take!(fft_bins);
        take!(band_count);
        take!(waveform_samples);
        take!(low_band_cutoff_hz);
        take!(high_band_cutoff_hz);
        take!(distance_factor);
        take!(rolloff_factor);
        take!(doppler_factor);
        take!(level_metering_window_s);
        take!(resync_threshold);
        take!(resync_offset_s);
        take!(log_audio);
        take!(log_audio_render);
    }

    fn apply_env(&mut self) {
        macro_rules! env_override {
            ($field:ident, $env_name:literal) => {
                if let Ok(raw) = env::var(concat!("SCENEFORGE_", $env_name)) {
                    match raw.parse() {
                        Ok(v) => self.$field = v,
                        Err(_) => log::warn!(
                            "ignoring malformed env override {}={}",
                            concat!("SCENEFORGE_", $env_name),
                            raw
                        ),
                    }
                }
            };
        }
        env_override!(sample_rate_hz, "SAMPLE_RATE_HZ");
        env_override!(fft_bins, "FFT_BINS");
        env_override!(band_count, "BAND_COUNT");
        env_override!(level_metering_window_s, "LEVEL_METERING_WINDOW_S");
        env_override!(log_audio, "LOG_AUDIO");
        env_override!(log_audio_render, "LOG_AUDIO_RENDER");
    }

    /// Reject configurations that would make the analysis context or mixer
    /// misbehave. Invalid fields are reported by key; the caller decides
    /// whether to fall back to defaults (per §7, config failures never abort
    /// startup on their own).
    pub fn validate(&self) -> EngineResult<()> {
        if !self.fft_bins.is_power_of_two() || self.fft_bins < 64 {
            return Err(EngineError::Config {
                key: "fft_bins".into(),
                reason: "must be a power of two >= 64".into(),
            });
        }
        if self.level_metering_window_s <= 0.0 {
            return Err(EngineError::Config {
                key: "level_metering_window_s".into(),
                reason: "must be positive".into(),
            });
        }
        if self.band_count == 0 {
            return Err(EngineError::Config {
                key: "band_count".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let mut c = Config::default();
        c.fft_bins = 1000;
        assert!(c.validate().is_err());
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("sf-core-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sceneforge.toml");
        std::fs::write(&path, "band_count = 16\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.band_count, 16);
        assert_eq!(config.fft_bins, 1024); // untouched default

        std::fs::remove_dir_all(&dir).ok();
    }
}
