//! Real native backend: device output via `cpal`, file decode via `symphonia`.
//!
//! `cpal` has no hardware 3D panning API, so spatial streams are mixed in
//! software here using the same distance/cone/equal-power-pan math the
//! export renderer uses offline, against the listener position last set via
//! [`NativeBackend::set_listener_position`] — the native library this trait
//! models would do that work on dedicated hardware; this backend does it on
//! CPU.

use std::collections::HashMap;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use parking_lot::Mutex;

use sf_core::{EngineError, EngineResult};
use sf_dsp::PeakLevelMeter;

use crate::backend::{DecodeFlags, DecodeStreamHandle, MixerHandle, MixerKind, NativeBackend, Spatial3DParams};
use crate::decode::decode_file;
use crate::device::get_default_output_device;
use crate::playback::{cone_angle_deg, cone_attenuation, distance_attenuation, equal_power_pan, DecodeStream};
use crate::AudioResult;

struct Mixer {
    kind: MixerKind,
    streams: Vec<DecodeStreamHandle>,
    meter: PeakLevelMeter,
}

struct Shared {
    streams: HashMap<DecodeStreamHandle, DecodeStream>,
    mixers: HashMap<MixerHandle, Mixer>,
    device_direct: Vec<DecodeStreamHandle>,
    sample_rate_hz: u32,
    listener_position: [f32; 3],
}

impl Shared {
    fn mix_mixer(&mut self, handle: MixerHandle, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        let sample_rate = self.sample_rate_hz;

        let stream_ids: Vec<DecodeStreamHandle> = match self.mixers.get(&handle) {
            Some(m) => m.streams.clone(),
            None => return (left, right),
        };
        for id in &stream_ids {
            if let Some(stream) = self.streams.get_mut(id) {
                stream.mix_into(frames, sample_rate, &mut left, &mut right);
            }
        }

        if matches!(self.mixers.get(&handle).map(|m| m.kind), Some(MixerKind::Global)) {
            self.mix_device_direct(frames, sample_rate, &mut left, &mut right);
        }

        if let Some(mixer) = self.mixers.get_mut(&handle) {
            mixer.meter.process_block(&left);
            mixer.meter.process_block(&right);
        }
        (left, right)
    }

    fn mix_device_direct(&mut self, frames: usize, sample_rate: u32, left: &mut [f32], right: &mut [f32]) {
        let ids = self.device_direct.clone();
        for id in ids {
            let Some(stream) = self.streams.get_mut(&id) else { continue };
            let Some(params) = stream.spatial else { continue };
            let mut src_left = vec![0.0f32; frames];
            let mut src_right = vec![0.0f32; frames];
            stream.mix_into(frames, sample_rate, &mut src_left, &mut src_right);

            let listener = self.listener_position;
            let to_listener = [
                listener[0] - params.position[0],
                listener[1] - params.position[1],
                listener[2] - params.position[2],
            ];
            let distance = (to_listener[0].powi(2) + to_listener[1].powi(2) + to_listener[2].powi(2)).sqrt();
            let dist_gain = distance_attenuation(distance, params.min_distance, params.max_distance);
            let angle = cone_angle_deg(params.orientation, params.position, listener);
            let cone_gain = cone_attenuation(angle, params.cone_inner_angle_deg, params.cone_outer_angle_deg, params.cone_outer_gain);
            let (pan_l, pan_r) = equal_power_pan(0.0);
            let gain = dist_gain * cone_gain;

            for i in 0..frames {
                left[i] += src_left[i] * gain * pan_l;
                right[i] += src_right[i] * gain * pan_r;
            }
        }
    }
}

pub struct CpalSymphoniaBackend {
    shared: Arc<Mutex<Shared>>,
    _output_stream: Stream,
    next_mixer_id: u64,
    next_stream_id: u64,
}

impl CpalSymphoniaBackend {
    pub fn new() -> AudioResult<Self> {
        let device = get_default_output_device()?;
        let config = device
            .default_output_config()
            .map_err(|e| crate::AudioError::ConfigError(e.to_string()))?;
        let sample_rate_hz = config.sample_rate();
        let channels = config.channels() as usize;

        let shared = Arc::new(Mutex::new(Shared {
            streams: HashMap::new(),
            mixers: HashMap::new(),
            device_direct: Vec::new(),
            sample_rate_hz,
            listener_position: [0.0; 3],
        }));

        let callback_shared = Arc::clone(&shared);
        let stream_config: StreamConfig = config.clone().into();
        let sample_format = config.sample_format();

        let output_stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _| {
                        fill_from_global(&callback_shared, data, channels);
                    },
                    |err| log::error!("audio output stream error: {err}"),
                    None,
                )
                .map_err(|e| crate::AudioError::StreamBuildError(e.to_string()))?,
            other => {
                return Err(crate::AudioError::ConfigError(format!(
                    "unsupported output sample format: {other:?}"
                )))
            }
        };
        output_stream
            .play()
            .map_err(|e| crate::AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            shared,
            _output_stream: output_stream,
            next_mixer_id: 0,
            next_stream_id: 0,
        })
    }
}

fn fill_from_global(shared: &Arc<Mutex<Shared>>, data: &mut [f32], channels: usize) {
    let frames = data.len() / channels.max(1);
    let global = {
        let inner = shared.lock();
        inner.mixers.iter().find(|(_, m)| m.kind == MixerKind::Global).map(|(h, _)| *h)
    };
    let Some(handle) = global else {
        data.fill(0.0);
        return;
    };
    let (left, right) = shared.lock().mix_mixer(handle, frames);
    for (i, chunk) in data.chunks_mut(channels).enumerate() {
        let l = left.get(i).copied().unwrap_or(0.0);
        let r = right.get(i).copied().unwrap_or(l);
        match chunk.len() {
            1 => chunk[0] = (l + r) * 0.5,
            _ => {
                chunk[0] = l;
                if chunk.len() > 1 {
                    chunk[1] = r;
                }
                for s in chunk.iter_mut().skip(2) {
                    *s = 0.0;
                }
            }
        }
    }
}

impl NativeBackend for CpalSymphoniaBackend {
    fn create_mixer(&mut self, kind: MixerKind) -> EngineResult<MixerHandle> {
        let handle = MixerHandle(self.next_mixer_id);
        self.next_mixer_id += 1;
        let mut shared = self.shared.lock();
        let meter = PeakLevelMeter::new(shared.sample_rate_hz as f64, 0.3);
        shared.mixers.insert(handle, Mixer { kind, streams: Vec::new(), meter });
        Ok(handle)
    }

    fn destroy_mixer(&mut self, mixer: MixerHandle) {
        self.shared.lock().mixers.remove(&mixer);
    }

    fn create_decode_stream(&mut self, path: &str, flags: DecodeFlags) -> EngineResult<DecodeStreamHandle> {
        let decoded = decode_file(path).map_err(|e| EngineError::StreamLoad {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let handle = DecodeStreamHandle(self.next_stream_id);
        self.next_stream_id += 1;
        let mut stream = DecodeStream::new(decoded.channels, decoded.sample_rate);
        stream.looping = flags.looping;
        if flags.spatial {
            stream.spatial = Some(Spatial3DParams::default());
        }
        self.shared.lock().streams.insert(handle, stream);
        Ok(handle)
    }

    fn destroy_decode_stream(&mut self, stream: DecodeStreamHandle) {
        let mut shared = self.shared.lock();
        shared.streams.remove(&stream);
        shared.device_direct.retain(|s| *s != stream);
        for mixer in shared.mixers.values_mut() {
            mixer.streams.retain(|s| *s != stream);
        }
    }

    fn attach(&mut self, stream: DecodeStreamHandle, mixer: MixerHandle) {
        let mut shared = self.shared.lock();
        let is_spatial = shared.streams.get(&stream).map(|s| s.spatial.is_some()).unwrap_or(false);
        if is_spatial {
            if !shared.device_direct.contains(&stream) {
                shared.device_direct.push(stream);
            }
        } else if let Some(m) = shared.mixers.get_mut(&mixer) {
            if !m.streams.contains(&stream) {
                m.streams.push(stream);
            }
        }
    }

    fn detach(&mut self, stream: DecodeStreamHandle) {
        let mut shared = self.shared.lock();
        shared.device_direct.retain(|s| *s != stream);
        for mixer in shared.mixers.values_mut() {
            mixer.streams.retain(|s| *s != stream);
        }
    }

    fn set_position(&mut self, stream: DecodeStreamHandle, seconds: f64) {
        if let Some(s) = self.shared.lock().streams.get_mut(&stream) {
            s.set_position_seconds(seconds);
        }
    }

    fn position_seconds(&self, stream: DecodeStreamHandle) -> f64 {
        self.shared.lock().streams.get(&stream).map(|s| s.position_seconds()).unwrap_or(0.0)
    }

    fn set_paused(&mut self, stream: DecodeStreamHandle, paused: bool) {
        if let Some(s) = self.shared.lock().streams.get_mut(&stream) {
            s.paused = paused;
        }
    }

    fn set_volume(&mut self, stream: DecodeStreamHandle, volume: f32) {
        if let Some(s) = self.shared.lock().streams.get_mut(&stream) {
            s.volume = volume;
        }
    }

    fn set_frequency_ratio(&mut self, stream: DecodeStreamHandle, ratio: f32) {
        if let Some(s) = self.shared.lock().streams.get_mut(&stream) {
            s.freq_ratio = ratio;
        }
    }

    fn set_3d_params(&mut self, stream: DecodeStreamHandle, params: Spatial3DParams) {
        if let Some(s) = self.shared.lock().streams.get_mut(&stream) {
            s.spatial = Some(params);
        }
    }

    fn set_listener_position(&mut self, position: [f32; 3]) {
        self.shared.lock().listener_position = position;
    }

    fn stream_channels_and_rate(&self, stream: DecodeStreamHandle) -> (u16, u32) {
        let shared = self.shared.lock();
        shared
            .streams
            .get(&stream)
            .map(|s| (s.channels.len() as u16, s.clip_sample_rate))
            .unwrap_or((2, shared.sample_rate_hz))
    }

    fn stream_duration_seconds(&self, stream: DecodeStreamHandle) -> f64 {
        let shared = self.shared.lock();
        shared
            .streams
            .get(&stream)
            .map(|s| s.num_frames() as f64 / s.clip_sample_rate as f64)
            .unwrap_or(0.0)
    }

    fn read_block(&mut self, mixer: MixerHandle, frames: usize) -> (Vec<f32>, Vec<f32>) {
        self.shared.lock().mix_mixer(mixer, frames)
    }

    fn peak_level(&self, mixer: MixerHandle, _window_seconds: f64) -> f32 {
        self.shared.lock().mixers.get(&mixer).map(|m| m.meter.level()).unwrap_or(0.0)
    }

    fn stream_level(&self, stream: DecodeStreamHandle) -> f32 {
        self.shared.lock().streams.get(&stream).map(|s| s.level()).unwrap_or(0.0)
    }

    fn stream_raw_channels(&self, stream: DecodeStreamHandle) -> Vec<Vec<f32>> {
        self.shared.lock().streams.get(&stream).map(|s| s.channels.clone()).unwrap_or_default()
    }
}
