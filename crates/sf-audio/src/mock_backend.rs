//! A deterministic, in-process [`NativeBackend`] with no real device or file
//! I/O — used by the CLI harness and by every engine-level test so behavior
//! doesn't depend on what hardware happens to be attached to the runner.

use std::collections::HashMap;

use sf_core::EngineResult;
use sf_dsp::PeakLevelMeter;

use crate::backend::{DecodeFlags, DecodeStreamHandle, MixerHandle, MixerKind, NativeBackend, Spatial3DParams};
use crate::playback::{cone_angle_deg, cone_attenuation, distance_attenuation, equal_power_pan, DecodeStream};

/// A named, synthetic clip the mock backend can hand out by path instead of
/// decoding a real file.
#[derive(Debug, Clone)]
pub struct SyntheticClip {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl SyntheticClip {
    /// A clip of silence, useful when only timing/routing matters to a test.
    pub fn silence(num_frames: usize, sample_rate: u32) -> Self {
        Self {
            channels: vec![vec![0.0; num_frames], vec![0.0; num_frames]],
            sample_rate,
        }
    }

    /// A mono sine tone, duplicated to stereo.
    pub fn sine(frequency_hz: f64, num_frames: usize, sample_rate: u32) -> Self {
        let mut mono = Vec::with_capacity(num_frames);
        for n in 0..num_frames {
            let t = n as f64 / sample_rate as f64;
            mono.push((2.0 * std::f64::consts::PI * frequency_hz * t).sin() as f32);
        }
        Self {
            channels: vec![mono.clone(), mono],
            sample_rate,
        }
    }
}

struct Mixer {
    kind: MixerKind,
    streams: Vec<DecodeStreamHandle>,
    meter: PeakLevelMeter,
}

/// Deterministic native backend used by tests and [`crate`]'s CLI harness.
///
/// Clips are registered ahead of time by path with [`MockBackend::register_clip`];
/// `create_decode_stream` looks them up instead of touching the filesystem.
pub struct MockBackend {
    sample_rate_hz: u32,
    clips: HashMap<String, SyntheticClip>,
    streams: HashMap<DecodeStreamHandle, DecodeStream>,
    mixers: HashMap<MixerHandle, Mixer>,
    device_direct: Vec<DecodeStreamHandle>,
    listener_position: [f32; 3],
    next_mixer_id: u64,
    next_stream_id: u64,
}

impl MockBackend {
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            clips: HashMap::new(),
            streams: HashMap::new(),
            mixers: HashMap::new(),
            device_direct: Vec::new(),
            listener_position: [0.0; 3],
            next_mixer_id: 0,
            next_stream_id: 0,
        }
    }

    pub fn register_clip(&mut self, path: impl Into<String>, clip: SyntheticClip) {
        self.clips.insert(path.into(), clip);
    }

    fn mix_mixer(&mut self, handle: MixerHandle, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];

        let stream_ids: Vec<DecodeStreamHandle> = match self.mixers.get(&handle) {
            Some(m) => m.streams.clone(),
            None => return (left, right),
        };
        for id in &stream_ids {
            if let Some(stream) = self.streams.get_mut(id) {
                stream.mix_into(frames, self.sample_rate_hz, &mut left, &mut right);
            }
        }

        if matches!(self.mixers.get(&handle).map(|m| m.kind), Some(MixerKind::Global)) {
            self.mix_device_direct(frames, &mut left, &mut right);
        }

        if let Some(mixer) = self.mixers.get_mut(&handle) {
            mixer.meter.process_block(&left);
            mixer.meter.process_block(&right);
        }
        (left, right)
    }

    fn mix_device_direct(&mut self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        let sample_rate = self.sample_rate_hz;
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

impl NativeBackend for MockBackend {
    fn create_mixer(&mut self, kind: MixerKind) -> EngineResult<MixerHandle> {
        let handle = MixerHandle(self.next_mixer_id);
        self.next_mixer_id += 1;
        let meter = PeakLevelMeter::new(self.sample_rate_hz as f64, 0.3);
        self.mixers.insert(handle, Mixer { kind, streams: Vec::new(), meter });
        Ok(handle)
    }

    fn destroy_mixer(&mut self, mixer: MixerHandle) {
        self.mixers.remove(&mixer);
    }

    fn create_decode_stream(&mut self, path: &str, flags: DecodeFlags) -> EngineResult<DecodeStreamHandle> {
        let clip = self.clips.get(path).cloned().unwrap_or_else(|| {
            log::warn!("mock backend: no clip registered for '{path}', substituting silence");
            SyntheticClip::silence(self.sample_rate_hz as usize, self.sample_rate_hz)
        });
        let handle = DecodeStreamHandle(self.next_stream_id);
        self.next_stream_id += 1;
        let mut stream = DecodeStream::new(clip.channels, clip.sample_rate);
        stream.looping = flags.looping;
        if flags.spatial {
            stream.spatial = Some(Spatial3DParams::default());
        }
        self.streams.insert(handle, stream);
        Ok(handle)
    }

    fn destroy_decode_stream(&mut self, stream: DecodeStreamHandle) {
        self.streams.remove(&stream);
        self.device_direct.retain(|s| *s != stream);
        for mixer in self.mixers.values_mut() {
            mixer.streams.retain(|s| *s != stream);
        }
    }

    fn attach(&mut self, stream: DecodeStreamHandle, mixer: MixerHandle) {
        let is_spatial = self.streams.get(&stream).map(|s| s.spatial.is_some()).unwrap_or(false);
        if is_spatial {
            if !self.device_direct.contains(&stream) {
                self.device_direct.push(stream);
            }
        } else if let Some(m) = self.mixers.get_mut(&mixer) {
            if !m.streams.contains(&stream) {
                m.streams.push(stream);
            }
        }
    }

    fn detach(&mut self, stream: DecodeStreamHandle) {
        self.device_direct.retain(|s| *s != stream);
        for mixer in self.mixers.values_mut() {
            mixer.streams.retain(|s| *s != stream);
        }
    }

    fn set_position(&mut self, stream: DecodeStreamHandle, seconds: f64) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.set_position_seconds(seconds);
        }
    }

    fn position_seconds(&self, stream: DecodeStreamHandle) -> f64 {
        self.streams.get(&stream).map(|s| s.position_seconds()).unwrap_or(0.0)
    }

    fn set_paused(&mut self, stream: DecodeStreamHandle, paused: bool) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.paused = paused;
        }
    }

    fn set_volume(&mut self, stream: DecodeStreamHandle, volume: f32) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.volume = volume;
        }
    }

    fn set_frequency_ratio(&mut self, stream: DecodeStreamHandle, ratio: f32) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.freq_ratio = ratio;
        }
    }

    fn set_3d_params(&mut self, stream: DecodeStreamHandle, params: Spatial3DParams) {
        if let Some(s) = self.streams.get_mut(&stream) {
            s.spatial = Some(params);
        }
    }

    fn set_listener_position(&mut self, position: [f32; 3]) {
        self.listener_position = position;
    }

    fn stream_channels_and_rate(&self, stream: DecodeStreamHandle) -> (u16, u32) {
        self.streams
            .get(&stream)
            .map(|s| (s.channels.len() as u16, s.clip_sample_rate))
            .unwrap_or((2, self.sample_rate_hz))
    }

    fn stream_duration_seconds(&self, stream: DecodeStreamHandle) -> f64 {
        self.streams
            .get(&stream)
            .map(|s| s.num_frames() as f64 / s.clip_sample_rate as f64)
            .unwrap_or(0.0)
    }

    fn read_block(&mut self, mixer: MixerHandle, frames: usize) -> (Vec<f32>, Vec<f32>) {
        self.mix_mixer(mixer, frames)
    }

    fn peak_level(&self, mixer: MixerHandle, _window_seconds: f64) -> f32 {
        self.mixers.get(&mixer).map(|m| m.meter.level()).unwrap_or(0.0)
    }

    fn stream_level(&self, stream: DecodeStreamHandle) -> f32 {
        self.streams.get(&stream).map(|s| s.level()).unwrap_or(0.0)
    }

    fn stream_raw_channels(&self, stream: DecodeStreamHandle) -> Vec<Vec<f32>> {
        self.streams.get(&stream).map(|s| s.channels.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plays_registered_clip_through_mixer() {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("tone.wav", SyntheticClip::sine(440.0, 4800, 48_000));

        let mixer = backend.create_mixer(MixerKind::OperatorSubmix).unwrap();
        let stream = backend.create_decode_stream("tone.wav", DecodeFlags::default()).unwrap();
        backend.attach(stream, mixer);
        backend.set_paused(stream, false);

        let (left, _right) = backend.read_block(mixer, 256);
        assert!(left.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn missing_clip_substitutes_silence() {
        let mut backend = MockBackend::new(48_000);
        let mixer = backend.create_mixer(MixerKind::Global).unwrap();
        let stream = backend
            .create_decode_stream("does-not-exist.wav", DecodeFlags::default())
            .unwrap();
        backend.attach(stream, mixer);
        backend.set_paused(stream, false);

        let (left, right) = backend.read_block(mixer, 128);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn spatial_stream_bypasses_mixer_attachment() {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("tone.wav", SyntheticClip::sine(440.0, 4800, 48_000));

        let global = backend.create_mixer(MixerKind::Global).unwrap();
        let operator_submix = backend.create_mixer(MixerKind::OperatorSubmix).unwrap();
        let stream = backend
            .create_decode_stream("tone.wav", DecodeFlags { spatial: true, ..Default::default() })
            .unwrap();
        // Attach targets the operator submix, but since the stream is
        // spatial this should land in the device-direct path instead.
        backend.attach(stream, operator_submix);
        backend.set_paused(stream, false);

        assert!(backend.mixers.get(&operator_submix).unwrap().streams.is_empty());
        let (left, _right) = backend.read_block(global, 256);
        assert!(left.iter().any(|&s| s.abs() > 0.0));
    }
}
