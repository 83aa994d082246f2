//! Operator Stream Base + Stereo / Spatial variants (C4).
//!
//! The stereo/spatial hierarchy is a tagged enum with a shared operation set
//! implemented as inherent methods dispatching on the tag; only the truly
//! variant-specific operations (pan for stereo; cone/position/orientation/
//! mode for spatial) are separate methods.

use sf_audio::{DecodeFlags, DecodeStreamHandle, MixerHandle, NativeBackend, Spatial3DParams};
use sf_core::EngineResult;

const MIN_SPEED: f32 = 0.1;
const MAX_SPEED: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode3D {
    Normal,
    Relative,
    Off,
}

/// State shared by both operator variants.
#[derive(Debug, Clone)]
pub struct Common {
    stream: DecodeStreamHandle,
    duration_seconds: f64,
    current_volume: f32,
    user_mute: bool,
    current_speed: f32,
    playing: bool,
    stale: bool,
    export_cursor_frames: f64,
}

impl Common {
    fn load(backend: &mut dyn NativeBackend, path: &str, flags: DecodeFlags) -> EngineResult<Self> {
        let stream = backend.create_decode_stream(path, flags)?;
        let duration_seconds = backend.stream_duration_seconds(stream);
        backend.set_paused(stream, true);
        Ok(Self {
            stream,
            duration_seconds,
            current_volume: 1.0,
            user_mute: false,
            current_speed: 1.0,
            playing: false,
            stale: false,
            export_cursor_frames: 0.0,
        })
    }
}

/// A per-operator playback stream: stereo feeds the Operator submix, spatial
/// plays directly to the device with hardware 3D.
pub enum OperatorStream {
    Stereo {
        common: Common,
        pan: f32,
    },
    Spatial {
        common: Common,
        export_stream: Option<DecodeStreamHandle>,
        position: [f32; 3],
        velocity: [f32; 3],
        orientation: [f32; 3],
        inner_cone_deg: f32,
        outer_cone_deg: f32,
        outer_cone_volume: f32,
        min_distance: f32,
        max_distance: f32,
        mode: Mode3D,
        attenuation: f32,
        beyond_max_distance: bool,
        apply3d_needed: bool,
    },
}

impl OperatorStream {
    pub fn load_stereo(backend: &mut dyn NativeBackend, path: &str, mixer: MixerHandle) -> EngineResult<Self> {
        let common = Common::load(backend, path, DecodeFlags { looping: false, spatial: false })?;
        backend.attach(common.stream, mixer);
        Ok(Self::Stereo { common, pan: 0.0 })
    }

    pub fn load_spatial(backend: &mut dyn NativeBackend, path: &str, device_mixer: MixerHandle) -> EngineResult<Self> {
        let common = Common::load(backend, path, DecodeFlags { looping: false, spatial: true })?;
        // Per the native contract, attach is accepted for API symmetry but
        // ignored for spatial streams: they route device-direct.
        backend.attach(common.stream, device_mixer);
        Ok(Self::Spatial {
            common,
            export_stream: None,
            position: [0.0; 3],
            velocity: [0.0; 3],
            orientation: [0.0, 0.0, 1.0],
            inner_cone_deg: 360.0,
            outer_cone_deg: 360.0,
            outer_cone_volume: 1.0,
            min_distance: 1.0,
            max_distance: 100.0,
            mode: Mode3D::Normal,
            attenuation: 1.0,
            beyond_max_distance: false,
            apply3d_needed: false,
        })
    }

    fn common(&self) -> &Common {
        match self {
            Self::Stereo { common, .. } => common,
            Self::Spatial { common, .. } => common,
        }
    }

    fn common_mut(&mut self) -> &mut Common {
        match self {
            Self::Stereo { common, .. } => common,
            Self::Spatial { common, .. } => common,
        }
    }

    pub fn stream_handle(&self) -> DecodeStreamHandle {
        self.common().stream
    }

    pub fn duration_seconds(&self) -> f64 {
        self.common().duration_seconds
    }

    pub fn is_playing(&self) -> bool {
        self.common().playing
    }

    pub fn is_stale(&self) -> bool {
        self.common().stale
    }

    /// `play`/`stop` fire only on rising edges; callers are expected to
    /// edge-detect before calling these (the orchestrator owns that state).
    pub fn play(&mut self, backend: &mut dyn NativeBackend) {
        let stream = self.stream_handle();
        backend.set_paused(stream, false);
        self.common_mut().playing = true;
        self.common_mut().stale = false;
    }

    pub fn stop(&mut self, backend: &mut dyn NativeBackend) {
        let stream = self.stream_handle();
        backend.set_position(stream, 0.0);
        backend.set_paused(stream, true);
        self.common_mut().playing = false;
    }

    pub fn pause(&mut self, backend: &mut dyn NativeBackend) {
        backend.set_paused(self.stream_handle(), true);
    }

    pub fn resume(&mut self, backend: &mut dyn NativeBackend) {
        if !self.common().stale {
            backend.set_paused(self.stream_handle(), false);
        }
    }

    pub fn seek(&mut self, backend: &mut dyn NativeBackend, seconds: f64) {
        backend.set_position(self.stream_handle(), seconds);
    }

    pub fn current_position_seconds(&self, backend: &dyn NativeBackend) -> f64 {
        backend.position_seconds(self.stream_handle())
    }

    pub fn set_volume(&mut self, v: f32, mute: bool) {
        let common = self.common_mut();
        common.current_volume = v.clamp(0.0, 1.0);
        common.user_mute = mute;
    }

    pub fn set_speed(&mut self, backend: &mut dyn NativeBackend, speed: f32) {
        let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.common_mut().current_speed = clamped;
        backend.set_frequency_ratio(self.stream_handle(), clamped);
    }

    /// Effective output level: 0 while silent/paused/stale, else the peak
    /// over the metering window (reflects volume already applied).
    pub fn get_level(&self, backend: &dyn NativeBackend) -> f32 {
        if self.common().stale || !self.common().playing || self.effective_volume() == 0.0 {
            0.0
        } else {
            backend.stream_level(self.stream_handle())
        }
    }

    /// Mute composition (§4.4.1): 0 when user-muted, stale, or (spatial
    /// only) beyond max distance; else current volume times distance
    /// attenuation for spatial, or current volume alone for stereo.
    pub fn effective_volume(&self) -> f32 {
        let common = self.common();
        if common.user_mute || common.stale {
            return 0.0;
        }
        match self {
            Self::Stereo { .. } => common.current_volume,
            Self::Spatial { attenuation, beyond_max_distance, .. } => {
                if *beyond_max_distance {
                    0.0
                } else {
                    common.current_volume * attenuation
                }
            }
        }
    }

    pub fn apply_volume(&mut self, backend: &mut dyn NativeBackend) {
        let level = self.effective_volume();
        backend.set_volume(self.stream_handle(), level);
    }

    /// Marks the operator stale or fresh. Stereo keeps the stream alive at
    /// zero volume (for instant resume); spatial pauses and rewinds, since
    /// hardware 3D state cannot be meaningfully held.
    pub fn set_stale(&mut self, backend: &mut dyn NativeBackend, stale: bool) {
        if self.common().stale == stale {
            return;
        }
        self.common_mut().stale = stale;
        match self {
            Self::Stereo { .. } => {
                self.apply_volume(backend);
            }
            Self::Spatial { .. } => {
                if stale {
                    let stream = self.stream_handle();
                    backend.set_paused(stream, true);
                    backend.set_position(stream, 0.0);
                }
            }
        }
    }

    pub fn set_pan(&mut self, backend: &mut dyn NativeBackend, pan: f32) {
        if let Self::Stereo { pan: p, .. } = self {
            *p = pan.clamp(-1.0, 1.0);
            backend.set_volume(self.stream_handle(), self.effective_volume());
        }
    }

    pub fn pan(&self) -> Option<f32> {
        match self {
            Self::Stereo { pan, .. } => Some(*pan),
            Self::Spatial { .. } => None,
        }
    }

    /// 3D update (§4.4.3): recomputes velocity and linear attenuation,
    /// stores the new spatial attributes, and flags `Apply3D` as needed.
    #[allow(clippy::too_many_arguments)]
    pub fn update_spatial(
        &mut self,
        backend: &mut dyn NativeBackend,
        position: [f32; 3],
        min_distance: f32,
        max_distance: f32,
        orientation: [f32; 3],
        inner_cone_deg: f32,
        outer_cone_deg: f32,
        outer_cone_volume: f32,
        mode: Mode3D,
        listener_position: [f32; 3],
    ) {
        let Self::Spatial {
            position: pos,
            velocity,
            orientation: orient,
            inner_cone_deg: inner,
            outer_cone_deg: outer,
            outer_cone_volume: outer_vol,
            min_distance: min_d,
            max_distance: max_d,
            mode: m,
            attenuation,
            beyond_max_distance,
            apply3d_needed,
            ..
        } = self
        else {
            return;
        };

        // Velocity uses a fixed 60 Hz reference regardless of actual frame
        // duration, matching the source behavior; see DESIGN.md.
        *velocity = [(position[0] - pos[0]) * 60.0, (position[1] - pos[1]) * 60.0, (position[2] - pos[2]) * 60.0];
        *pos = position;
        *orient = orientation;
        *inner = inner_cone_deg.clamp(0.0, 360.0);
        *outer = outer_cone_deg.clamp(0.0, 360.0);
        *outer_vol = outer_cone_volume.clamp(0.0, 1.0);
        *min_d = min_distance.max(0.01);
        *max_d = max_distance.max(*min_d + 0.1);
        *m = mode;

        let listener_distance = {
            let d = [listener_position[0] - pos[0], listener_position[1] - pos[1], listener_position[2] - pos[2]];
            (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
        };
        *attenuation = sf_audio::distance_attenuation(listener_distance, *min_d, *max_d);
        *beyond_max_distance = listener_distance >= *max_d;
        *apply3d_needed = true;

        let params = Spatial3DParams {
            position: *pos,
            velocity: *velocity,
            orientation: *orient,
            min_distance: *min_d,
            max_distance: *max_d,
            cone_inner_angle_deg: *inner,
            cone_outer_angle_deg: *outer,
            cone_outer_gain: *outer_vol,
        };
        backend.set_3d_params(self.stream_handle(), params);
        self.apply_volume(backend);
    }

    pub fn take_apply3d_needed(&mut self) -> bool {
        match self {
            Self::Spatial { apply3d_needed, .. } => std::mem::take(apply3d_needed),
            Self::Stereo { .. } => false,
        }
    }

    /// Export preparation (§4.4.1): mute, pause, reset position, mark
    /// stale; spatial additionally opens an auxiliary export decode stream.
    pub fn prepare_for_export(&mut self, backend: &mut dyn NativeBackend, path: &str) -> EngineResult<()> {
        let stream = self.stream_handle();
        backend.set_volume(stream, 0.0);
        backend.set_paused(stream, true);
        backend.set_position(stream, 0.0);
        self.common_mut().stale = true;
        self.common_mut().export_cursor_frames = 0.0;

        if let Self::Spatial { export_stream, .. } = self {
            let aux = backend.create_decode_stream(path, DecodeFlags { looping: false, spatial: false })?;
            *export_stream = Some(aux);
        }
        Ok(())
    }

    pub fn restart_after_export(&mut self, backend: &mut dyn NativeBackend) {
        if let Self::Spatial { export_stream, .. } = self {
            if let Some(aux) = export_stream.take() {
                backend.destroy_decode_stream(aux);
            }
        }
        self.common_mut().stale = false;
    }

    /// Export rendering (§4.4.4): speed-warps and resamples the clip into
    /// `out_left`/`out_right` (stereo) for `dur_sec`, applying distance/cone/
    /// pan in software for spatial streams. Reads from the live decode
    /// stream (stereo) or the auxiliary export decode stream (spatial),
    /// starting at the internally tracked export cursor. Returns the number
    /// of frames written before the clip ended.
    pub fn render_audio(
        &mut self,
        backend: &dyn NativeBackend,
        dur_sec: f64,
        target_rate: u32,
        listener_position: [f32; 3],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) -> usize {
        let source_stream = match self {
            Self::Stereo { common, .. } => common.stream,
            Self::Spatial { export_stream, common, .. } => export_stream.unwrap_or(common.stream),
        };
        let (_channels, native_rate) = backend.stream_channels_and_rate(source_stream);
        let decoded = backend.stream_raw_channels(source_stream);

        let speed = self.common().current_speed as f64;
        let frames_out = out_left.len().min(out_right.len());
        let warped_native_rate = native_rate as f64 / speed;
        let step = warped_native_rate / target_rate as f64;
        let cursor_start = self.common().export_cursor_frames;
        let num_native_channels = decoded.len().max(1);
        let mut written = 0usize;

        let current_volume = self.common().current_volume;
        let (pan_l, pan_r, gain) = match self {
            Self::Spatial {
                attenuation,
                outer_cone_volume,
                inner_cone_deg,
                outer_cone_deg,
                beyond_max_distance,
                position,
                orientation,
                ..
            } => {
                if *beyond_max_distance {
                    (0.0, 0.0, 0.0)
                } else {
                    let angle = sf_audio::cone_angle_deg(*orientation, *position, listener_position);
                    let cone_gain = sf_audio::cone_attenuation(angle, *inner_cone_deg, *outer_cone_deg, *outer_cone_volume);
                    let (l, r) = sf_audio::equal_power_pan(0.0);
                    (l, r, current_volume * *attenuation * cone_gain)
                }
            }
            Self::Stereo { pan, .. } => {
                let (l, r) = sf_audio::equal_power_pan(*pan);
                (l, r, current_volume)
            }
        };

        for i in 0..frames_out {
            let pos = cursor_start + i as f64 * step;
            let i0 = pos.floor() as i64;
            if i0 < 0 || decoded.is_empty() || i0 as usize >= decoded[0].len() {
                break;
            }
            let frac = (pos - i0 as f64) as f32;
            let ch0 = &decoded[0];
            let s0 = ch0[i0 as usize];
            let s1 = ch0.get(i0 as usize + 1).copied().unwrap_or(s0);
            let mono_or_left = s0 + (s1 - s0) * frac;

            let right_src = if num_native_channels >= 2 {
                let ch1 = &decoded[1];
                let r0 = ch1[i0 as usize];
                let r1 = ch1.get(i0 as usize + 1).copied().unwrap_or(r0);
                r0 + (r1 - r0) * frac
            } else {
                mono_or_left
            };

            match self {
                Self::Spatial { .. } => {
                    out_left[i] = mono_or_left * pan_l * gain;
                    out_right[i] = mono_or_left * pan_r * gain;
                }
                Self::Stereo { .. } => {
                    out_left[i] = mono_or_left * pan_l * gain;
                    out_right[i] = right_src * pan_r * gain;
                }
            }
            written += 1;
        }
        self.common_mut().export_cursor_frames = cursor_start + dur_sec * native_rate as f64 * speed;
        written
    }

    pub fn dispose(&mut self, backend: &mut dyn NativeBackend) {
        backend.destroy_decode_stream(self.stream_handle());
        if let Self::Spatial { export_stream, .. } = self {
            if let Some(aux) = export_stream.take() {
                backend.destroy_decode_stream(aux);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_audio::{MixerKind, MockBackend, SyntheticClip};

    fn backend_with_clip() -> (MockBackend, MixerHandle) {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("tone.wav", SyntheticClip::sine(440.0, 48_000, 48_000));
        let mixer = backend.create_mixer(MixerKind::OperatorSubmix).unwrap();
        (backend, mixer)
    }

    #[test]
    fn mute_silences_regardless_of_volume() {
        let (mut backend, mixer) = backend_with_clip();
        let mut op = OperatorStream::load_stereo(&mut backend, "tone.wav", mixer).unwrap();
        op.set_volume(1.0, true);
        assert_eq!(op.effective_volume(), 0.0);
    }

    #[test]
    fn stale_silences_stereo_but_keeps_stream_alive() {
        let (mut backend, mixer) = backend_with_clip();
        let mut op = OperatorStream::load_stereo(&mut backend, "tone.wav", mixer).unwrap();
        op.set_volume(1.0, false);
        op.play(&mut backend);
        op.set_stale(&mut backend, true);
        assert_eq!(op.effective_volume(), 0.0);
        assert!(op.is_playing());
    }

    #[test]
    fn spatial_beyond_max_distance_is_silent() {
        let (mut backend, mixer) = backend_with_clip();
        let mut op = OperatorStream::load_spatial(&mut backend, "tone.wav", mixer).unwrap();
        op.set_volume(1.0, false);
        op.update_spatial(&mut backend, [0.0, 0.0, 0.0], 1.0, 10.0, [0.0, 0.0, 1.0], 360.0, 360.0, 1.0, Mode3D::Normal, [0.0, 0.0, 20.0]);
        assert_eq!(op.effective_volume(), 0.0);
    }

    #[test]
    fn spatial_attenuation_matches_linear_formula() {
        let (mut backend, mixer) = backend_with_clip();
        let mut op = OperatorStream::load_spatial(&mut backend, "tone.wav", mixer).unwrap();
        op.update_spatial(&mut backend, [0.0, 0.0, 0.0], 1.0, 10.0, [0.0, 0.0, 1.0], 360.0, 360.0, 1.0, Mode3D::Normal, [0.0, 0.0, 5.0]);
        if let OperatorStream::Spatial { attenuation, .. } = &op {
            assert!((*attenuation - (1.0 - 4.0 / 9.0)).abs() < 1e-5);
        } else {
            panic!("expected spatial variant");
        }
    }
}
