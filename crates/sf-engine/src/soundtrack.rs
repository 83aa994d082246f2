//! Soundtrack Clip Stream (C3): a timeline-locked decode stream attached to
//! the Soundtrack submix.

use sf_audio::{DecodeFlags, DecodeStreamHandle, MixerHandle, NativeBackend};
use sf_core::{ClipId, EngineError, EngineResult};

const MAX_DURATION_SECONDS: f64 = 36_000.0;

pub struct SoundtrackClipStream {
    pub clip_id: ClipId,
    stream: DecodeStreamHandle,
    mixer: MixerHandle,
    pub duration_seconds: f64,
    pub native_sample_rate: u32,
    pub native_channels: u16,
    pub target_time: f64,
    pub clip_volume: f32,
    pub in_use_this_frame: bool,
    pub is_soundtrack: bool,
}

impl SoundtrackClipStream {
    /// Loads the clip, attaches it to `mixer` paused, and publishes its
    /// duration. Rejects clips with non-positive or implausibly long
    /// duration.
    pub fn load(
        backend: &mut dyn NativeBackend,
        clip_id: ClipId,
        path: &str,
        mixer: MixerHandle,
    ) -> EngineResult<Self> {
        let stream = backend.create_decode_stream(path, DecodeFlags::default())?;
        let (channels, rate) = backend.stream_channels_and_rate(stream);
        let duration = backend.stream_duration_seconds(stream);
        backend.attach(stream, mixer);
        backend.set_paused(stream, true);

        if duration <= 0.0 || duration > MAX_DURATION_SECONDS {
            backend.destroy_decode_stream(stream);
            return Err(EngineError::InvalidDuration(duration));
        }

        Ok(Self {
            clip_id,
            stream,
            mixer,
            duration_seconds: duration,
            native_sample_rate: rate,
            native_channels: channels,
            target_time: 0.0,
            clip_volume: 1.0,
            in_use_this_frame: false,
            is_soundtrack: false,
        })
    }

    /// Set the published duration explicitly (used when the host supplies it
    /// out of band, since [`NativeBackend`] has no "clip length" query).
    pub fn set_duration(&mut self, seconds: f64) -> EngineResult<()> {
        if seconds <= 0.0 || seconds > MAX_DURATION_SECONDS {
            return Err(EngineError::InvalidDuration(seconds));
        }
        self.duration_seconds = seconds;
        Ok(())
    }

    pub fn stream_handle(&self) -> DecodeStreamHandle {
        self.stream
    }

    pub fn mixer_handle(&self) -> MixerHandle {
        self.mixer
    }

    /// Per-frame sync (§4.3): reconciles the native decode position against
    /// the requested timeline time, pausing outside the clip's span and
    /// resyncing on excess drift.
    #[allow(clippy::too_many_arguments)]
    pub fn sync(
        &mut self,
        backend: &mut dyn NativeBackend,
        target_time: f64,
        clip_start: f64,
        playback_speed: f64,
        resync_threshold: f64,
        resync_offset: f64,
    ) {
        self.target_time = target_time;
        let local = target_time - clip_start;

        if local < 0.0 || local >= self.duration_seconds {
            backend.set_paused(self.stream, true);
            return;
        }

        backend.set_paused(self.stream, false);
        let position = backend.position_seconds(self.stream);
        let drift = (position - local) * playback_speed;

        if drift.abs() > resync_threshold * playback_speed.abs() {
            log::debug!(
                target: "sceneforge::audio",
                "soundtrack clip {} resyncing, drift={drift:.4}s",
                self.clip_id
            );
            backend.set_position(self.stream, local + resync_offset);
        }
    }

    /// Sets native playback frequency from a timeline speed: forward speeds
    /// disable reverse, negative speeds reverse direction, zero pauses.
    pub fn set_speed(&mut self, backend: &mut dyn NativeBackend, speed: f64) {
        if speed == 0.0 {
            backend.set_paused(self.stream, true);
        } else {
            backend.set_frequency_ratio(self.stream, speed.abs() as f32);
        }
    }

    pub fn effective_volume(&self, soundtrack_volume: f32, global_volume: f32, soundtrack_mute: bool, global_mute: bool) -> f32 {
        if soundtrack_mute || global_mute {
            0.0
        } else {
            self.clip_volume * soundtrack_volume * global_volume
        }
    }

    pub fn apply_volume(&self, backend: &mut dyn NativeBackend, soundtrack_volume: f32, global_volume: f32, soundtrack_mute: bool, global_mute: bool) {
        backend.set_volume(self.stream, self.effective_volume(soundtrack_volume, global_volume, soundtrack_mute, global_mute));
    }

    /// Export path (§4.3): seeks the export-submix attachment to the current
    /// target time with a mixer reset; the Export submix itself performs the
    /// resampling.
    pub fn export_seek(&mut self, backend: &mut dyn NativeBackend, record_offset: f64) {
        let local = (self.target_time + record_offset).max(0.0);
        backend.set_position(self.stream, local);
    }

    pub fn dispose(&self, backend: &mut dyn NativeBackend) {
        backend.destroy_decode_stream(self.stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_audio::{MixerKind, MockBackend, SyntheticClip};

    fn setup() -> (MockBackend, MixerHandle) {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("soundtrack.wav", SyntheticClip::sine(220.0, 48_000 * 5, 48_000));
        let mixer = backend.create_mixer(MixerKind::SoundtrackSubmix).unwrap();
        (backend, mixer)
    }

    #[test]
    fn outside_span_pauses_attachment() {
        let (mut backend, mixer) = setup();
        let mut clip = SoundtrackClipStream::load(&mut backend, ClipId(1), "soundtrack.wav", mixer).unwrap();
        clip.set_duration(5.0).unwrap();
        clip.sync(&mut backend, -1.0, 0.0, 1.0, 0.15, 0.05);
        let (left, _) = backend.read_block(mixer, 64);
        assert!(left.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn inside_span_unpauses_and_plays() {
        let (mut backend, mixer) = setup();
        let mut clip = SoundtrackClipStream::load(&mut backend, ClipId(1), "soundtrack.wav", mixer).unwrap();
        clip.set_duration(5.0).unwrap();
        clip.sync(&mut backend, 1.0, 0.0, 1.0, 0.15, 0.05);
        let (left, _) = backend.read_block(mixer, 64);
        assert!(left.iter().any(|&s| s.abs() > 0.0));
    }
}
