//! Audio Engine orchestrator (C6): owns every registry, drives the per-frame
//! update/complete-frame flow, and mediates export mode.

use std::collections::HashMap;

use sf_audio::NativeBackend;
use sf_core::{ClipId, Config, FrameToken, OperatorId, StaleDetector};
use sf_dsp::AnalysisContext;

use crate::mixer_manager::MixerManager;
use crate::operator::{Mode3D, OperatorStream};
use crate::soundtrack::SoundtrackClipStream;

/// Host-provided playback clock state passed to `complete_frame`.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackState {
    pub frame_count: i64,
    pub is_rendering_to_file: bool,
    pub playback_speed: f64,
    pub time_in_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    ProjectSoundtrack,
    ExternalDevice,
}

#[derive(Debug, Clone, Copy)]
pub struct AnalysisSettings {
    pub enabled: bool,
    pub audio_source: AudioSource,
    pub gain: f32,
    pub decay: f32,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self { enabled: true, audio_source: AudioSource::ProjectSoundtrack, gain: 1.0, decay: 0.95 }
    }
}

struct OperatorAudioState {
    stream: Option<OperatorStream>,
    current_path: Option<String>,
    prev_play: bool,
    prev_stop: bool,
    pending_seek: Option<f32>,
    last_load_error: Option<String>,
    last_updated: FrameToken,
}

impl OperatorAudioState {
    fn new() -> Self {
        Self {
            stream: None,
            current_path: None,
            prev_play: false,
            prev_stop: false,
            pending_seek: None,
            last_load_error: None,
            last_updated: FrameToken::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StereoOperatorUpdate<'a> {
    pub file: &'a str,
    pub play: bool,
    pub stop: bool,
    pub volume: f32,
    pub mute: bool,
    pub pan: f32,
    pub speed: f32,
    pub seek: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SpatialOperatorUpdate<'a> {
    pub file: &'a str,
    pub play: bool,
    pub stop: bool,
    pub volume: f32,
    pub mute: bool,
    pub position: [f32; 3],
    pub min_distance: f32,
    pub max_distance: f32,
    pub speed: f32,
    pub seek: f32,
    pub orientation: [f32; 3],
    pub inner_cone_deg: f32,
    pub outer_cone_deg: f32,
    pub outer_cone_volume: f32,
    pub mode: Mode3D,
}

/// Owns the native backend, every clip/operator registry, and the frame
/// token; the single `Engine` value a host creates at startup.
pub struct Engine {
    mixers: MixerManager,
    config: Config,
    stale: StaleDetector,
    soundtrack_clips: HashMap<ClipId, SoundtrackClipStream>,
    stereo_operators: HashMap<OperatorId, OperatorAudioState>,
    spatial_operators: HashMap<OperatorId, OperatorAudioState>,
    listener_position: [f32; 3],
    listener_forward: [f32; 3],
    listener_up: [f32; 3],
    analysis: AnalysisContext,
}

impl Engine {
    pub fn new(backend: Box<dyn NativeBackend>, config: Config) -> Self {
        let analysis = AnalysisContext::new(
            config.sample_rate_hz as f64,
            config.fft_bins,
            config.waveform_samples,
            config.band_count,
        );
        Self {
            mixers: MixerManager::new(backend, config.sample_rate_hz, config.level_metering_window_s),
            config,
            stale: StaleDetector::new(),
            soundtrack_clips: HashMap::new(),
            stereo_operators: HashMap::new(),
            spatial_operators: HashMap::new(),
            listener_position: [0.0; 3],
            listener_forward: [0.0, 0.0, 1.0],
            listener_up: [0.0, 1.0, 0.0],
            analysis,
        }
    }

    /// Lazily initializes the mixer manager; a failed attempt is retried on
    /// the next call rather than cached as permanently fatal, matching §4.6
    /// step 1's "best-effort re-init".
    fn ensure_mixer_initialized(&mut self) {
        if !self.mixers.is_audio_enabled() {
            if let Err(e) = self.mixers.init() {
                log::error!(target: "sceneforge::audio", "mixer re-init failed: {e}");
            }
        }
        self.mixers.note_disabled_if_needed();
    }

    pub fn mixers(&self) -> &MixerManager {
        &self.mixers
    }

    pub fn set_global_volume(&mut self, v: f32) {
        self.mixers.set_global_volume(v);
    }

    pub fn set_global_mute(&mut self, mute: bool) {
        self.mixers.set_global_mute(mute);
    }

    pub fn set_operator_mute(&mut self, mute: bool) {
        self.mixers.set_operator_mute(mute);
    }

    pub fn set_soundtrack_mute(&mut self, mute: bool) {
        self.mixers.set_soundtrack_mute(mute);
    }

    pub fn set_3d_listener(&mut self, position: [f32; 3], forward: [f32; 3], up: [f32; 3]) {
        self.listener_position = position;
        self.listener_forward = normalize_or_default(forward, [0.0, 0.0, 1.0]);
        self.listener_up = normalize_or_default(up, [0.0, 1.0, 0.0]);
        self.mixers.backend_mut().set_listener_position(position);
    }

    pub fn get_3d_listener_position(&self) -> [f32; 3] {
        self.listener_position
    }

    pub fn use_soundtrack_clip(&mut self, clip_id: ClipId, path: &str, time: f64) -> bool {
        self.ensure_mixer_initialized();
        let Some(mixer) = self.mixers.soundtrack_submix() else { return false };
        if !self.soundtrack_clips.contains_key(&clip_id) {
            match SoundtrackClipStream::load(self.mixers.backend_mut(), clip_id, path, mixer) {
                Ok(mut clip) => {
                    clip.is_soundtrack = true;
                    self.soundtrack_clips.insert(clip_id, clip);
                }
                Err(e) => {
                    log::error!(target: "sceneforge::audio", "soundtrack clip '{path}' failed to load: {e}");
                    return false;
                }
            }
        }
        if let Some(clip) = self.soundtrack_clips.get_mut(&clip_id) {
            clip.target_time = time;
            clip.in_use_this_frame = true;
            true
        } else {
            false
        }
    }

    pub fn reload_soundtrack_clip(&mut self, clip_id: ClipId, path: &str) {
        if let Some(clip) = self.soundtrack_clips.remove(&clip_id) {
            clip.dispose(self.mixers.backend_mut());
        }
        self.use_soundtrack_clip(clip_id, path, 0.0);
    }

    /// Shared update flow for both operator variants (§4.6): resolve the
    /// state entry, handle a path change, and store the pending seek. Returns
    /// `true` if the stream should now have its frame-live attributes
    /// (volume/speed/pan or 3D) applied; rising-edge play/stop handling
    /// itself happens in `edge_detect_and_apply_seek`.
    fn update_operator_common(
        state: &mut OperatorAudioState,
        token: FrameToken,
        file: &str,
        seek: f32,
        load: impl FnOnce() -> Result<OperatorStream, sf_core::EngineError>,
    ) -> bool {
        state.last_updated = token;

        let path_changed = state.current_path.as_deref() != Some(file);
        if path_changed {
            // The caller already disposed the old stream (it needs a mutable
            // backend borrow this function doesn't have); state.stream is
            // `None` here.
            state.current_path = Some(file.to_string());
            state.last_load_error = None;
            state.prev_play = false;
            state.prev_stop = false;
            state.pending_seek = None;

            match load() {
                Ok(stream) => state.stream = Some(stream),
                Err(e) => {
                    log::error!(target: "sceneforge::audio", "operator stream '{file}' failed to load: {e}");
                    state.last_load_error = Some(e.to_string());
                    state.stream = None;
                }
            }
        } else if state.last_load_error.is_some() {
            // Unchanged path, previously failed: short-circuit without
            // re-attempting or re-logging.
            return false;
        }

        if (0.0..=1.0).contains(&seek) {
            state.pending_seek = Some(seek);
        }

        state.stream.is_some()
    }

    pub fn update_stereo_operator(&mut self, id: OperatorId, update: StereoOperatorUpdate) {
        self.ensure_mixer_initialized();
        let Some(mixer) = self.mixers.operator_submix() else { return };
        let token = self.stale.token();
        let state = self.stereo_operators.entry(id).or_insert_with(OperatorAudioState::new);

        let path_changed = state.current_path.as_deref() != Some(update.file);
        if path_changed {
            if let Some(mut old) = state.stream.take() {
                old.dispose(self.mixers.backend_mut());
            }
        }
        let backend = self.mixers.backend_mut();
        let file = update.file;
        let should_attempt_load =
            Self::update_operator_common(state, token, update.file, update.seek, || {
                OperatorStream::load_stereo(backend, file, mixer)
            });
        if !should_attempt_load {
            return;
        }

        let backend = self.mixers.backend_mut();
        Self::edge_detect_and_apply_seek(state, backend, update.play, update.stop);

        let Some(stream) = state.stream.as_mut() else { return };
        if stream.is_playing() {
            stream.set_volume(update.volume, update.mute);
            stream.set_pan(backend, update.pan);
            stream.set_speed(backend, update.speed);
            stream.apply_volume(backend);
        }
    }

    pub fn update_spatial_operator(&mut self, id: OperatorId, update: SpatialOperatorUpdate) {
        self.ensure_mixer_initialized();
        let Some(device_mixer) = self.mixers.global() else { return };
        let token = self.stale.token();
        let listener_position = self.listener_position;
        let state = self.spatial_operators.entry(id).or_insert_with(OperatorAudioState::new);

        let path_changed = state.current_path.as_deref() != Some(update.file);
        if path_changed {
            if let Some(mut old) = state.stream.take() {
                old.dispose(self.mixers.backend_mut());
            }
        }
        let backend = self.mixers.backend_mut();
        let file = update.file;
        let should_attempt_load =
            Self::update_operator_common(state, token, update.file, update.seek, || {
                OperatorStream::load_spatial(backend, file, device_mixer)
            });
        if !should_attempt_load {
            return;
        }

        let backend = self.mixers.backend_mut();
        Self::edge_detect_and_apply_seek(state, backend, update.play, update.stop);

        let Some(stream) = state.stream.as_mut() else { return };
        if stream.is_playing() {
            stream.set_volume(update.volume, update.mute);
            stream.update_spatial(
                backend,
                update.position,
                update.min_distance,
                update.max_distance,
                update.orientation,
                update.inner_cone_deg,
                update.outer_cone_deg,
                update.outer_cone_volume,
                update.mode,
                listener_position,
            );
            stream.set_speed(backend, update.speed);
        }
    }

    /// Rising-edge play/stop (§4.6 step 7): `play`/`stop` fire only on
    /// transitions from false to true; a play edge applies and clears any
    /// stored pending seek, a stop edge clears it without applying.
    fn edge_detect_and_apply_seek(state: &mut OperatorAudioState, backend: &mut dyn NativeBackend, play: bool, stop: bool) {
        let stop_edge = stop && !state.prev_stop;
        let play_edge = play && !state.prev_play;
        state.prev_play = play;
        state.prev_stop = stop;

        let Some(stream) = state.stream.as_mut() else { return };

        if stop_edge {
            stream.stop(backend);
            state.pending_seek = None;
            return;
        }
        if play_edge {
            stream.stop(backend);
            if let Some(seek) = state.pending_seek {
                if seek > 0.0 {
                    let target = seek as f64 * stream.duration_seconds();
                    stream.seek(backend, target);
                }
            }
            stream.play(backend);
            state.pending_seek = None;
        }
    }

    /// Processes `soundtrack_clips`, analysis, stale classification, and the
    /// frame-token advance (§4.6 complete-frame flow). Returns the stereo
    /// block that reached the device this frame (for host-side metering).
    pub fn complete_frame(&mut self, playback: PlaybackState, settings: AnalysisSettings) -> (Vec<f32>, Vec<f32>) {
        self.ensure_mixer_initialized();

        let frames = (self.config.sample_rate_hz as f64 * self.config.update_period_ms / 1000.0).round() as usize;
        let frames = frames.max(1);

        // Sync every soundtrack clip against its requested target time.
        let clip_ids: Vec<ClipId> = self.soundtrack_clips.keys().copied().collect();
        for id in clip_ids {
            let keep = {
                let clip = self.soundtrack_clips.get(&id).unwrap();
                clip.in_use_this_frame
            };
            if !keep {
                if let Some(clip) = self.soundtrack_clips.remove(&id) {
                    clip.dispose(self.mixers.backend_mut());
                }
                continue;
            }
            let global_volume = self.mixers.global_volume();
            let soundtrack_mute = self.mixers.soundtrack_mute();
            let global_mute = self.mixers.global_mute();
            let clip = self.soundtrack_clips.get_mut(&id).unwrap();
            let target_time = clip.target_time;
            let backend = self.mixers.backend_mut();
            clip.sync(backend, target_time, 0.0, playback.playback_speed, self.config.resync_threshold, self.config.resync_offset_s);
            clip.apply_volume(backend, 1.0, global_volume, soundtrack_mute, global_mute);
            clip.in_use_this_frame = false;
        }

        let (left, right) = self.mixers.read_global_block(frames);

        if settings.enabled && matches!(settings.audio_source, AudioSource::ProjectSoundtrack | AudioSource::ExternalDevice) {
            self.analysis.push_block(&left, &right);
            self.analysis.process_fft_update(settings.gain, settings.decay);
        }

        self.stop_stale_operators();

        let token = self.stale.ensure_current(playback.frame_count);
        self.stale_token_refresh(token);

        let _ = playback.is_rendering_to_file;
        (left, right)
    }

    fn stale_token_refresh(&mut self, _token: FrameToken) {
        // `ensure_current` already advanced; nothing further needed here —
        // placeholder keeps the complete-frame flow's numbered steps legible.
    }

    /// Classifies every operator against the *current* (pre-advance) token
    /// and applies the stale transition exactly once per state change.
    fn stop_stale_operators(&mut self) {
        let backend = self.mixers.backend_mut();
        for state in self.stereo_operators.values_mut().chain(self.spatial_operators.values_mut()) {
            let Some(stream) = state.stream.as_mut() else { continue };
            let is_stale = self.stale.is_stale(state.last_updated);
            if is_stale != stream.is_stale() {
                stream.set_stale(backend, is_stale);
            }
        }
    }

    pub fn analysis(&self) -> &AnalysisContext {
        &self.analysis
    }

    pub fn get_operator_level(&self, id: OperatorId) -> f32 {
        self.stereo_operators
            .get(&id)
            .or_else(|| self.spatial_operators.get(&id))
            .and_then(|s| s.stream.as_ref())
            .map(|s| s.get_level(self.mixers.backend()))
            .unwrap_or(0.0)
    }

    pub fn get_operator_position_seconds(&self, id: OperatorId) -> f64 {
        self.stereo_operators
            .get(&id)
            .or_else(|| self.spatial_operators.get(&id))
            .and_then(|s| s.stream.as_ref())
            .map(|s| s.current_position_seconds(self.mixers.backend()))
            .unwrap_or(0.0)
    }

    pub fn is_operator_playing(&self, id: OperatorId) -> bool {
        self.stereo_operators
            .get(&id)
            .or_else(|| self.spatial_operators.get(&id))
            .and_then(|s| s.stream.as_ref())
            .map(|s| s.is_playing())
            .unwrap_or(false)
    }

    pub fn get_operator_load_error(&self, id: OperatorId) -> Option<&str> {
        self.stereo_operators
            .get(&id)
            .or_else(|| self.spatial_operators.get(&id))
            .and_then(|s| s.last_load_error.as_deref())
    }

    pub fn unregister_operator(&mut self, id: OperatorId) {
        if let Some(mut state) = self.stereo_operators.remove(&id) {
            if let Some(mut stream) = state.stream.take() {
                stream.dispose(self.mixers.backend_mut());
            }
        }
        if let Some(mut state) = self.spatial_operators.remove(&id) {
            if let Some(mut stream) = state.stream.take() {
                stream.dispose(self.mixers.backend_mut());
            }
        }
    }

    /// Device change (§4.6): dispose every stream, tear down the mixer
    /// manager, and reinitialize from scratch. No handle survives.
    pub fn on_audio_device_changed(&mut self) {
        let backend = self.mixers.backend_mut();
        for state in self.stereo_operators.values_mut().chain(self.spatial_operators.values_mut()) {
            if let Some(mut stream) = state.stream.take() {
                stream.dispose(backend);
            }
            state.current_path = None;
            state.prev_play = false;
            state.prev_stop = false;
        }
        for clip in self.soundtrack_clips.values() {
            clip.dispose(backend);
        }
        self.soundtrack_clips.clear();
        self.mixers.shutdown();
        self.ensure_mixer_initialized();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn mixers_mut(&mut self) -> &mut MixerManager {
        &mut self.mixers
    }

    pub(crate) fn soundtrack_clip_ids(&self) -> Vec<ClipId> {
        self.soundtrack_clips.keys().copied().collect()
    }

    pub(crate) fn soundtrack_stream_handle(&self, id: ClipId) -> Option<sf_audio::DecodeStreamHandle> {
        self.soundtrack_clips.get(&id).map(|c| c.stream_handle())
    }

    pub(crate) fn export_seek_soundtrack_clip(&mut self, id: ClipId, offset_seconds: f64) {
        if let Some(clip) = self.soundtrack_clips.get_mut(&id) {
            clip.export_seek(self.mixers.backend_mut(), offset_seconds);
        }
    }

    pub(crate) fn apply_volume_soundtrack_clip(
        &mut self,
        id: ClipId,
        clip_volume: f32,
        global_volume: f32,
        soundtrack_mute: bool,
        global_mute: bool,
    ) {
        if let Some(clip) = self.soundtrack_clips.get_mut(&id) {
            clip.apply_volume(self.mixers.backend_mut(), clip_volume, global_volume, soundtrack_mute, global_mute);
        }
    }

    pub(crate) fn analysis_mut(&mut self) -> &mut AnalysisContext {
        &mut self.analysis
    }

    /// Export prepare (§4.7): mute/pause/reset every operator stream and
    /// mark it stale; spatial streams additionally open an auxiliary decode
    /// stream to read ahead of the live (now-paused) one.
    pub(crate) fn prepare_operators_for_export(&mut self) {
        for state in self.stereo_operators.values_mut().chain(self.spatial_operators.values_mut()) {
            let Some(path) = state.current_path.clone() else { continue };
            let Some(stream) = state.stream.as_mut() else { continue };
            if let Err(e) = stream.prepare_for_export(self.mixers.backend_mut(), &path) {
                log::error!(target: "sceneforge::audio_render", "export prepare failed for '{path}': {e}");
            }
        }
    }

    pub(crate) fn restart_operators_after_export(&mut self) {
        for state in self.stereo_operators.values_mut().chain(self.spatial_operators.values_mut()) {
            if let Some(stream) = state.stream.as_mut() {
                stream.restart_after_export(self.mixers.backend_mut());
            }
        }
    }

    /// Sums every spatial operator's `render_audio` output into the export
    /// mixdown (§4.7 step 4).
    pub(crate) fn render_spatial_operators_into(&mut self, left: &mut [f32], right: &mut [f32], target_rate: u32, frame_dur_sec: f64) {
        let frames = left.len().min(right.len());
        let mut scratch_l = vec![0.0f32; frames];
        let mut scratch_r = vec![0.0f32; frames];
        let listener_position = self.listener_position;
        for state in self.spatial_operators.values_mut() {
            let Some(stream) = state.stream.as_mut() else { continue };
            scratch_l.iter_mut().for_each(|s| *s = 0.0);
            scratch_r.iter_mut().for_each(|s| *s = 0.0);
            stream.render_audio(self.mixers.backend(), frame_dur_sec, target_rate, listener_position, &mut scratch_l, &mut scratch_r);
            for i in 0..frames {
                left[i] += scratch_l[i];
                right[i] += scratch_r[i];
            }
        }
    }
}

fn normalize_or_default(v: [f32; 3], default: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len < 1e-5 {
        default
    } else {
        [v[0] / len, v[1] / len, v[2] / len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_audio::MockBackend;

    fn engine_with_clip() -> Engine {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("tone.wav", sf_audio::SyntheticClip::sine(440.0, 48_000, 48_000));
        let mut config = Config::default();
        config.update_period_ms = 16.667;
        let mut engine = Engine::new(Box::new(backend), config);
        engine.ensure_mixer_initialized();
        engine
    }

    #[test]
    fn frame_token_advances_across_complete_frame_calls() {
        let mut engine = engine_with_clip();
        let before = engine.stale.token();
        engine.complete_frame(
            PlaybackState { frame_count: 1, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: 0.0 },
            AnalysisSettings::default(),
        );
        assert!(engine.stale.token() > before);
    }

    #[test]
    fn unstarted_operator_is_not_playing() {
        let engine = engine_with_clip();
        let id = OperatorId(1);
        assert!(!engine.is_operator_playing(id));
        assert_eq!(engine.get_operator_level(id), 0.0);
    }

    #[test]
    fn play_edge_starts_stereo_operator() {
        let mut engine = engine_with_clip();
        let id = OperatorId(1);
        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: true, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.0 },
        );
        assert!(engine.is_operator_playing(id));
    }

    #[test]
    fn missing_clip_substitutes_silence_without_panicking() {
        // MockBackend never fails stream creation (it substitutes silence
        // for an unregistered path); the real CpalSymphoniaBackend is what
        // exercises the load-failure/error-caching path against actual files.
        let mut engine = engine_with_clip();
        let id = OperatorId(2);
        for _ in 0..3 {
            engine.update_stereo_operator(
                id,
                StereoOperatorUpdate {
                    file: "does-not-exist.wav",
                    play: true,
                    stop: false,
                    volume: 1.0,
                    mute: false,
                    pan: 0.0,
                    speed: 1.0,
                    seek: 0.0,
                },
            );
        }
        assert!(engine.is_operator_playing(id));
        assert_eq!(engine.get_operator_level(id), 0.0);
    }

    #[test]
    fn seek_before_play_applies_on_play_edge() {
        let mut engine = engine_with_clip();
        let id = OperatorId(3);
        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: false, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.5 },
        );
        assert!(!engine.is_operator_playing(id));

        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: true, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.5 },
        );
        assert!(engine.is_operator_playing(id));
        let position = engine.get_operator_position_seconds(id);
        assert!((position - 0.5).abs() < 1e-6, "expected seek to ~0.5s, got {position}");
    }

    #[test]
    fn stale_operator_is_silent_then_revives_on_update() {
        let mut engine = engine_with_clip();
        let id = OperatorId(4);
        let update = |play: bool| StereoOperatorUpdate {
            file: "tone.wav",
            play,
            stop: false,
            volume: 1.0,
            mute: false,
            pan: 0.0,
            speed: 1.0,
            seek: 0.0,
        };

        for frame in 0..10 {
            engine.update_stereo_operator(id, update(frame == 0));
            engine.complete_frame(
                PlaybackState { frame_count: frame, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: 0.0 },
                AnalysisSettings::default(),
            );
        }
        assert!(engine.is_operator_playing(id));

        // No updates for several frames: the operator goes stale and is
        // silenced, but the stream is not torn down.
        for frame in 10..20 {
            engine.complete_frame(
                PlaybackState { frame_count: frame, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: 0.0 },
                AnalysisSettings::default(),
            );
        }
        assert_eq!(engine.get_operator_level(id), 0.0);

        // A fresh update revives it.
        engine.update_stereo_operator(id, update(true));
        engine.complete_frame(
            PlaybackState { frame_count: 20, is_rendering_to_file: false, playback_speed: 1.0, time_in_seconds: 0.0 },
            AnalysisSettings::default(),
        );
        assert!(engine.is_operator_playing(id));
    }

    #[test]
    fn device_change_invalidates_streams_and_reload_resumes_from_start() {
        let mut engine = engine_with_clip();
        let id = OperatorId(5);
        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: true, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.0 },
        );
        assert!(engine.is_operator_playing(id));

        engine.on_audio_device_changed();
        assert!(!engine.is_operator_playing(id));

        engine.update_stereo_operator(
            id,
            StereoOperatorUpdate { file: "tone.wav", play: true, stop: false, volume: 1.0, mute: false, pan: 0.0, speed: 1.0, seek: 0.0 },
        );
        assert!(engine.is_operator_playing(id));
        assert_eq!(engine.get_operator_position_seconds(id), 0.0);
    }

    #[test]
    fn spatial_attenuation_through_engine_matches_linear_formula() {
        let mut engine = engine_with_clip();
        engine.set_3d_listener([0.0, 0.0, 5.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]);
        let id = OperatorId(6);
        engine.update_spatial_operator(
            id,
            SpatialOperatorUpdate {
                file: "tone.wav",
                play: true,
                stop: false,
                volume: 1.0,
                mute: false,
                position: [0.0, 0.0, 0.0],
                min_distance: 1.0,
                max_distance: 10.0,
                speed: 1.0,
                seek: 0.0,
                orientation: [0.0, 0.0, 1.0],
                inner_cone_deg: 360.0,
                outer_cone_deg: 360.0,
                outer_cone_volume: 1.0,
                mode: Mode3D::Normal,
            },
        );
        let expected = 1.0 - (5.0 - 1.0) / (10.0 - 1.0);
        let Some(stream) = engine.spatial_operators.get(&id).and_then(|s| s.stream.as_ref()) else {
            panic!("spatial operator stream missing");
        };
        assert!((stream.effective_volume() - expected).abs() < 1e-5);
    }

    /// A narrow cone with zero outer gain must actually mute a source that
    /// faces away from the listener, and pass one that faces toward it —
    /// exercising the real angle computed in the device-direct mix path
    /// rather than a hardcoded on-axis constant.
    #[test]
    fn cone_attenuation_mutes_source_facing_away_from_listener() {
        fn render_with_orientation(orientation: [f32; 3]) -> f32 {
            let mut engine = engine_with_clip();
            engine.set_3d_listener([0.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]);
            let id = OperatorId(42);
            engine.update_spatial_operator(
                id,
                SpatialOperatorUpdate {
                    file: "tone.wav",
                    play: true,
                    stop: false,
                    volume: 1.0,
                    mute: false,
                    position: [0.0, 0.0, 5.0],
                    min_distance: 1.0,
                    max_distance: 100.0,
                    speed: 1.0,
                    seek: 0.0,
                    orientation,
                    inner_cone_deg: 20.0,
                    outer_cone_deg: 40.0,
                    outer_cone_volume: 0.0,
                    mode: Mode3D::Normal,
                },
            );
            let (left, right) = engine.mixers_mut().read_global_block(256);
            left.iter().chain(right.iter()).map(|s| s.abs()).sum()
        }

        let facing_listener = render_with_orientation([0.0, 0.0, -1.0]);
        let facing_away = render_with_orientation([0.0, 0.0, 1.0]);
        assert!(facing_listener > 0.01, "on-axis source should be audible, got {facing_listener}");
        assert_eq!(facing_away, 0.0, "source facing away from listener should be fully muted by the outer cone");
    }

    #[test]
    fn repeated_invalid_path_logs_error_once_and_stays_silent() {
        let mut engine = engine_with_clip();
        let id = OperatorId(7);
        for _ in 0..100 {
            engine.update_stereo_operator(
                id,
                StereoOperatorUpdate {
                    file: "does-not-exist.wav",
                    play: true,
                    stop: false,
                    volume: 1.0,
                    mute: false,
                    pan: 0.0,
                    speed: 1.0,
                    seek: 0.0,
                },
            );
        }
        // MockBackend never fails stream creation, so there is no load
        // error to assert on here — this exercises the unchanged-path,
        // already-resolved short-circuit in `update_operator_common`
        // instead (the real CpalSymphoniaBackend exercises the
        // load-failure/error-caching branch against actual missing files).
        assert!(engine.get_operator_load_error(id).is_none());
        assert!(engine.is_operator_playing(id));
    }
}
