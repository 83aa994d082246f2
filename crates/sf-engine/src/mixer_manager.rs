//! Mixer Manager (C2): owns the native backend and its four logical mixers.
//!
//! The trait in [`sf_audio::NativeBackend`] only attaches decode streams to a
//! single mixer handle — it does not model mixer-into-mixer chaining the way
//! the real native library does. So the "Operator submix / Soundtrack submix
//! feed Global" routing described in the data-flow overview is performed
//! explicitly here: [`MixerManager::read_global_block`] pulls each submix's
//! block and sums them, plus whatever the backend mixed directly into the
//! Global handle (spatial streams play device-direct and are summed in by
//! every `NativeBackend` impl when asked to read the Global mixer).

use sf_audio::{DecodeFlags, DecodeStreamHandle, MixerHandle, MixerKind, NativeBackend};
use sf_core::{EngineError, EngineResult};
use sf_dsp::PeakLevelMeter;

pub struct MixerManager {
    backend: Box<dyn NativeBackend>,
    global: Option<MixerHandle>,
    operator_submix: Option<MixerHandle>,
    soundtrack_submix: Option<MixerHandle>,
    offline_analysis: Option<MixerHandle>,
    global_meter: PeakLevelMeter,
    global_volume: f32,
    global_mute: bool,
    operator_mute: bool,
    soundtrack_mute: bool,
    audio_disabled_logged: bool,
}

impl MixerManager {
    pub fn new(backend: Box<dyn NativeBackend>, sample_rate_hz: u32, metering_window_s: f64) -> Self {
        Self {
            backend,
            global: None,
            operator_submix: None,
            soundtrack_submix: None,
            offline_analysis: None,
            global_meter: PeakLevelMeter::new(sample_rate_hz as f64, metering_window_s),
            global_volume: 1.0,
            global_mute: false,
            operator_mute: false,
            soundtrack_mute: false,
            audio_disabled_logged: false,
        }
    }

    /// Initialize the native library's four logical mixers. If the Global
    /// mixer fails to create, this is fatal for audio: the manager stays
    /// disabled and every subsequent call becomes a no-op.
    pub fn init(&mut self) -> EngineResult<()> {
        let global = self.backend.create_mixer(MixerKind::Global).map_err(|e| {
            log::error!(target: "sceneforge::audio", "global mixer failed to initialize, audio disabled: {e}");
            e
        })?;
        self.global = Some(global);

        match self.backend.create_mixer(MixerKind::OperatorSubmix) {
            Ok(h) => self.operator_submix = Some(h),
            Err(e) => log::warn!(target: "sceneforge::audio", "operator submix failed to initialize: {e}"),
        }
        match self.backend.create_mixer(MixerKind::SoundtrackSubmix) {
            Ok(h) => self.soundtrack_submix = Some(h),
            Err(e) => log::warn!(target: "sceneforge::audio", "soundtrack submix failed to initialize: {e}"),
        }
        // Constructed for forward compatibility (waveform-image generation
        // independent of playback) but never attached to in this engine.
        match self.backend.create_mixer(MixerKind::OfflineAnalysis) {
            Ok(h) => self.offline_analysis = Some(h),
            Err(e) => log::warn!(target: "sceneforge::audio", "offline analysis mixer failed to initialize: {e}"),
        }
        Ok(())
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.global.is_some()
    }

    /// Logs the "audio disabled" condition exactly once, per the sticky
    /// initialization-failure policy.
    pub fn note_disabled_if_needed(&mut self) {
        if !self.is_audio_enabled() && !self.audio_disabled_logged {
            log::warn!(target: "sceneforge::audio", "audio is disabled; updates are being dropped");
            self.audio_disabled_logged = true;
        }
    }

    pub fn backend_mut(&mut self) -> &mut dyn NativeBackend {
        &mut *self.backend
    }

    pub fn backend(&self) -> &dyn NativeBackend {
        &*self.backend
    }

    pub fn operator_submix(&self) -> Option<MixerHandle> {
        self.operator_submix
    }

    pub fn soundtrack_submix(&self) -> Option<MixerHandle> {
        self.soundtrack_submix
    }

    pub fn global(&self) -> Option<MixerHandle> {
        self.global
    }

    pub fn set_global_volume(&mut self, volume: f32) {
        self.global_volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_global_mute(&mut self, mute: bool) {
        self.global_mute = mute;
    }

    pub fn set_operator_mute(&mut self, mute: bool) {
        self.operator_mute = mute;
    }

    pub fn set_soundtrack_mute(&mut self, mute: bool) {
        self.soundtrack_mute = mute;
    }

    pub fn operator_mute(&self) -> bool {
        self.operator_mute
    }

    pub fn soundtrack_mute(&self) -> bool {
        self.soundtrack_mute
    }

    pub fn global_volume(&self) -> f32 {
        self.global_volume
    }

    pub fn global_mute(&self) -> bool {
        self.global_mute
    }

    /// Pull and sum the Operator submix, Soundtrack submix, and (via the
    /// backend's own Global-mixer special case) any device-direct spatial
    /// streams, applying global volume/mute. This is what reaches the device
    /// in live playback and what feeds the analysis context.
    pub fn read_global_block(&mut self, frames: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];

        if !self.is_audio_enabled() {
            return (left, right);
        }

        if !self.operator_mute {
            if let Some(op) = self.operator_submix {
                let (l, r) = self.backend.read_block(op, frames);
                for i in 0..frames {
                    left[i] += l[i];
                    right[i] += r[i];
                }
            }
        }
        if !self.soundtrack_mute {
            if let Some(st) = self.soundtrack_submix {
                let (l, r) = self.backend.read_block(st, frames);
                for i in 0..frames {
                    left[i] += l[i];
                    right[i] += r[i];
                }
            }
        }
        // Device-direct spatial streams are mixed into the Global handle's
        // own read by every NativeBackend implementation.
        if let Some(global) = self.global {
            let (l, r) = self.backend.read_block(global, frames);
            for i in 0..frames {
                left[i] += l[i];
                right[i] += r[i];
            }
        }

        let gain = if self.global_mute { 0.0 } else { self.global_volume };
        for s in left.iter_mut().chain(right.iter_mut()) {
            *s *= gain;
        }

        self.global_meter.process_block(&left);
        self.global_meter.process_block(&right);
        (left, right)
    }

    pub fn global_level(&self) -> f32 {
        self.global_meter.level()
    }

    /// Decode-only, prescan stream not attached to any mixer, used for
    /// waveform-image generation independent of playback.
    pub fn create_offline_analysis_stream(&mut self, path: &str) -> EngineResult<DecodeStreamHandle> {
        self.backend.create_decode_stream(path, DecodeFlags::default())
    }

    /// Free all mixers and the native library state. The orchestrator must
    /// have disposed every operator/soundtrack stream beforehand.
    pub fn shutdown(&mut self) {
        for mixer in [self.global, self.operator_submix, self.soundtrack_submix, self.offline_analysis]
            .into_iter()
            .flatten()
        {
            self.backend.destroy_mixer(mixer);
        }
        self.global = None;
        self.operator_submix = None;
        self.soundtrack_submix = None;
        self.offline_analysis = None;
    }

    pub fn load_error_if_disabled(&self) -> EngineResult<()> {
        if self.is_audio_enabled() {
            Ok(())
        } else {
            Err(EngineError::Backend("audio subsystem disabled".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_audio::MockBackend;

    #[test]
    fn init_creates_all_four_mixers() {
        let mut manager = MixerManager::new(Box::new(MockBackend::new(48_000)), 48_000, 0.3);
        manager.init().unwrap();
        assert!(manager.is_audio_enabled());
        assert!(manager.operator_submix().is_some());
        assert!(manager.soundtrack_submix().is_some());
    }

    #[test]
    fn global_block_is_silent_with_nothing_attached() {
        let mut manager = MixerManager::new(Box::new(MockBackend::new(48_000)), 48_000, 0.3);
        manager.init().unwrap();
        let (left, right) = manager.read_global_block(128);
        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
    }
}
