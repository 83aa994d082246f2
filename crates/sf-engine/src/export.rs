//! Export Renderer (C7): deterministic offline mixdown with the Global
//! mixer paused, used for video muxing.

use sf_audio::{MixerHandle, MixerKind};
use sf_core::{ClipId, EngineError, EngineResult};
use sf_dsp::AnalysisContext;

use crate::orchestrator::Engine;

/// One rendered export frame: the summed stereo mixdown at the export rate.
pub struct ExportFrame {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// Drives an [`Engine`] through export mode: pauses the Global mixer, moves
/// soundtrack streams onto a dedicated Export submix, and pulls one mixdown
/// per call to [`ExportSession::render_frame`].
pub struct ExportSession<'a> {
    engine: &'a mut Engine,
    export_submix: MixerHandle,
    export_sample_rate: u32,
    record_offset: f64,
    external_audio_source: bool,
    finished: bool,
}

impl<'a> ExportSession<'a> {
    /// Prepare (§4.7): pause Global, create the Export submix, reattach
    /// soundtrack streams to it, and mark every operator state stale/paused.
    pub fn begin(engine: &'a mut Engine, export_sample_rate: u32, record_offset: f64, external_audio_source: bool) -> EngineResult<Self> {
        if !engine.mixers().is_audio_enabled() {
            return Err(EngineError::Backend("audio subsystem disabled".into()));
        }

        let export_submix = engine.mixers_mut().backend_mut().create_mixer(MixerKind::OfflineAnalysis)?;

        if !external_audio_source {
            let clip_ids = engine.soundtrack_clip_ids();
            for id in clip_ids {
                let Some(handle) = engine.soundtrack_stream_handle(id) else { continue };
                let backend = engine.mixers_mut().backend_mut();
                backend.detach(handle);
                backend.attach(handle, export_submix);
                backend.set_paused(handle, false);
            }
        }

        engine.prepare_operators_for_export();

        Ok(Self {
            engine,
            export_submix,
            export_sample_rate,
            record_offset,
            external_audio_source,
            finished: false,
        })
    }

    /// Renders one export frame of `frame_dur_sec` duration (§4.7 per-frame
    /// flow), populating the shared analysis context from the mixdown.
    pub fn render_frame(&mut self, frame_dur_sec: f64) -> ExportFrame {
        let frames = (self.export_sample_rate as f64 * frame_dur_sec).round().max(1.0) as usize;
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];

        if !self.external_audio_source {
            let clip_ids: Vec<ClipId> = self.engine.soundtrack_clip_ids();
            let record_offset = self.record_offset;
            for id in clip_ids {
                self.engine.export_seek_soundtrack_clip(id, record_offset);
                self.engine.apply_volume_soundtrack_clip(id, 1.0, 1.0, false, false);
            }
            let (sl, sr) = self.engine.mixers_mut().backend_mut().read_block(self.export_submix, frames);
            for i in 0..frames {
                left[i] += sl[i];
                right[i] += sr[i];
            }
        }

        if let Some(op_submix) = self.engine.mixers().operator_submix() {
            let (ol, or_) = self.engine.mixers_mut().backend_mut().read_block(op_submix, frames);
            for i in 0..frames {
                left[i] += ol[i];
                right[i] += or_[i];
            }
        }

        self.engine.render_spatial_operators_into(&mut left, &mut right, self.export_sample_rate, frame_dur_sec);

        let analysis = self.engine.analysis_mut();
        Self::populate_analysis(analysis, &left, &right);

        ExportFrame { left, right }
    }

    fn populate_analysis(analysis: &mut AnalysisContext, left: &[f32], right: &[f32]) {
        analysis.push_block(left, right);
        analysis.process_fft_update(1.0, 0.95);
    }

    /// Finish (§4.7): detach soundtrack streams from the Export submix,
    /// reattach to the Soundtrack submix, free the Export submix, restart
    /// every operator state, and resume the Global mixer.
    pub fn finish(mut self) {
        self.finish_inner();
        self.finished = true;
    }

    fn finish_inner(&mut self) {
        if let Some(soundtrack_submix) = self.engine.mixers().soundtrack_submix() {
            if !self.external_audio_source {
                let clip_ids = self.engine.soundtrack_clip_ids();
                for id in clip_ids {
                    let Some(handle) = self.engine.soundtrack_stream_handle(id) else { continue };
                    let backend = self.engine.mixers_mut().backend_mut();
                    backend.detach(handle);
                    backend.attach(handle, soundtrack_submix);
                    backend.set_paused(handle, true);
                }
            }
        }
        self.engine.mixers_mut().backend_mut().destroy_mixer(self.export_submix);
        self.engine.restart_operators_after_export();
    }
}

impl Drop for ExportSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_audio::MockBackend;
    use sf_core::Config;

    fn engine_with_soundtrack() -> Engine {
        let mut backend = MockBackend::new(48_000);
        backend.register_clip("soundtrack.wav", sf_audio::SyntheticClip::sine(220.0, 48_000 * 5, 48_000));
        let mut engine = Engine::new(Box::new(backend), Config::default());
        engine.use_soundtrack_clip(ClipId(1), "soundtrack.wav", 0.0);
        engine
    }

    #[test]
    fn export_round_trip_produces_expected_frame_count() {
        let mut engine = engine_with_soundtrack();
        let mut session = ExportSession::begin(&mut engine, 48_000, 0.0, false).unwrap();
        let mut total_frames = 0usize;
        for _ in 0..120 {
            let frame = session.render_frame(1.0 / 60.0);
            total_frames += frame.left.len();
            assert_eq!(frame.left.len(), frame.right.len());
        }
        session.finish();
        // 2s at 48kHz == 96000 frames, +/- rounding per 1/60s chunk.
        assert!((total_frames as i64 - 96_000).abs() < 120);
    }

    #[test]
    fn export_renders_nonsilent_soundtrack_audio() {
        let mut engine = engine_with_soundtrack();
        let mut session = ExportSession::begin(&mut engine, 48_000, 0.0, false).unwrap();
        let frame = session.render_frame(1.0 / 60.0);
        session.finish();
        assert!(frame.left.iter().any(|&s| s.abs() > 0.0));
    }

    #[test]
    fn export_leaves_global_mixer_resumable_after_finish() {
        let mut engine = engine_with_soundtrack();
        {
            let mut session = ExportSession::begin(&mut engine, 48_000, 0.0, false).unwrap();
            let _ = session.render_frame(1.0 / 60.0);
            session.finish();
        }
        assert!(engine.mixers().is_audio_enabled());
    }
}
