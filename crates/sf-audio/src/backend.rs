//! The native backend contract (§6a).
//!
//! The proprietary native mixing library this engine normally sits on top of
//! is out of scope here, so its surface is modeled as a trait object owned
//! by the mixer manager. [`CpalSymphoniaBackend`](crate::cpal_backend::CpalSymphoniaBackend)
//! implements it against real hardware; [`MockBackend`](crate::mock_backend::MockBackend)
//! implements it deterministically for tests and the CLI harness.

use std::fmt;

use sf_core::EngineResult;

/// One of the four logical mixers the mixer manager maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MixerKind {
    Global,
    OperatorSubmix,
    SoundtrackSubmix,
    OfflineAnalysis,
}

/// Opaque handle to a native mixer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MixerHandle(pub u64);

impl fmt::Display for MixerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mixer:{}", self.0)
    }
}

/// Opaque handle to a native decode stream attached to a mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecodeStreamHandle(pub u64);

impl fmt::Display for DecodeStreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream:{}", self.0)
    }
}

/// Flags passed when opening a decode stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeFlags {
    pub looping: bool,
    /// Spatial streams bypass mixer attachment and play straight to the
    /// device with 3D processing; `attach`'s mixer argument is ignored for
    /// them (accepted only for API symmetry, per the native contract).
    pub spatial: bool,
}

/// 3D placement parameters for a spatial decode stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spatial3DParams {
    pub position: [f32; 3],
    pub velocity: [f32; 3],
    /// Direction the source is facing, used against the listener direction
    /// to compute the cone angle.
    pub orientation: [f32; 3],
    pub min_distance: f32,
    pub max_distance: f32,
    pub cone_inner_angle_deg: f32,
    pub cone_outer_angle_deg: f32,
    pub cone_outer_gain: f32,
}

impl Default for Spatial3DParams {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            velocity: [0.0; 3],
            orientation: [0.0, 0.0, 1.0],
            min_distance: 1.0,
            max_distance: 100.0,
            cone_inner_angle_deg: 360.0,
            cone_outer_angle_deg: 360.0,
            cone_outer_gain: 1.0,
        }
    }
}

/// The surface the mixer manager drives instead of talking to the
/// proprietary native library directly.
pub trait NativeBackend: Send {
    fn create_mixer(&mut self, kind: MixerKind) -> EngineResult<MixerHandle>;
    fn destroy_mixer(&mut self, mixer: MixerHandle);

    fn create_decode_stream(
        &mut self,
        path: &str,
        flags: DecodeFlags,
    ) -> EngineResult<DecodeStreamHandle>;
    fn destroy_decode_stream(&mut self, stream: DecodeStreamHandle);

    fn attach(&mut self, stream: DecodeStreamHandle, mixer: MixerHandle);
    fn detach(&mut self, stream: DecodeStreamHandle);

    fn set_position(&mut self, stream: DecodeStreamHandle, seconds: f64);
    fn position_seconds(&self, stream: DecodeStreamHandle) -> f64;
    fn set_paused(&mut self, stream: DecodeStreamHandle, paused: bool);
    fn set_volume(&mut self, stream: DecodeStreamHandle, volume: f32);
    fn set_frequency_ratio(&mut self, stream: DecodeStreamHandle, ratio: f32);
    fn set_3d_params(&mut self, stream: DecodeStreamHandle, params: Spatial3DParams);

    /// Inform the backend of the listener's current world position, for the
    /// device-direct spatial mix's distance/cone computation.
    fn set_listener_position(&mut self, position: [f32; 3]);

    /// Native channel count and sample rate reported for a decode stream,
    /// used by the host to size export buffers up front.
    fn stream_channels_and_rate(&self, stream: DecodeStreamHandle) -> (u16, u32);

    /// Total clip duration in seconds, at the clip's native sample rate.
    fn stream_duration_seconds(&self, stream: DecodeStreamHandle) -> f64;

    /// Pull `frames` of mixed output from `mixer`, advancing every attached,
    /// unpaused stream by that many frames.
    fn read_block(&mut self, mixer: MixerHandle, frames: usize) -> (Vec<f32>, Vec<f32>);

    /// Peak level over the given window, in `0.0..=1.0`.
    fn peak_level(&self, mixer: MixerHandle, window_seconds: f64) -> f32;

    /// Peak level of a single decode stream's own contribution, independent
    /// of whichever mixer (if any) it is attached to.
    fn stream_level(&self, stream: DecodeStreamHandle) -> f32;

    /// The stream's full decoded channel buffers, for software export
    /// rendering (speed-warping, resampling, and 3D pan/attenuation) that
    /// reads ahead of the stream's own play cursor.
    fn stream_raw_channels(&self, stream: DecodeStreamHandle) -> Vec<Vec<f32>>;
}
