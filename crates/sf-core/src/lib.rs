//! sf-core: shared types, configuration, and frame-token bookkeeping for the
//! scene audio engine.

mod config;
mod error;
mod frame_token;
mod ids;
mod sample;

pub use config::{Config, LogCategory};
pub use error::{EngineError, EngineResult};
pub use frame_token::{FrameToken, StaleDetector};
pub use ids::{ClipId, OperatorId};
pub use sample::{Sample, StereoBlock, StereoSample};

/// Standard sample rate options reported by the native backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44_100,
    #[default]
    Hz48000 = 48_000,
    Hz88200 = 88_200,
    Hz96000 = 96_000,
}

impl SampleRate {
    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Device/software buffer size options, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum BufferSize {
    Samples128 = 128,
    #[default]
    Samples256 = 256,
    Samples512 = 512,
    Samples1024 = 1024,
}

impl BufferSize {
    #[inline]
    pub fn as_usize(self) -> usize {
        self as u32 as usize
    }

    /// Latency in milliseconds at the given sample rate.
    #[inline]
    pub fn latency_ms(self, sample_rate: SampleRate) -> f64 {
        (self.as_usize() as f64 / sample_rate.as_f64()) * 1000.0
    }
}

/// Decibel value wrapper, used by the metering side of the analysis context.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}
