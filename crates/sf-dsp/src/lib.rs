//! sf-dsp: the analysis context (C8) and the filter primitives it runs on.

pub mod analysis;
pub mod biquad;
pub mod metering;

pub use analysis::AnalysisContext;
pub use biquad::OnePole;
pub use metering::PeakLevelMeter;
