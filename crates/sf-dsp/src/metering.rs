//! Peak level metering used by operator streams and mixer channels to answer
//! `get_level` / `get_operator_level` queries.

use sf_core::Sample;

/// Tracks a decaying peak over a configurable window, reported as a linear
/// `0.0..=1.0` level rather than dB (callers map to dB themselves if needed).
#[derive(Debug, Clone)]
pub struct PeakLevelMeter {
    peak: f64,
    release_coeff: f64,
}

impl PeakLevelMeter {
    pub fn new(sample_rate_hz: f64, window_seconds: f64) -> Self {
        let window = window_seconds.max(1e-3);
        Self {
            peak: 0.0,
            release_coeff: (-1.0 / (window * sample_rate_hz)).exp(),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: Sample) {
        let abs = sample.abs() as f64;
        self.peak = if abs > self.peak {
            abs
        } else {
            self.peak * self.release_coeff
        };
    }

    pub fn process_block(&mut self, samples: &[Sample]) {
        for &s in samples {
            self.process(s);
        }
    }

    /// Current peak as a linear level in `0.0..=1.0` (may briefly exceed 1.0
    /// on clipped input; callers are expected to treat that as "loud", not clamp).
    pub fn level(&self) -> f32 {
        self.peak as f32
    }

    pub fn reset(&mut self) {
        self.peak = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_peak_and_decays() {
        let mut meter = PeakLevelMeter::new(48_000.0, 0.3);
        meter.process(0.8);
        assert!((meter.level() - 0.8).abs() < 1e-6);
        for _ in 0..48_000 {
            meter.process(0.0);
        }
        assert!(meter.level() < 0.1);
    }

    #[test]
    fn silence_reports_zero() {
        let mut meter = PeakLevelMeter::new(48_000.0, 0.3);
        meter.process_block(&[0.0; 256]);
        assert_eq!(meter.level(), 0.0);
    }
}
