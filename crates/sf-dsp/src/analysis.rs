//! The analysis context (C8): FFT spectrum, log-spaced frequency bands, and
//! waveform buffers driving the host's visualizers.
//!
//! An [`AnalysisContext`] is single-threaded by contract. Running it from
//! multiple threads requires one instance per thread.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use sf_core::{Sample, StereoSample};

use crate::biquad::OnePole;

const LOW_CUTOFF_DEFAULT_HZ: f64 = 250.0;
const HIGH_CUTOFF_DEFAULT_HZ: f64 = 4_000.0;
const BAND_LOW_FREQ_HZ: f64 = 55.0;
const BAND_HIGH_FREQ_HZ: f64 = 15_000.0;
const DIRECT_MAPPED_BINS: usize = 5;
const SLIDING_WINDOW_LEN: usize = 333;
const PCM_BUFFER_FRAMES: usize = 2048;

/// Owns every analysis buffer for one mixer (or listener). Feed it audio with
/// [`push_block`](AnalysisContext::push_block), then call
/// [`process_fft_update`](AnalysisContext::process_fft_update) on whatever
/// cadence the host wants its spectrum/band data refreshed.
pub struct AnalysisContext {
    sample_rate_hz: f64,
    fft: Arc<dyn RealToComplex<f64>>,
    fft_size: usize,
    window: Vec<f64>,
    fft_input: Vec<f64>,
    fft_input_write: usize,
    fft_scratch: Vec<f64>,
    fft_output: Vec<Complex<f64>>,

    /// Raw per-bin gain after windowed FFT, before dB mapping.
    gain_bins: Vec<f64>,
    /// Per-bin gain normalized to `[0, 1]` via `remap(dB, -80, 0, 0, 1)`.
    normalized_bins: Vec<f32>,

    bin_band: Vec<Option<usize>>,
    band_level: Vec<f32>,
    band_peak: Vec<f32>,
    band_attack: Vec<f32>,
    band_peak_attack: Vec<f32>,
    band_onset: Vec<f32>,
    band_window: Vec<std::collections::VecDeque<f32>>,
    band_window_sum: Vec<f32>,
    band_above_average_prev: Vec<f32>,

    pcm: Vec<StereoSample>,
    pcm_write: usize,
    waveform_left: Vec<Sample>,
    waveform_right: Vec<Sample>,
    waveform_write: usize,
    waveform_low: Vec<Sample>,
    waveform_mid: Vec<Sample>,
    waveform_high: Vec<Sample>,

    low_pass: OnePole,
    mid_high_pass: OnePole,
    mid_low_pass: OnePole,
    high_pass: OnePole,
}

impl AnalysisContext {
    /// `bins` is the number of FFT magnitude bins to retain (spec default
    /// 1024); `waveform_samples` sizes every ring buffer (spec default 1024);
    /// `band_count` is the number of log-spaced frequency bands (spec
    /// default 32).
    pub fn new(sample_rate_hz: f64, bins: usize, waveform_samples: usize, band_count: usize) -> Self {
        let fft_size = 2 * (bins.max(2) - 1);
        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let window: Vec<f64> = (0..fft_size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (fft_size - 1) as f64).cos()))
            .collect();

        let bin_band = Self::build_band_map(sample_rate_hz, fft_size, bins, band_count);

        Self {
            sample_rate_hz,
            fft,
            fft_size,
            window,
            fft_input: vec![0.0; fft_size],
            fft_input_write: 0,
            fft_scratch: vec![0.0; fft_size],
            fft_output: vec![Complex::new(0.0, 0.0); bins],
            gain_bins: vec![0.0; bins],
            normalized_bins: vec![0.0; bins],
            bin_band,
            band_level: vec![0.0; band_count],
            band_peak: vec![0.0; band_count],
            band_attack: vec![0.0; band_count],
            band_peak_attack: vec![0.0; band_count],
            band_onset: vec![0.0; band_count],
            band_window: (0..band_count)
                .map(|_| std::collections::VecDeque::with_capacity(SLIDING_WINDOW_LEN))
                .collect(),
            band_window_sum: vec![0.0; band_count],
            band_above_average_prev: vec![0.0; band_count],
            pcm: vec![StereoSample::silence(); PCM_BUFFER_FRAMES],
            pcm_write: 0,
            waveform_left: vec![0.0; waveform_samples],
            waveform_right: vec![0.0; waveform_samples],
            waveform_write: 0,
            waveform_low: vec![0.0; waveform_samples],
            waveform_mid: vec![0.0; waveform_samples],
            waveform_high: vec![0.0; waveform_samples],
            low_pass: OnePole::low_pass(LOW_CUTOFF_DEFAULT_HZ, sample_rate_hz),
            mid_high_pass: OnePole::high_pass(LOW_CUTOFF_DEFAULT_HZ, sample_rate_hz),
            mid_low_pass: OnePole::low_pass(HIGH_CUTOFF_DEFAULT_HZ, sample_rate_hz),
            high_pass: OnePole::high_pass(HIGH_CUTOFF_DEFAULT_HZ, sample_rate_hz),
        }
    }

    /// Assign each FFT bin to a band: the lowest five bins map 1:1 to bands
    /// `0..5`; remaining bins bucket into log-spaced bands between 55 Hz and
    /// 15 kHz; anything above the topmost band's edge is dropped (`None`).
    fn build_band_map(
        sample_rate_hz: f64,
        fft_size: usize,
        bins: usize,
        band_count: usize,
    ) -> Vec<Option<usize>> {
        let edges: Vec<f64> = (0..=band_count)
            .map(|i| {
                let t = i as f64 / band_count as f64;
                BAND_LOW_FREQ_HZ * (BAND_HIGH_FREQ_HZ / BAND_LOW_FREQ_HZ).powf(t)
            })
            .collect();

        let mut map = vec![None; bins];
        for (bin, slot) in map.iter_mut().enumerate() {
            if bin < DIRECT_MAPPED_BINS && bin < band_count {
                *slot = Some(bin);
                continue;
            }
            let freq = bin as f64 * sample_rate_hz / fft_size as f64;
            if !(BAND_LOW_FREQ_HZ..BAND_HIGH_FREQ_HZ).contains(&freq) {
                continue;
            }
            if let Some(band) = edges
                .windows(2)
                .position(|w| freq >= w[0] && freq < w[1])
            {
                *slot = Some(band.max(DIRECT_MAPPED_BINS).min(band_count - 1));
            }
        }
        map
    }

    /// Feed one block of mixed stereo output into every ring buffer: PCM,
    /// left/right waveform, filtered low/mid/high waveform, and the FFT
    /// input ring (consumed by the next `process_fft_update`).
    pub fn push_block(&mut self, left: &[Sample], right: &[Sample]) {
        debug_assert_eq!(left.len(), right.len());
        for (&l, &r) in left.iter().zip(right) {
            let stereo = StereoSample::new(l, r);
            self.pcm[self.pcm_write] = stereo;
            self.pcm_write = (self.pcm_write + 1) % self.pcm.len();

            self.waveform_left[self.waveform_write] = l;
            self.waveform_right[self.waveform_write] = r;

            let mono = (l + r) * 0.5;
            self.waveform_low[self.waveform_write] = self.low_pass.process(mono);
            let hp = self.mid_high_pass.process(mono);
            self.waveform_mid[self.waveform_write] = self.mid_low_pass.process(hp);
            self.waveform_high[self.waveform_write] = self.high_pass.process(mono);
            self.waveform_write = (self.waveform_write + 1) % self.waveform_left.len();

            self.fft_input[self.fft_input_write] = mono as f64;
            self.fft_input_write = (self.fft_input_write + 1) % self.fft_size;
        }
    }

    /// Run the windowed FFT over the current input ring and refresh every
    /// band-derived buffer. `gain_factor` scales the FFT magnitude before the
    /// dB conversion; `decay_factor` controls peak-hold release (`0..1`,
    /// closer to 1 decays slower).
    pub fn process_fft_update(&mut self, gain_factor: f32, decay_factor: f32) {
        for (i, (&input, &win)) in self.fft_input.iter().zip(&self.window).enumerate() {
            self.fft_scratch[i] = input * win;
        }
        self.fft_scratch.rotate_left(self.fft_input_write);

        if self.fft.process(&mut self.fft_scratch, &mut self.fft_output).is_err() {
            self.fft_output.fill(Complex::new(0.0, 0.0));
        }

        let scale = 2.0 / self.fft_size as f64;
        for (i, c) in self.fft_output.iter().enumerate() {
            let magnitude = (c.re * c.re + c.im * c.im).sqrt() * scale * gain_factor as f64;
            self.gain_bins[i] = magnitude;
            let db = 20.0 * magnitude.max(1e-10).log10();
            self.normalized_bins[i] = remap(db, -80.0, 0.0, 0.0, 1.0) as f32;
        }

        let band_count = self.band_level.len();
        let mut max_per_band = vec![0.0f32; band_count];
        for (bin, band) in self.bin_band.iter().enumerate() {
            if let Some(band) = band {
                max_per_band[*band] = max_per_band[*band].max(self.normalized_bins[bin]);
            }
        }

        for band in 0..band_count {
            let current = max_per_band[band];
            self.band_level[band] = current;

            // Sliding window average for onset detection (~333 updates).
            let window = &mut self.band_window[band];
            if window.len() == SLIDING_WINDOW_LEN {
                self.band_window_sum[band] -= window.pop_front().unwrap_or(0.0);
            }
            window.push_back(current);
            self.band_window_sum[band] += current;
            let average = self.band_window_sum[band] / window.len() as f32;
            let above_average = (current - average).max(0.0);

            let old_peak = self.band_peak[band];
            let new_peak = (old_peak * decay_factor).max(current);
            self.band_peak[band] = new_peak;

            let new_attack = ((new_peak - old_peak) * 4.0).max(0.0);
            self.band_attack[band] = new_attack;
            self.band_peak_attack[band] =
                (self.band_peak_attack[band] * 0.995).max(new_attack);

            let onset = (above_average - self.band_above_average_prev[band]) * 2.0;
            self.band_onset[band] = onset.clamp(0.0, 1000.0);
            self.band_above_average_prev[band] = above_average;
        }
    }

    pub fn gain_bins(&self) -> &[f64] {
        &self.gain_bins
    }

    pub fn normalized_bins(&self) -> &[f32] {
        &self.normalized_bins
    }

    pub fn band_level(&self) -> &[f32] {
        &self.band_level
    }

    pub fn band_peak(&self) -> &[f32] {
        &self.band_peak
    }

    pub fn band_attack(&self) -> &[f32] {
        &self.band_attack
    }

    pub fn band_peak_attack(&self) -> &[f32] {
        &self.band_peak_attack
    }

    pub fn band_onset(&self) -> &[f32] {
        &self.band_onset
    }

    pub fn waveform_left(&self) -> &[Sample] {
        &self.waveform_left
    }

    pub fn waveform_right(&self) -> &[Sample] {
        &self.waveform_right
    }

    pub fn waveform_low(&self) -> &[Sample] {
        &self.waveform_low
    }

    pub fn waveform_mid(&self) -> &[Sample] {
        &self.waveform_mid
    }

    pub fn waveform_high(&self) -> &[Sample] {
        &self.waveform_high
    }

    pub fn pcm(&self) -> &[StereoSample] {
        &self.pcm
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }
}

/// Linearly remaps `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = ((value - in_lo) / (in_hi - in_lo)).clamp(0.0, 1.0);
    out_lo + t * (out_hi - out_lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_clamps_at_edges() {
        assert_eq!(remap(-100.0, -80.0, 0.0, 0.0, 1.0), 0.0);
        assert_eq!(remap(10.0, -80.0, 0.0, 0.0, 1.0), 1.0);
        assert_eq!(remap(-40.0, -80.0, 0.0, 0.0, 1.0), 0.5);
    }

    #[test]
    fn silence_produces_zero_bands() {
        let mut ctx = AnalysisContext::new(48_000.0, 1024, 1024, 32);
        for _ in 0..4 {
            let silence = vec![0.0f32; 2046];
            ctx.push_block(&silence, &silence);
            ctx.process_fft_update(1.0, 0.95);
        }
        assert!(ctx.band_level().iter().all(|&v| v <= 1e-3));
    }

    #[test]
    fn sine_wave_raises_its_band() {
        let sample_rate = 48_000.0;
        let mut ctx = AnalysisContext::new(sample_rate, 1024, 1024, 32);
        let freq = 1_000.0;
        let block: Vec<Sample> = (0..2046)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate).sin() as Sample)
            .collect();
        for _ in 0..4 {
            ctx.push_block(&block, &block);
            ctx.process_fft_update(1.0, 0.95);
        }
        let peak_band = ctx
            .band_level()
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        // 1kHz sits well above the direct-mapped bins and below the top band.
        assert!(peak_band > DIRECT_MAPPED_BINS);
        assert!(ctx.band_level()[peak_band] > 0.3);
    }

    #[test]
    fn waveform_split_preserves_dc_in_low_band() {
        let mut ctx = AnalysisContext::new(48_000.0, 1024, 1024, 32);
        let dc = vec![1.0f32; 4096];
        ctx.push_block(&dc, &dc);
        ctx.push_block(&dc, &dc);
        let last_low = *ctx.waveform_low().last().unwrap();
        let last_high = *ctx.waveform_high().last().unwrap();
        assert!(last_low > 0.5);
        assert!(last_high.abs() < 0.5);
    }
}
