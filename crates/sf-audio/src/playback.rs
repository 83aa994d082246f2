//! Shared decode-stream playback and spatial math, used by every
//! [`NativeBackend`](crate::backend::NativeBackend) implementation.

use sf_dsp::PeakLevelMeter;

use crate::backend::Spatial3DParams;

/// One decode stream's playback state: a clip reference plus a read cursor.
/// Generic over the clip storage so both the real and mock backends can
/// supply their own decoded/synthetic buffers.
#[derive(Debug, Clone)]
pub struct DecodeStream {
    pub channels: Vec<Vec<f32>>,
    pub clip_sample_rate: u32,
    pub position_frames: f64,
    pub paused: bool,
    pub volume: f32,
    pub freq_ratio: f32,
    pub looping: bool,
    pub spatial: Option<Spatial3DParams>,
    meter: PeakLevelMeter,
}

impl DecodeStream {
    pub fn new(channels: Vec<Vec<f32>>, clip_sample_rate: u32) -> Self {
        Self {
            channels,
            clip_sample_rate,
            position_frames: 0.0,
            paused: true,
            volume: 1.0,
            freq_ratio: 1.0,
            looping: false,
            spatial: None,
            meter: PeakLevelMeter::new(clip_sample_rate.max(1) as f64, 0.3),
        }
    }

    /// Peak level of this stream's own contribution over the configured
    /// metering window, independent of any mixer it's attached to.
    pub fn level(&self) -> f32 {
        self.meter.level()
    }

    pub fn num_frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn position_seconds(&self) -> f64 {
        if self.clip_sample_rate == 0 {
            0.0
        } else {
            self.position_frames / self.clip_sample_rate as f64
        }
    }

    pub fn set_position_seconds(&mut self, seconds: f64) {
        self.position_frames = (seconds * self.clip_sample_rate as f64).max(0.0);
    }

    /// Linear-interpolated read of one source frame at the given channel.
    fn sample_at(&self, channel: usize, frame_pos: f64) -> f32 {
        let data = match self.channels.get(channel).or_else(|| self.channels.first()) {
            Some(c) if !c.is_empty() => c,
            _ => return 0.0,
        };
        let len = data.len();
        let i0 = frame_pos.floor() as usize;
        if i0 >= len {
            return 0.0;
        }
        let frac = (frame_pos - i0 as f64) as f32;
        let s0 = data[i0];
        let s1 = data.get(i0 + 1).copied().unwrap_or(s0);
        s0 + (s1 - s0) * frac
    }

    /// Advance `frames` output frames at `device_sample_rate`, mixing into
    /// `left`/`right` with this stream's volume applied. Returns the number
    /// of frames actually produced before the clip ran out (without looping).
    pub fn mix_into(&mut self, frames: usize, device_sample_rate: u32, left: &mut [f32], right: &mut [f32]) {
        if self.paused || self.channels.is_empty() {
            return;
        }
        let step = (self.clip_sample_rate as f64 / device_sample_rate as f64) * self.freq_ratio as f64;
        let stereo = self.channels.len() >= 2;

        for i in 0..frames {
            if self.position_frames >= self.num_frames() as f64 {
                if self.looping && self.num_frames() > 0 {
                    self.position_frames = 0.0;
                } else {
                    self.paused = true;
                    break;
                }
            }
            let l = self.sample_at(0, self.position_frames) * self.volume;
            let r = (if stereo { self.sample_at(1, self.position_frames) } else { self.sample_at(0, self.position_frames) }) * self.volume;
            left[i] += l;
            right[i] += r;
            self.meter.process(l);
            self.meter.process(r);
            self.position_frames += step;
        }
    }
}

/// Linear distance attenuation: 1 at or inside `min_distance`, 0 at or
/// beyond `max_distance`, linear in between.
pub fn distance_attenuation(distance: f32, min_distance: f32, max_distance: f32) -> f32 {
    if distance <= min_distance {
        1.0
    } else if distance >= max_distance {
        0.0
    } else {
        1.0 - (distance - min_distance) / (max_distance - min_distance)
    }
}

/// Cone attenuation using half-angles: 1 inside the inner half-cone,
/// `outer_gain` outside the outer half-cone, linear in between.
pub fn cone_attenuation(angle_deg: f32, inner_deg: f32, outer_deg: f32, outer_gain: f32) -> f32 {
    let inner_half = inner_deg * 0.5;
    let outer_half = (outer_deg * 0.5).max(inner_half);
    if angle_deg <= inner_half {
        1.0
    } else if angle_deg >= outer_half {
        outer_gain
    } else {
        let t = (angle_deg - inner_half) / (outer_half - inner_half);
        1.0 + t * (outer_gain - 1.0)
    }
}

/// Angle in degrees between a source's facing direction and the vector
/// toward the listener: `0` means the listener is directly ahead, `180`
/// means directly behind. Coincident source/listener positions are treated
/// as on-axis (`0`).
pub fn cone_angle_deg(orientation: [f32; 3], source: [f32; 3], listener: [f32; 3]) -> f32 {
    let to_listener = [
        listener[0] - source[0],
        listener[1] - source[1],
        listener[2] - source[2],
    ];
    let orientation_len = (orientation[0] * orientation[0] + orientation[1] * orientation[1] + orientation[2] * orientation[2]).sqrt();
    let to_listener_len = (to_listener[0] * to_listener[0] + to_listener[1] * to_listener[1] + to_listener[2] * to_listener[2]).sqrt();
    if orientation_len < 1e-6 || to_listener_len < 1e-6 {
        return 0.0;
    }
    let dot = (orientation[0] * to_listener[0] + orientation[1] * to_listener[1] + orientation[2] * to_listener[2]) / (orientation_len * to_listener_len);
    dot.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Equal-power stereo pan gains for `pan` in `[-1, 1]`; center (`0`) yields
/// `|L| = |R| ≈ 0.707`.
pub fn equal_power_pan(pan: f32) -> (f32, f32) {
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_attenuation_edges() {
        assert_eq!(distance_attenuation(0.5, 1.0, 10.0), 1.0);
        assert_eq!(distance_attenuation(20.0, 1.0, 10.0), 0.0);
        assert!((distance_attenuation(5.0, 1.0, 10.0) - (1.0 - 4.0 / 9.0)).abs() < 1e-6);
    }

    #[test]
    fn pan_center_is_equal_power() {
        let (l, r) = equal_power_pan(0.0);
        assert!((l - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert!((r - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn pan_hard_left_right() {
        let (l, r) = equal_power_pan(-1.0);
        assert!(r < 1e-4);
        assert!((l - 1.0).abs() < 1e-4);
        let (l2, r2) = equal_power_pan(1.0);
        assert!(l2 < 1e-4);
        assert!((r2 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cone_attenuation_monotonic() {
        let a_in = cone_attenuation(5.0, 60.0, 120.0, 0.2);
        let a_mid = cone_attenuation(45.0, 60.0, 120.0, 0.2);
        let a_out = cone_attenuation(70.0, 60.0, 120.0, 0.2);
        assert_eq!(a_in, 1.0);
        assert_eq!(a_out, 0.2);
        assert!(a_mid < a_in && a_mid > a_out);
    }

    #[test]
    fn cone_angle_on_axis_and_behind() {
        let ahead = cone_angle_deg([0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [0.0, 0.0, 10.0]);
        assert!(ahead.abs() < 1e-3);
        let behind = cone_angle_deg([0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [0.0, 0.0, -10.0]);
        assert!((behind - 180.0).abs() < 1e-3);
        let side = cone_angle_deg([0.0, 0.0, 1.0], [0.0, 0.0, 0.0], [10.0, 0.0, 0.0]);
        assert!((side - 90.0).abs() < 1e-3);
    }

    #[test]
    fn decode_stream_reads_linear_samples() {
        let mut stream = DecodeStream::new(vec![vec![0.0, 1.0, 0.0, -1.0]], 4);
        stream.paused = false;
        let mut left = vec![0.0; 4];
        let mut right = vec![0.0; 4];
        stream.mix_into(4, 4, &mut left, &mut right);
        assert_eq!(left, vec![0.0, 1.0, 0.0, -1.0]);
    }
}
