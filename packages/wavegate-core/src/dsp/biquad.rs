//! Biquad filters for user notches and audio bandpass shaping.
//!
//! Direct Form II Transposed for numerical stability; coefficients from
//! the RBJ Audio EQ Cookbook. Coefficients use f64, sample path f32.

use serde::{Deserialize, Serialize};

/// One user-requested notch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotchSpec {
    /// Notch center in audio frequency (Hz).
    pub hz: f32,
    /// Notch width (Hz). Q is derived as center/width.
    pub width: f32,
}

/// Single biquad section.
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    /// RBJ notch at `freq` Hz with bandwidth expressed as Q.
    #[must_use]
    pub fn notch(freq: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = std::f64::consts::TAU * (freq / sample_rate).clamp(0.0001, 0.4999);
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q.max(0.1));

        let b0 = 1.0;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Processes one sample (Direct Form II Transposed).
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let x = x as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }

    /// Clears filter state.
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Cascade of user notches applied to the demodulated audio.
///
/// The cascade is rebuilt when a control message changes the notch list;
/// the per-sample path only iterates preallocated sections.
pub struct NotchChain {
    sections: Vec<Biquad>,
    specs: Vec<NotchSpec>,
    sample_rate: f64,
}

impl NotchChain {
    /// Creates an empty chain for the given audio rate.
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sections: Vec::new(),
            specs: Vec::new(),
            sample_rate: sample_rate as f64,
        }
    }

    /// Replaces the notch set. Called at block boundaries only.
    pub fn set_notches(&mut self, specs: &[NotchSpec]) {
        if specs == self.specs.as_slice() {
            return;
        }
        self.specs = specs.to_vec();
        self.rebuild();
    }

    /// Updates the audio rate (mode change), rebuilding sections.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if (sample_rate as f64 - self.sample_rate).abs() < f64::EPSILON {
            return;
        }
        self.sample_rate = sample_rate as f64;
        self.rebuild();
    }

    fn rebuild(&mut self) {
        self.sections.clear();
        for spec in &self.specs {
            let q = (spec.hz / spec.width.max(1.0)).clamp(0.5, 100.0);
            self.sections
                .push(Biquad::notch(spec.hz as f64, q as f64, self.sample_rate));
        }
    }

    /// Number of active notches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Active notch specs.
    #[must_use]
    pub fn specs(&self) -> &[NotchSpec] {
        &self.specs
    }

    /// Filters the block in place.
    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        for section in &mut self.sections {
            for sample in samples.iter_mut() {
                *sample = section.process(*sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone(freq: f32, rate: f32, n: usize) -> Vec<f32> {
        (0..n).map(|i| (TAU * freq * i as f32 / rate).sin()).collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn notch_kills_center_passes_neighbors() {
        let rate = 12_000.0;
        let mut chain = NotchChain::new(12_000);
        chain.set_notches(&[NotchSpec {
            hz: 1_000.0,
            width: 100.0,
        }]);

        let mut at_center = tone(1_000.0, rate, 12_000);
        chain.process_inplace(&mut at_center);
        assert!(rms(&at_center[6_000..]) < 0.05);

        let mut chain = NotchChain::new(12_000);
        chain.set_notches(&[NotchSpec {
            hz: 1_000.0,
            width: 100.0,
        }]);
        let mut neighbor = tone(2_500.0, rate, 12_000);
        chain.process_inplace(&mut neighbor);
        assert!(rms(&neighbor[6_000..]) > 0.6);
    }

    #[test]
    fn identical_specs_do_not_rebuild() {
        let mut chain = NotchChain::new(12_000);
        let specs = [NotchSpec {
            hz: 700.0,
            width: 50.0,
        }];
        chain.set_notches(&specs);
        // Prime some state, then re-apply the identical spec list: the
        // sections (and their state) must be left alone.
        let mut block = tone(700.0, 12_000.0, 64);
        chain.process_inplace(&mut block);
        let before = chain.sections[0].z1;
        chain.set_notches(&specs);
        assert_eq!(chain.sections[0].z1, before);
    }

    #[test]
    fn empty_chain_is_identity() {
        let mut chain = NotchChain::new(12_000);
        let original = tone(440.0, 12_000.0, 256);
        let mut processed = original.clone();
        chain.process_inplace(&mut processed);
        assert_eq!(original, processed);
    }
}
