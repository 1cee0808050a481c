//! Automatic gain control: look-ahead leaky-integrator design.
//!
//! A short delay line lets the gain computation see a few milliseconds
//! ahead, so attacks reduce gain before the transient reaches the output
//! instead of clipping through it.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed AGC time-constant profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgcProfile {
    Slow,
    #[default]
    Medium,
    Fast,
}

impl AgcProfile {
    /// (attack_ms, release_ms, lookahead_ms) for this profile.
    const fn times(self) -> (f32, f32, f32) {
        match self {
            Self::Slow => (50.0, 2_000.0, 10.0),
            Self::Medium => (15.0, 500.0, 5.0),
            Self::Fast => (3.0, 100.0, 2.0),
        }
    }
}

/// Target output level (fraction of full scale).
const TARGET_LEVEL: f32 = 0.5;

/// Hard gain ceiling to keep noise from being amplified without bound.
const MAX_GAIN: f32 = 1_000.0;

/// Look-ahead leaky-integrator AGC over mono audio.
pub struct Agc {
    profile: AgcProfile,
    sample_rate: u32,
    attack_coeff: f32,
    release_coeff: f32,
    delay: VecDeque<f32>,
    lookahead: usize,
    envelope: f32,
}

impl Agc {
    /// Creates an AGC for the given audio rate and profile.
    #[must_use]
    pub fn new(sample_rate: u32, profile: AgcProfile) -> Self {
        let mut agc = Self {
            profile,
            sample_rate,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            delay: VecDeque::new(),
            lookahead: 0,
            envelope: 0.0,
        };
        agc.configure();
        agc
    }

    fn configure(&mut self) {
        let (attack_ms, release_ms, lookahead_ms) = self.profile.times();
        let rate = self.sample_rate as f32;
        self.attack_coeff = 1.0 - (-1.0 / (attack_ms * 1e-3 * rate)).exp();
        self.release_coeff = 1.0 - (-1.0 / (release_ms * 1e-3 * rate)).exp();
        self.lookahead = ((lookahead_ms * 1e-3 * rate) as usize).max(1);
        self.delay.clear();
        self.delay.extend(std::iter::repeat(0.0).take(self.lookahead));
        self.envelope = 0.0;
    }

    /// Switches the profile. Resets the delay line.
    pub fn set_profile(&mut self, profile: AgcProfile) {
        if profile == self.profile {
            return;
        }
        self.profile = profile;
        self.configure();
    }

    /// Updates the audio rate (mode change).
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.configure();
    }

    /// Active profile.
    #[must_use]
    pub fn profile(&self) -> AgcProfile {
        self.profile
    }

    /// Applies gain control to the block in place.
    pub fn process_inplace(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            // The envelope tracks the incoming (future) sample while the
            // delayed sample is what gets the gain.
            let magnitude = sample.abs();
            let coeff = if magnitude > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope += coeff * (magnitude - self.envelope);

            self.delay.push_back(*sample);
            let delayed = self.delay.pop_front().unwrap_or(0.0);

            let gain = if self.envelope > 1e-9 {
                (TARGET_LEVEL / self.envelope).min(MAX_GAIN)
            } else {
                MAX_GAIN
            };
            *sample = (delayed * gain).clamp(-1.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    fn tone(freq: f32, rate: f32, amplitude: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amplitude * (TAU * freq * i as f32 / rate).sin())
            .collect()
    }

    fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    #[test]
    fn weak_signal_is_brought_to_target() {
        let mut agc = Agc::new(12_000, AgcProfile::Fast);
        let mut block = tone(500.0, 12_000.0, 0.01, 24_000);
        agc.process_inplace(&mut block);
        let settled = peak(&block[12_000..]);
        assert!(
            (settled - TARGET_LEVEL).abs() < 0.15,
            "settled level {settled}"
        );
    }

    #[test]
    fn strong_signal_is_attenuated_without_clipping() {
        let mut agc = Agc::new(12_000, AgcProfile::Fast);
        let mut block = tone(500.0, 12_000.0, 0.95, 24_000);
        agc.process_inplace(&mut block);
        assert!(peak(&block) <= 1.0);
        let settled = peak(&block[12_000..]);
        assert!(settled < 0.7, "settled level {settled}");
    }

    #[test]
    fn silence_stays_silent() {
        let mut agc = Agc::new(12_000, AgcProfile::Medium);
        let mut block = vec![0.0f32; 1024];
        agc.process_inplace(&mut block);
        assert!(peak(&block) < 1e-6);
    }

    #[test]
    fn profile_change_reconfigures() {
        let mut agc = Agc::new(12_000, AgcProfile::Slow);
        agc.set_profile(AgcProfile::Fast);
        assert_eq!(agc.profile(), AgcProfile::Fast);
    }
}
