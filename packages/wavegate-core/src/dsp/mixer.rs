//! Complex mixer: frequency translation with phase continuity.

use num_complex::Complex;
use std::f32::consts::TAU;

/// Phase-continuous complex oscillator used to shift a tuned signal to
/// baseband. Phase is preserved across frames and frequency changes.
pub struct ComplexMixer {
    phasor: Complex<f32>,
    step: Complex<f32>,
    frequency_hz: f64,
    sample_rate_hz: u32,
}

impl ComplexMixer {
    /// Creates a mixer at 0 Hz (identity).
    pub fn new(sample_rate_hz: u32) -> Self {
        Self {
            phasor: Complex::new(1.0, 0.0),
            step: Complex::new(1.0, 0.0),
            frequency_hz: 0.0,
            sample_rate_hz,
        }
    }

    /// Sets the translation frequency. Positive values shift the input
    /// spectrum down by `frequency_hz` (a signal at +f lands at DC).
    pub fn set_frequency(&mut self, frequency_hz: f64) {
        if frequency_hz == self.frequency_hz {
            return;
        }
        self.frequency_hz = frequency_hz;
        let w = -TAU * (frequency_hz / self.sample_rate_hz as f64) as f32;
        self.step = Complex::new(w.cos(), w.sin());
    }

    /// Updates the sample rate (wideband generation change), keeping the
    /// oscillator phase.
    pub fn set_sample_rate(&mut self, sample_rate_hz: u32) {
        if sample_rate_hz == self.sample_rate_hz {
            return;
        }
        self.sample_rate_hz = sample_rate_hz;
        let f = self.frequency_hz;
        self.frequency_hz = f64::NAN; // force step recompute
        self.set_frequency(f);
    }

    /// Current translation frequency (Hz).
    #[must_use]
    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    /// Mixes `input` into `out` (cleared first). Phase carries over to the
    /// next call.
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<Complex<f32>>) {
        out.clear();
        out.reserve(input.len());
        for &sample in input {
            out.push(sample * self.phasor);
            self.phasor *= self.step;
        }
        // Renormalize once per block; the recurrence drifts off the unit
        // circle by ~1 ulp per multiply.
        let norm = self.phasor.norm();
        if norm > 0.0 {
            self.phasor /= norm;
        } else {
            self.phasor = Complex::new(1.0, 0.0);
        }
    }
}
