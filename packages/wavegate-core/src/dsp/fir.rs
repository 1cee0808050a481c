//! FIR filter design and polyphase decimation.
//!
//! Windowed-sinc design (Blackman window) for the anti-alias decimator and
//! the per-session passband filter. The passband filter is a complex-tap
//! FIR: a real lowpass prototype frequency-shifted to the passband center,
//! which handles the asymmetric passbands of SSB/CW directly.

use num_complex::Complex;
use std::f32::consts::{PI, TAU};

/// Designs a linear-phase lowpass via windowed sinc.
///
/// `cutoff` is the normalized cutoff (cycles/sample, 0..0.5). `num_taps`
/// is forced odd so the filter has a symmetric center tap.
#[must_use]
pub fn lowpass_taps(num_taps: usize, cutoff: f32) -> Vec<f32> {
    let num_taps = if num_taps % 2 == 0 {
        num_taps + 1
    } else {
        num_taps
    };
    let m = (num_taps - 1) as f32;
    let mut taps = Vec::with_capacity(num_taps);
    let mut sum = 0.0f32;
    for n in 0..num_taps {
        let x = n as f32 - m / 2.0;
        let sinc = if x == 0.0 {
            2.0 * cutoff
        } else {
            (TAU * cutoff * x).sin() / (PI * x)
        };
        // Blackman window
        let w = 0.42 - 0.5 * (TAU * n as f32 / m).cos() + 0.08 * (2.0 * TAU * n as f32 / m).cos();
        let tap = sinc * w;
        sum += tap;
        taps.push(tap);
    }
    // Unity DC gain
    for tap in &mut taps {
        *tap /= sum;
    }
    taps
}

/// Designs a complex bandpass from a lowpass prototype.
///
/// `low_hz..high_hz` may sit anywhere in ±rate/2, including fully negative
/// (LSB). The prototype covers half the passband width; shifting its taps
/// by the passband center makes the response one-sided.
#[must_use]
pub fn complex_bandpass_taps(num_taps: usize, low_hz: f32, high_hz: f32, rate: f32) -> Vec<Complex<f32>> {
    let width = (high_hz - low_hz).max(10.0);
    let center = (high_hz + low_hz) / 2.0;
    let proto = lowpass_taps(num_taps, (width / 2.0 / rate).min(0.499));
    proto
        .iter()
        .enumerate()
        .map(|(n, &tap)| {
            let phase = TAU * center / rate * n as f32;
            Complex::new(phase.cos(), phase.sin()) * tap
        })
        .collect()
}

/// Streaming complex FIR with preallocated history.
pub struct ComplexFir {
    taps: Vec<Complex<f32>>,
    history: Vec<Complex<f32>>,
    pos: usize,
}

impl ComplexFir {
    /// Creates the filter; history is zeroed.
    #[must_use]
    pub fn new(taps: Vec<Complex<f32>>) -> Self {
        let len = taps.len();
        Self {
            taps,
            history: vec![Complex::new(0.0, 0.0); len],
            pos: 0,
        }
    }

    /// Replaces the taps, preserving as much history as fits.
    pub fn set_taps(&mut self, taps: Vec<Complex<f32>>) {
        if taps.len() != self.taps.len() {
            self.history = vec![Complex::new(0.0, 0.0); taps.len()];
            self.pos = 0;
        }
        self.taps = taps;
    }

    /// Filters `input` into `out` (cleared first).
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<Complex<f32>>) {
        out.clear();
        out.reserve(input.len());
        let n = self.taps.len();
        for &sample in input {
            self.history[self.pos] = sample;
            let mut acc = Complex::new(0.0, 0.0);
            let mut idx = self.pos;
            for &tap in &self.taps {
                acc += self.history[idx] * tap;
                idx = if idx == 0 { n - 1 } else { idx - 1 };
            }
            self.pos = (self.pos + 1) % n;
            out.push(acc);
        }
    }
}

/// Integer-factor FIR decimator with real taps over complex samples.
///
/// Polyphase evaluation: the lowpass is only computed at output instants,
/// so cost scales with the output rate, not the input rate.
pub struct FirDecimator {
    taps: Vec<f32>,
    history: Vec<Complex<f32>>,
    pos: usize,
    factor: usize,
    phase: usize,
}

impl FirDecimator {
    /// Creates a decimator for the given integer factor.
    ///
    /// Tap count grows with the factor so the transition band stays
    /// proportionally narrow.
    #[must_use]
    pub fn new(factor: usize) -> Self {
        let factor = factor.max(1);
        let num_taps = (factor * 8 + 1).min(513);
        // Cut slightly below the output Nyquist to keep aliasing down.
        let taps = lowpass_taps(num_taps, 0.45 / factor as f32);
        let len = taps.len();
        Self {
            taps,
            history: vec![Complex::new(0.0, 0.0); len],
            pos: 0,
            factor,
            phase: 0,
        }
    }

    /// Decimation factor.
    #[must_use]
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Pushes `input` through the filter, appending decimated samples to
    /// `out` (cleared first).
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<Complex<f32>>) {
        out.clear();
        out.reserve(input.len() / self.factor + 1);
        let n = self.taps.len();
        for &sample in input {
            self.history[self.pos] = sample;
            self.phase += 1;
            if self.phase >= self.factor {
                self.phase = 0;
                let mut acc = Complex::new(0.0, 0.0);
                let mut idx = self.pos;
                for &tap in &self.taps {
                    acc += self.history[idx] * tap;
                    idx = if idx == 0 { n - 1 } else { idx - 1 };
                }
                out.push(acc);
            }
            self.pos = (self.pos + 1) % n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: f32, n: usize) -> Vec<Complex<f32>> {
        (0..n)
            .map(|i| {
                let phase = TAU * freq * i as f32 / rate;
                Complex::new(phase.cos(), phase.sin())
            })
            .collect()
    }

    fn rms(samples: &[Complex<f32>]) -> f32 {
        (samples.iter().map(|s| s.norm_sqr()).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn lowpass_has_unity_dc_gain() {
        let taps = lowpass_taps(65, 0.1);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn even_tap_request_is_made_odd() {
        assert_eq!(lowpass_taps(64, 0.1).len(), 65);
    }

    #[test]
    fn decimator_passes_inband_rejects_outband() {
        let rate = 96_000.0;
        let mut decim = FirDecimator::new(8); // output 12 kHz, cutoff ~5.4 kHz
        let mut out = Vec::new();

        decim.process(&tone(1_000.0, rate, 9600), &mut out);
        let inband = rms(&out[out.len() / 2..]);
        assert!(inband > 0.7, "inband tone attenuated: {inband}");

        let mut decim = FirDecimator::new(8);
        decim.process(&tone(20_000.0, rate, 9600), &mut out);
        let outband = rms(&out[out.len() / 2..]);
        assert!(outband < 0.05, "outband tone leaked: {outband}");
    }

    #[test]
    fn decimator_output_length() {
        let mut decim = FirDecimator::new(4);
        let mut out = Vec::new();
        decim.process(&vec![Complex::new(1.0, 0.0); 400], &mut out);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn complex_bandpass_selects_one_sideband() {
        let rate = 12_000.0;
        let taps = complex_bandpass_taps(129, 50.0, 2_700.0, rate);
        let mut fir = ComplexFir::new(taps);
        let mut out = Vec::new();

        // Positive-frequency tone inside the passband survives.
        fir.process(&tone(1_000.0, rate, 4096), &mut out);
        assert!(rms(&out[2048..]) > 0.7);

        // Mirror-image tone (negative frequency) is rejected.
        let taps = complex_bandpass_taps(129, 50.0, 2_700.0, rate);
        let mut fir = ComplexFir::new(taps);
        fir.process(&tone(-1_000.0, rate, 4096), &mut out);
        assert!(rms(&out[2048..]) < 0.05);
    }
}
