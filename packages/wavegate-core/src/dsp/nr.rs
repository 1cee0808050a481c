//! Spectral-subtraction noise reduction (FFT overlap-add).
//!
//! A running per-bin noise estimate is subtracted from each frame's
//! magnitude spectrum; the result is resynthesized with 50% overlap-add
//! Hann windows. FFT plans and work buffers are allocated once at
//! construction.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// FFT frame size. 512 bins at 12 kHz gives ~23 Hz resolution, enough to
/// separate speech harmonics from the noise floor.
const NR_FFT_SIZE: usize = 512;

/// Hop size (50% overlap).
const NR_HOP: usize = NR_FFT_SIZE / 2;

/// Noise-estimate smoothing factor per frame when adaptation is on.
const NOISE_SMOOTH: f32 = 0.05;

/// Noise-reduction settings carried by `set_filters` control messages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NrSettings {
    /// Master enable.
    pub on: bool,
    /// Over-subtraction factor (1.0 = subtract the estimate exactly).
    pub strength: f32,
    /// Spectral floor: minimum gain kept per bin (0..1).
    pub floor: f32,
    /// Whether the noise estimate keeps adapting.
    pub adapt: bool,
}

impl Default for NrSettings {
    fn default() -> Self {
        Self {
            on: false,
            strength: 1.5,
            floor: 0.05,
            adapt: true,
        }
    }
}

/// Streaming spectral-subtraction processor over mono audio.
pub struct NoiseReducer {
    settings: NrSettings,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    input_accum: Vec<f32>,
    overlap: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    noise_estimate: Vec<f32>,
    frames_seen: u64,
}

impl NoiseReducer {
    /// Creates a reducer with preallocated plans and buffers.
    #[must_use]
    pub fn new(settings: NrSettings) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(NR_FFT_SIZE);
        let ifft = planner.plan_fft_inverse(NR_FFT_SIZE);
        let window: Vec<f32> = (0..NR_FFT_SIZE)
            .map(|n| 0.5 - 0.5 * (TAU * n as f32 / NR_FFT_SIZE as f32).cos())
            .collect();
        Self {
            settings,
            fft,
            ifft,
            window,
            input_accum: Vec::with_capacity(NR_FFT_SIZE * 4),
            overlap: vec![0.0; NR_HOP],
            spectrum: vec![Complex::new(0.0, 0.0); NR_FFT_SIZE],
            noise_estimate: vec![0.0; NR_FFT_SIZE],
            frames_seen: 0,
        }
    }

    /// Updates settings. Turning the reducer off flushes internal state so
    /// re-enabling starts from a fresh estimate.
    pub fn set_settings(&mut self, settings: NrSettings) {
        let was_on = self.settings.on;
        self.settings = settings;
        if was_on && !settings.on {
            self.input_accum.clear();
            self.overlap.iter_mut().for_each(|s| *s = 0.0);
            self.noise_estimate.iter_mut().for_each(|s| *s = 0.0);
            self.frames_seen = 0;
        }
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> NrSettings {
        self.settings
    }

    /// Processes a block. When disabled, input is copied through.
    ///
    /// The overlap-add structure introduces up to one hop of latency;
    /// output length may differ from input length by less than a hop.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        out.clear();
        if !self.settings.on {
            out.extend_from_slice(input);
            return;
        }
        self.input_accum.extend_from_slice(input);

        while self.input_accum.len() >= NR_FFT_SIZE {
            for (i, slot) in self.spectrum.iter_mut().enumerate() {
                *slot = Complex::new(self.input_accum[i] * self.window[i], 0.0);
            }
            self.fft.process(&mut self.spectrum);

            self.frames_seen += 1;
            let warming_up = self.frames_seen <= 10;
            for (bin, slot) in self.spectrum.iter_mut().enumerate() {
                let magnitude = slot.norm();
                let noise = &mut self.noise_estimate[bin];
                if warming_up {
                    // Seed the estimate from the first frames.
                    *noise += (magnitude - *noise) / self.frames_seen as f32;
                } else if self.settings.adapt && magnitude < *noise * 2.0 {
                    // Track slowly, and only on frames that look noise-like.
                    *noise += NOISE_SMOOTH * (magnitude - *noise);
                }
                let cleaned = (magnitude - self.settings.strength * *noise)
                    .max(self.settings.floor * magnitude);
                let gain = if magnitude > 1e-12 {
                    cleaned / magnitude
                } else {
                    0.0
                };
                *slot *= gain;
            }

            self.ifft.process(&mut self.spectrum);
            let scale = 1.0 / NR_FFT_SIZE as f32;
            for i in 0..NR_HOP {
                out.push(self.overlap[i] + self.spectrum[i].re * scale * self.window[i]);
            }
            for i in 0..NR_HOP {
                self.overlap[i] = self.spectrum[NR_HOP + i].re * scale * self.window[NR_HOP + i];
            }
            self.input_accum.drain(..NR_HOP);
        }
    }
}
