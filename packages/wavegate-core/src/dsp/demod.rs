//! Demodulator bank: AM, SAM, SSB/CW, FM.
//!
//! All detectors consume complex baseband at the working rate (carrier at
//! DC after mixing and passband filtering) and produce mono f32 audio.
//! IQ modes bypass this module entirely.

use num_complex::Complex;
use std::f32::consts::TAU;

use crate::protocol_constants::CW_AUDIO_OFFSET_HZ;
use crate::tuning::Mode;

/// Single-pole DC blocker (removes the carrier term after envelope and
/// synchronous detection).
struct DcBlocker {
    prev_x: f32,
    prev_y: f32,
}

impl DcBlocker {
    fn new() -> Self {
        Self {
            prev_x: 0.0,
            prev_y: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = x - self.prev_x + 0.995 * self.prev_y;
        self.prev_x = x;
        self.prev_y = y;
        y
    }
}

/// AM envelope detector.
pub struct AmDetector {
    dc: DcBlocker,
}

impl AmDetector {
    fn new() -> Self {
        Self { dc: DcBlocker::new() }
    }

    fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<f32>) {
        for &z in input {
            out.push(self.dc.process(z.norm()));
        }
    }
}

/// Synchronous AM detector: a second-order PLL locks to the carrier and
/// the in-phase product is the audio.
pub struct SamDetector {
    phase: f32,
    freq: f32,
    alpha: f32,
    beta: f32,
    dc: DcBlocker,
}

impl SamDetector {
    fn new() -> Self {
        // Loop bandwidth around 1% of the sample rate; wide enough to pull
        // in a mistuned carrier within tens of milliseconds.
        let alpha = 0.02;
        Self {
            phase: 0.0,
            freq: 0.0,
            alpha,
            beta: alpha * alpha / 4.0,
            dc: DcBlocker::new(),
        }
    }

    fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<f32>) {
        for &z in input {
            let local = Complex::new(self.phase.cos(), -self.phase.sin());
            let v = z * local;
            let err = v.im.atan2(v.re.abs().max(1e-12));
            self.freq += self.beta * err;
            self.freq = self.freq.clamp(-0.1, 0.1);
            self.phase += self.freq + self.alpha * err;
            if self.phase > TAU {
                self.phase -= TAU;
            } else if self.phase < -TAU {
                self.phase += TAU;
            }
            out.push(self.dc.process(v.re));
        }
    }
}

/// SSB product detector. CW modes add a fixed audio offset so a carrier
/// on the dial beats at a comfortable pitch.
pub struct SsbDetector {
    phasor: Complex<f32>,
    step: Complex<f32>,
    shifted: bool,
}

impl SsbDetector {
    fn new(mode: Mode, sample_rate: u32) -> Self {
        let offset = match mode {
            Mode::Cwu => CW_AUDIO_OFFSET_HZ,
            Mode::Cwl => -CW_AUDIO_OFFSET_HZ,
            _ => 0.0,
        };
        let w = TAU * offset / sample_rate as f32;
        Self {
            phasor: Complex::new(1.0, 0.0),
            step: Complex::new(w.cos(), w.sin()),
            shifted: offset != 0.0,
        }
    }

    fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<f32>) {
        if !self.shifted {
            for &z in input {
                out.push(z.re);
            }
            return;
        }
        for &z in input {
            out.push((z * self.phasor).re);
            self.phasor *= self.step;
        }
        let norm = self.phasor.norm();
        if norm > 0.0 {
            self.phasor /= norm;
        }
    }
}

/// FM discriminator: arctangent of the sample-to-sample phase rotation,
/// scaled by the mode's deviation, followed by 50 µs de-emphasis.
pub struct FmDetector {
    prev: Complex<f32>,
    gain: f32,
    deemph_state: f32,
    deemph_alpha: f32,
}

impl FmDetector {
    fn new(mode: Mode, sample_rate: u32) -> Self {
        let deviation = match mode {
            Mode::Nfm => 5_000.0,
            _ => 75_000.0,
        };
        let rate = sample_rate as f32;
        Self {
            prev: Complex::new(1.0, 0.0),
            gain: rate / (TAU * deviation),
            deemph_state: 0.0,
            deemph_alpha: 1.0 - (-1.0 / (50e-6 * rate)).exp(),
        }
    }

    fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<f32>) {
        for &z in input {
            let rotation = z * self.prev.conj();
            self.prev = z;
            let audio = rotation.im.atan2(rotation.re) * self.gain;
            self.deemph_state += self.deemph_alpha * (audio - self.deemph_state);
            out.push(self.deemph_state.clamp(-1.0, 1.0));
        }
    }
}

/// Demodulator selected for one session's mode.
pub enum Demodulator {
    Am(AmDetector),
    Sam(SamDetector),
    Ssb(SsbDetector),
    Fm(FmDetector),
}

impl Demodulator {
    /// Builds the detector for an audio mode. Returns `None` for IQ modes,
    /// which bypass demodulation.
    #[must_use]
    pub fn for_mode(mode: Mode, sample_rate: u32) -> Option<Self> {
        match mode {
            Mode::Am => Some(Self::Am(AmDetector::new())),
            Mode::Sam => Some(Self::Sam(SamDetector::new())),
            Mode::Usb | Mode::Lsb | Mode::Cwu | Mode::Cwl => {
                Some(Self::Ssb(SsbDetector::new(mode, sample_rate)))
            }
            Mode::Fm | Mode::Nfm => Some(Self::Fm(FmDetector::new(mode, sample_rate))),
            _ => None,
        }
    }

    /// Demodulates a block, appending audio to `out` (cleared first).
    pub fn process(&mut self, input: &[Complex<f32>], out: &mut Vec<f32>) {
        out.clear();
        out.reserve(input.len());
        match self {
            Self::Am(d) => d.process(input, out),
            Self::Sam(d) => d.process(input, out),
            Self::Ssb(d) => d.process(input, out),
            Self::Fm(d) => d.process(input, out),
        }
    }
}
