//! Spectrum engine: bounded-rate waterfall frames per client zoom.
//!
//! Each session owns one engine. The wideband input is mixed and decimated
//! to the client's view, Hann-windowed FFTs with 50% overlap are averaged
//! with an EMA, and frames are emitted at a capped rate. Bin values are
//! quantized to one byte: `clamp(2 * dB + 240, 0, 255)`.

use std::sync::Arc;

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;

use crate::bus::WidebandParams;
use crate::dsp::fir::FirDecimator;
use crate::dsp::mixer::ComplexMixer;
use crate::frame::IqFrame;
use crate::state::StreamingConfig;

/// Percentile used for the noise-floor estimate (squelch suggestion).
const NOISE_FLOOR_PERCENTILE: f32 = 0.15;

/// EMA weight for new FFT frames.
const EMA_ALPHA: f32 = 0.35;

/// One waterfall frame.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// Quantized dB bins, lowest frequency first.
    pub bins: Vec<u8>,
    /// View center (Hz).
    pub center_hz: i64,
    /// Width of one bin (Hz).
    pub bin_hz: f64,
    /// GPS wall-clock of the newest contributing samples (nanoseconds).
    pub gps_ts_ns: u64,
    /// Estimated noise floor (dB), usable as a squelch threshold.
    pub noise_floor_db: f32,
}

/// Quantizes a dB value into the wire byte.
#[inline]
#[must_use]
pub fn quantize_db(db: f32) -> u8 {
    (2.0 * db + 240.0).clamp(0.0, 255.0) as u8
}

/// Per-session spectrum computation.
pub struct SpectrumEngine {
    view_center_hz: i64,
    view_span_hz: u32,
    wideband: WidebandParams,
    max_fps: u32,

    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,

    mixer: ComplexMixer,
    decimator: FirDecimator,
    view_rate: u32,

    accum: Vec<Complex<f32>>,
    fft_buf: Vec<Complex<f32>>,
    ema_db: Vec<f32>,
    ema_primed: bool,

    mixed: Vec<Complex<f32>>,
    decimated: Vec<Complex<f32>>,

    last_emit_gps_ns: u64,
}

impl SpectrumEngine {
    /// Creates an engine for an initial view covering the whole wideband.
    #[must_use]
    pub fn new(config: &StreamingConfig, wideband: WidebandParams) -> Self {
        let fft_size = config.spectrum_fft_size;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let window: Vec<f32> = (0..fft_size)
            .map(|n| 0.5 - 0.5 * (TAU * n as f32 / fft_size as f32).cos())
            .collect();
        let mut engine = Self {
            view_center_hz: wideband.center_hz,
            view_span_hz: wideband.sample_rate_hz.max(1),
            wideband,
            max_fps: config.spectrum_max_fps,
            fft,
            fft_size,
            window,
            mixer: ComplexMixer::new(wideband.sample_rate_hz.max(1)),
            decimator: FirDecimator::new(1),
            view_rate: wideband.sample_rate_hz.max(1),
            accum: Vec::with_capacity(fft_size * 2),
            fft_buf: vec![Complex::new(0.0, 0.0); fft_size],
            ema_db: vec![-120.0; fft_size],
            ema_primed: false,
            mixed: Vec::new(),
            decimated: Vec::new(),
            last_emit_gps_ns: 0,
        };
        engine.reconfigure();
        engine
    }

    /// Applies a `spectrum_zoom` control message.
    pub fn set_zoom(&mut self, center_hz: i64, span_hz: u32) {
        let span_hz = span_hz.clamp(1_000, self.wideband.sample_rate_hz.max(1_000));
        if center_hz == self.view_center_hz && span_hz == self.view_span_hz {
            return;
        }
        self.view_center_hz = center_hz;
        self.view_span_hz = span_hz;
        self.reconfigure();
    }

    /// Current view (center, span) in Hz.
    #[must_use]
    pub fn zoom(&self) -> (i64, u32) {
        (self.view_center_hz, self.view_span_hz)
    }

    fn reconfigure(&mut self) {
        let wideband_rate = self.wideband.sample_rate_hz.max(1);
        let factor = (wideband_rate / self.view_span_hz.max(1)).max(1) as usize;
        self.view_rate = wideband_rate / factor as u32;
        self.mixer = ComplexMixer::new(wideband_rate);
        self.mixer
            .set_frequency((self.view_center_hz - self.wideband.center_hz) as f64);
        self.decimator = FirDecimator::new(factor);
        self.accum.clear();
        self.ema_db.iter_mut().for_each(|b| *b = -120.0);
        self.ema_primed = false;
    }

    /// Feeds one wideband frame; returns a spectrum frame when the rate
    /// cap allows one.
    pub fn process(&mut self, frame: &IqFrame) -> Option<SpectrumFrame> {
        if frame.generation != self.wideband.generation
            || frame.sample_rate_hz != self.wideband.sample_rate_hz
        {
            self.wideband = WidebandParams {
                sample_rate_hz: frame.sample_rate_hz,
                center_hz: frame.center_hz,
                generation: frame.generation,
            };
            self.reconfigure();
        }

        self.mixer.process(&frame.samples, &mut self.mixed);
        self.decimator.process(&self.mixed, &mut self.decimated);
        self.accum.extend_from_slice(&self.decimated);

        // 50% overlap: consume half an FFT per step, bounding accumulation.
        let hop = self.fft_size / 2;
        let mut ran_fft = false;
        while self.accum.len() >= self.fft_size {
            for (i, slot) in self.fft_buf.iter_mut().enumerate() {
                *slot = self.accum[i] * self.window[i];
            }
            self.fft.process(&mut self.fft_buf);
            self.average_into_ema();
            self.accum.drain(..hop);
            ran_fft = true;
        }
        if !ran_fft || !self.ema_primed {
            return None;
        }

        // Rate cap on the GPS clock: at most max_fps frames per second.
        let min_interval_ns = 1_000_000_000 / self.max_fps as u64;
        if frame.gps_ts_ns < self.last_emit_gps_ns + min_interval_ns {
            return None;
        }
        self.last_emit_gps_ns = frame.gps_ts_ns;

        Some(self.snapshot(frame.gps_ts_ns))
    }

    fn average_into_ema(&mut self) {
        let scale = 1.0 / self.fft_size as f32;
        for (i, bin) in self.fft_buf.iter().enumerate() {
            let power = (bin * scale).norm_sqr().max(1e-20);
            let db = 10.0 * power.log10();
            let slot = &mut self.ema_db[i];
            if self.ema_primed {
                *slot += EMA_ALPHA * (db - *slot);
            } else {
                *slot = db;
            }
        }
        self.ema_primed = true;
    }

    /// Builds the wire frame: FFT-shifted bins (lowest frequency first)
    /// plus the percentile noise floor.
    fn snapshot(&self, gps_ts_ns: u64) -> SpectrumFrame {
        let half = self.fft_size / 2;
        let mut bins = Vec::with_capacity(self.fft_size);
        for &db in &self.ema_db[half..] {
            bins.push(quantize_db(db));
        }
        for &db in &self.ema_db[..half] {
            bins.push(quantize_db(db));
        }

        // Noise floor: low percentile of a sorted reservoir of bin values.
        let stride = (self.fft_size / 128).max(1);
        let mut reservoir: Vec<f32> = self.ema_db.iter().step_by(stride).copied().collect();
        reservoir.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((reservoir.len() as f32 * NOISE_FLOOR_PERCENTILE) as usize)
            .min(reservoir.len().saturating_sub(1));
        let noise_floor_db = reservoir.get(idx).copied().unwrap_or(-120.0);

        SpectrumFrame {
            bins,
            center_hz: self.view_center_hz,
            bin_hz: self.view_rate as f64 / self.fft_size as f64,
            gps_ts_ns,
            noise_floor_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    const RATE: u32 = 256_000;
    const CENTER: i64 = 10_000_000;

    fn config() -> StreamingConfig {
        StreamingConfig {
            spectrum_fft_size: 1024,
            spectrum_max_fps: 15,
            ..StreamingConfig::default()
        }
    }

    fn wideband() -> WidebandParams {
        WidebandParams {
            sample_rate_hz: RATE,
            center_hz: CENTER,
            generation: 1,
        }
    }

    fn tone_frame(offset_hz: f32, block: usize, index: usize, n: &mut u64) -> IqFrame {
        let samples: StdArc<[Complex<f32>]> = (0..block)
            .map(|_| {
                let phase = TAU * offset_hz * *n as f32 / RATE as f32;
                *n += 1;
                Complex::new(phase.cos(), phase.sin()) * 0.5
            })
            .collect();
        IqFrame {
            samples,
            rtp_seq: index as u16,
            rtp_ts: 0,
            gps_ts_ns: 1_000_000_000 + index as u64 * 20_000_000,
            sample_rate_hz: RATE,
            center_hz: CENTER,
            generation: 1,
            gap_samples: 0,
        }
    }

    #[test]
    fn quantization_formula() {
        assert_eq!(quantize_db(-120.0), 0);
        assert_eq!(quantize_db(-70.0), 100);
        assert_eq!(quantize_db(0.0), 240);
        assert_eq!(quantize_db(50.0), 255);
    }

    #[test]
    fn tone_appears_in_expected_bin() {
        let mut engine = SpectrumEngine::new(&config(), wideband());
        let mut n = 0u64;
        let mut last = None;
        for i in 0..40 {
            if let Some(frame) = engine.process(&tone_frame(32_000.0, 5120, i, &mut n)) {
                last = Some(frame);
            }
        }
        let frame = last.expect("no spectrum emitted");
        assert_eq!(frame.bins.len(), 1024);

        // Full-span view: bin_hz = 256000/1024 = 250 Hz. A +32 kHz tone
        // sits 128 bins above the center bin (index 512).
        let peak_idx = frame
            .bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap();
        assert!(
            (peak_idx as i64 - (512 + 128)).abs() <= 1,
            "peak at {peak_idx}"
        );
        // The tone must stand well above the estimated floor.
        let peak_db = (frame.bins[peak_idx] as f32 - 240.0) / 2.0;
        assert!(peak_db - frame.noise_floor_db > 20.0);
    }

    #[test]
    fn emission_rate_is_capped() {
        let mut engine = SpectrumEngine::new(&config(), wideband());
        let mut n = 0u64;
        let mut emitted = 0;
        // 100 frames of 20 ms = 2 seconds of input.
        for i in 0..100 {
            if engine.process(&tone_frame(10_000.0, 5120, i, &mut n)).is_some() {
                emitted += 1;
            }
        }
        assert!(emitted <= 31, "emitted {emitted} frames in 2 s at 15 fps");
        assert!(emitted >= 10, "emitted only {emitted} frames");
    }

    #[test]
    fn zoom_changes_bin_width() {
        let mut engine = SpectrumEngine::new(&config(), wideband());
        engine.set_zoom(CENTER + 50_000, 64_000);
        let mut n = 0u64;
        let mut last = None;
        for i in 0..60 {
            if let Some(frame) = engine.process(&tone_frame(50_000.0, 5120, i, &mut n)) {
                last = Some(frame);
            }
        }
        let frame = last.expect("no spectrum emitted");
        // 256k / 4 = 64k view rate over 1024 bins.
        assert!((frame.bin_hz - 62.5).abs() < 0.01);
        assert_eq!(frame.center_hz, CENTER + 50_000);
        // The tone is now at the view center: middle bin.
        let peak_idx = frame
            .bins
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .map(|(i, _)| i)
            .unwrap();
        assert!((peak_idx as i64 - 512).abs() <= 2, "peak at {peak_idx}");
    }
}
