//! Per-session DSP pipeline.
//!
//! One pipeline realizes a client's [`Tuning`] against the wideband I/Q
//! stream: complex mixer → decimator → passband FIR → demodulator → AGC →
//! notches → optional noise reduction → output resampler. IQ modes stop
//! after the passband filter and pass complex baseband through.
//!
//! The pipeline is owned by a single task. Control changes arrive as
//! [`PipelineCommand`] values which the owner applies between blocks; all
//! stage buffers are allocated at construction or reconfiguration, never
//! per block.

pub mod agc;
pub mod biquad;
pub mod demod;
pub mod fir;
pub mod mixer;
pub mod nr;
pub mod resampler;

use num_complex::Complex;

use crate::bus::WidebandParams;
use crate::frame::{IqFrame, PcmFrame};
use crate::protocol_constants::DEFAULT_AUDIO_RATE;
use crate::tuning::{Mode, Tuning};

use agc::{Agc, AgcProfile};
use biquad::{NotchChain, NotchSpec};
use demod::Demodulator;
use fir::{complex_bandpass_taps, ComplexFir, FirDecimator};
use mixer::ComplexMixer;
use nr::{NoiseReducer, NrSettings};
use resampler::Resampler;

/// Passband FIR length. Long enough for ~100 Hz transition skirts at the
/// 12 kHz working rate.
const PASSBAND_TAPS: usize = 257;

/// Control messages applied by the pipeline owner at block boundaries.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    SetFrequency(i64),
    SetMode(Mode),
    SetBandwidth { low: i32, high: i32 },
    SetNotches(Vec<NotchSpec>),
    SetNr(NrSettings),
    SetAgc(AgcProfile),
}

/// One client's tuning/demod/filter/resample chain.
pub struct Pipeline {
    tuning: Tuning,
    wideband: WidebandParams,
    requested_output_rate: u32,

    mixer: ComplexMixer,
    decimator: FirDecimator,
    working_rate: u32,
    passband: ComplexFir,
    demod: Option<Demodulator>,
    agc: Agc,
    notches: NotchChain,
    nr: NoiseReducer,
    resampler: Resampler,

    // Scratch buffers, reused across blocks.
    mixed: Vec<Complex<f32>>,
    decimated: Vec<Complex<f32>>,
    filtered: Vec<Complex<f32>>,
    audio: Vec<f32>,
    denoised: Vec<f32>,
    resampled: Vec<f32>,

    filter_recomputes: u64,
}

impl Pipeline {
    /// Builds a pipeline for `tuning` against the current wideband
    /// parameters. `output_rate` applies to audio modes; IQ modes always
    /// emit at their working rate.
    #[must_use]
    pub fn new(tuning: Tuning, output_rate: u32, wideband: WidebandParams) -> Self {
        let mut pipeline = Self {
            tuning,
            wideband,
            requested_output_rate: if output_rate == 0 {
                DEFAULT_AUDIO_RATE
            } else {
                output_rate
            },
            mixer: ComplexMixer::new(wideband.sample_rate_hz.max(1)),
            decimator: FirDecimator::new(1),
            working_rate: tuning.mode.working_rate(),
            passband: ComplexFir::new(vec![Complex::new(1.0, 0.0)]),
            demod: None,
            agc: Agc::new(tuning.mode.working_rate(), AgcProfile::default()),
            notches: NotchChain::new(tuning.mode.working_rate()),
            nr: NoiseReducer::new(NrSettings::default()),
            resampler: Resampler::new(tuning.mode.working_rate(), DEFAULT_AUDIO_RATE),
            mixed: Vec::new(),
            decimated: Vec::new(),
            filtered: Vec::new(),
            audio: Vec::new(),
            denoised: Vec::new(),
            resampled: Vec::new(),
            filter_recomputes: 0,
        };
        pipeline.rebuild();
        pipeline
    }

    /// Current tuning.
    #[must_use]
    pub fn tuning(&self) -> Tuning {
        self.tuning
    }

    /// Rate of emitted PCM frames (Hz).
    #[must_use]
    pub fn output_rate(&self) -> u32 {
        if self.tuning.mode.is_iq() {
            self.working_rate
        } else {
            self.requested_output_rate
        }
    }

    /// Channels of emitted PCM frames.
    #[must_use]
    pub fn output_channels(&self) -> u8 {
        self.tuning.mode.channels()
    }

    /// Active AGC profile.
    #[must_use]
    pub fn agc_profile(&self) -> AgcProfile {
        self.agc.profile()
    }

    /// Active notch specs.
    #[must_use]
    pub fn notches(&self) -> &[NotchSpec] {
        self.notches.specs()
    }

    /// Active noise-reduction settings.
    #[must_use]
    pub fn nr_settings(&self) -> NrSettings {
        self.nr.settings()
    }

    /// Number of passband coefficient recomputations since construction.
    /// Identical consecutive bandwidth requests must not increment this.
    #[must_use]
    pub fn filter_recomputes(&self) -> u64 {
        self.filter_recomputes
    }

    /// Applies one control command between blocks.
    pub fn apply(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::SetFrequency(hz) => {
                self.tuning.center_hz = hz;
                self.retune_mixer();
            }
            PipelineCommand::SetMode(mode) => {
                if mode != self.tuning.mode {
                    self.tuning = self.tuning.with_mode(mode);
                    self.rebuild();
                }
            }
            PipelineCommand::SetBandwidth { low, high } => {
                // Recompute only when an edge moved by more than 1 Hz.
                let moved = (low - self.tuning.passband_low_hz).abs() > 1
                    || (high - self.tuning.passband_high_hz).abs() > 1;
                self.tuning = self.tuning.with_passband(low, high);
                if moved {
                    self.recompute_passband();
                }
            }
            PipelineCommand::SetNotches(specs) => self.notches.set_notches(&specs),
            PipelineCommand::SetNr(settings) => self.nr.set_settings(settings),
            PipelineCommand::SetAgc(profile) => self.agc.set_profile(profile),
        }
    }

    /// Processes one wideband frame into zero or more PCM frames.
    ///
    /// An input gap yields a leading silence frame of equal duration; a
    /// generation change reconfigures the chain before processing.
    pub fn process(&mut self, frame: &IqFrame, out: &mut Vec<PcmFrame>) {
        out.clear();

        if frame.generation != self.wideband.generation
            || frame.sample_rate_hz != self.wideband.sample_rate_hz
            || frame.center_hz != self.wideband.center_hz
        {
            self.wideband = WidebandParams {
                sample_rate_hz: frame.sample_rate_hz,
                center_hz: frame.center_hz,
                generation: frame.generation,
            };
            self.rebuild();
        }
        if self.wideband.sample_rate_hz == 0 {
            return;
        }

        if frame.gap_samples > 0 {
            if let Some(silence) = self.silence_for_gap(frame) {
                out.push(silence);
            }
        }

        self.mixer.process(&frame.samples, &mut self.mixed);
        self.decimator.process(&self.mixed, &mut self.decimated);
        if self.decimated.is_empty() {
            return;
        }
        self.passband.process(&self.decimated, &mut self.filtered);

        let channels = self.output_channels();
        let sample_rate_hz = self.output_rate();

        let samples: Vec<i16> = if self.tuning.mode.is_iq() {
            // Complex baseband passthrough: interleaved (I, Q).
            let mut interleaved = Vec::with_capacity(self.filtered.len() * 2);
            for z in &self.filtered {
                interleaved.push(quantize(z.re));
                interleaved.push(quantize(z.im));
            }
            interleaved
        } else {
            let Some(demod) = self.demod.as_mut() else {
                return;
            };
            demod.process(&self.filtered, &mut self.audio);
            self.agc.process_inplace(&mut self.audio);
            self.notches.process_inplace(&mut self.audio);
            self.nr.process(&self.audio, &mut self.denoised);
            self.resampler.process(&self.denoised, &mut self.resampled);
            self.resampled.iter().map(|&s| quantize(s)).collect()
        };

        if samples.is_empty() {
            return;
        }
        out.push(PcmFrame {
            samples,
            channels,
            sample_rate_hz,
            gps_ts_ns: frame.gps_ts_ns,
        });
    }

    /// Builds the silence frame covering a reported input gap.
    fn silence_for_gap(&self, frame: &IqFrame) -> Option<PcmFrame> {
        let out_rate = self.output_rate() as u64;
        let in_rate = frame.sample_rate_hz.max(1) as u64;
        let silent = (frame.gap_samples * out_rate / in_rate) as usize;
        if silent == 0 {
            return None;
        }
        let gap_ns = frame.gap_samples * 1_000_000_000 / in_rate;
        Some(PcmFrame {
            samples: vec![0i16; silent * self.output_channels() as usize],
            channels: self.output_channels(),
            sample_rate_hz: self.output_rate(),
            gps_ts_ns: frame.gps_ts_ns.saturating_sub(gap_ns),
        })
    }

    /// Full reconfiguration after a mode or wideband-parameter change.
    fn rebuild(&mut self) {
        let wideband_rate = self.wideband.sample_rate_hz;
        if wideband_rate == 0 {
            return;
        }
        let target = self.tuning.mode.working_rate();
        let factor = (wideband_rate / target).max(1) as usize;
        self.working_rate = wideband_rate / factor as u32;

        self.mixer = ComplexMixer::new(wideband_rate);
        self.retune_mixer();
        self.decimator = FirDecimator::new(factor);
        self.demod = Demodulator::for_mode(self.tuning.mode, self.working_rate);
        self.agc.set_sample_rate(self.working_rate);
        self.notches.set_sample_rate(self.working_rate);
        self.resampler
            .reset(self.working_rate, self.requested_output_rate);
        self.recompute_passband();
    }

    fn retune_mixer(&mut self) {
        let offset = self.tuning.center_hz - self.wideband.center_hz;
        self.mixer.set_frequency(offset as f64);
    }

    fn recompute_passband(&mut self) {
        let taps = complex_bandpass_taps(
            PASSBAND_TAPS,
            self.tuning.passband_low_hz as f32,
            self.tuning.passband_high_hz as f32,
            self.working_rate as f32,
        );
        self.passband.set_taps(taps);
        self.filter_recomputes += 1;
    }
}

#[inline]
fn quantize(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;
    use std::sync::Arc;

    const WIDEBAND_RATE: u32 = 192_000;
    const WIDEBAND_CENTER: i64 = 14_000_000;

    fn wideband() -> WidebandParams {
        WidebandParams {
            sample_rate_hz: WIDEBAND_RATE,
            center_hz: WIDEBAND_CENTER,
            generation: 1,
        }
    }

    /// Wideband frames carrying a single RF tone at `rf_hz`.
    fn tone_frames(rf_hz: i64, amplitude: f32, blocks: usize, block_len: usize) -> Vec<IqFrame> {
        let offset = (rf_hz - WIDEBAND_CENTER) as f32;
        let mut n = 0u64;
        (0..blocks)
            .map(|b| {
                let samples: Arc<[Complex<f32>]> = (0..block_len)
                    .map(|_| {
                        let phase = TAU * offset * n as f32 / WIDEBAND_RATE as f32;
                        n += 1;
                        Complex::new(phase.cos(), phase.sin()) * amplitude
                    })
                    .collect();
                IqFrame {
                    samples,
                    rtp_seq: b as u16,
                    rtp_ts: (b * block_len) as u32,
                    gps_ts_ns: 1_000_000_000 + b as u64 * 20_000_000,
                    sample_rate_hz: WIDEBAND_RATE,
                    center_hz: WIDEBAND_CENTER,
                    generation: 1,
                    gap_samples: 0,
                }
            })
            .collect()
    }

    fn dominant_freq(samples: &[i16], rate: f32) -> f32 {
        let mut crossings = 0u32;
        for pair in samples.windows(2) {
            if (pair[0] <= 0) != (pair[1] <= 0) {
                crossings += 1;
            }
        }
        crossings as f32 * rate / (2.0 * samples.len() as f32)
    }

    fn rms(samples: &[i16]) -> f32 {
        (samples.iter().map(|&s| (s as f32) * (s as f32)).sum::<f32>() / samples.len() as f32)
            .sqrt()
    }

    #[test]
    fn usb_tone_lands_at_audio_offset() {
        // RF tone 100 Hz above the dial: expect 100 Hz audio (scenario: a
        // 14.0741 MHz carrier heard on a 14.074 MHz USB dial).
        let tuning = Tuning::new(14_074_000, Mode::Usb);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        let mut out = Vec::new();
        let mut audio = Vec::new();
        for frame in tone_frames(14_074_100, 0.1, 50, 3840) {
            pipeline.process(&frame, &mut out);
            for pcm in &out {
                audio.extend_from_slice(&pcm.samples);
                assert_eq!(pcm.sample_rate_hz, DEFAULT_AUDIO_RATE);
                assert_eq!(pcm.channels, 1);
            }
        }
        let settled = &audio[audio.len() / 2..];
        let freq = dominant_freq(settled, DEFAULT_AUDIO_RATE as f32);
        assert!((freq - 100.0).abs() < 5.0, "got {freq} Hz");
        assert!(rms(settled) > 1000.0, "audio too quiet");
    }

    #[test]
    fn mode_switch_to_lsb_removes_usb_tone() {
        let tuning = Tuning::new(14_074_000, Mode::Usb);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        let frames = tone_frames(14_074_500, 0.1, 80, 3840);
        let mut out = Vec::new();

        let mut usb_audio = Vec::new();
        for frame in &frames[..40] {
            pipeline.process(frame, &mut out);
            for pcm in &out {
                usb_audio.extend_from_slice(&pcm.samples);
            }
        }
        assert!(rms(&usb_audio[usb_audio.len() / 2..]) > 1000.0);

        pipeline.apply(PipelineCommand::SetMode(Mode::Lsb));
        let mut lsb_audio = Vec::new();
        for frame in &frames[40..] {
            pipeline.process(frame, &mut out);
            for pcm in &out {
                lsb_audio.extend_from_slice(&pcm.samples);
            }
        }
        // The tone sits in the upper sideband; LSB rejects it. AGC pulls
        // residual noise up, so compare pre-AGC energy via a wide margin.
        let settled = &lsb_audio[lsb_audio.len() / 2..];
        assert!(
            rms(settled) < rms(&usb_audio[usb_audio.len() / 2..]) / 4.0,
            "tone leaked through LSB"
        );
    }

    #[test]
    fn identical_bandwidth_commands_recompute_once() {
        let tuning = Tuning::new(7_000_000, Mode::Usb);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        let base = pipeline.filter_recomputes();
        pipeline.apply(PipelineCommand::SetBandwidth { low: 100, high: 2900 });
        pipeline.apply(PipelineCommand::SetBandwidth { low: 100, high: 2900 });
        assert_eq!(pipeline.filter_recomputes(), base + 1);
    }

    #[test]
    fn sub_hz_bandwidth_change_skips_recompute() {
        let tuning = Tuning::new(7_000_000, Mode::Usb);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        pipeline.apply(PipelineCommand::SetBandwidth { low: 100, high: 2900 });
        let base = pipeline.filter_recomputes();
        pipeline.apply(PipelineCommand::SetBandwidth { low: 100, high: 2901 });
        assert_eq!(pipeline.filter_recomputes(), base);
    }

    #[test]
    fn gap_inserts_equal_silence() {
        let tuning = Tuning::new(14_074_000, Mode::Usb);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        let mut frames = tone_frames(14_074_100, 0.1, 2, 3840);
        frames[1].gap_samples = 19_200; // 100 ms at wideband rate
        let mut out = Vec::new();
        pipeline.process(&frames[0], &mut out);
        pipeline.process(&frames[1], &mut out);
        // First emitted frame is silence worth 100 ms at the output rate.
        let silence = &out[0];
        assert_eq!(silence.samples.len(), 1200);
        assert!(silence.samples.iter().all(|&s| s == 0));
        assert!(silence.gps_ts_ns < out[1].gps_ts_ns);
    }

    #[test]
    fn iq_mode_passes_complex_pairs() {
        let tuning = Tuning::new(14_074_000, Mode::Iq48);
        let mut pipeline = Pipeline::new(tuning, DEFAULT_AUDIO_RATE, wideband());
        let mut out = Vec::new();
        let mut total = 0usize;
        for frame in tone_frames(14_080_000, 0.5, 10, 3840) {
            pipeline.process(&frame, &mut out);
            for pcm in &out {
                assert_eq!(pcm.channels, 2);
                assert_eq!(pcm.sample_rate_hz, 48_000);
                assert_eq!(pcm.samples.len() % 2, 0);
                total += pcm.samples.len() / 2;
            }
        }
        // 10 blocks of 3840 at 192k decimated by 4.
        assert_eq!(total, 9600);
    }
}
