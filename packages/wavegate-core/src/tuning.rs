//! VFO tuning: demodulation modes and passband selection.
//!
//! A [`Tuning`] is the complete client-visible receiver state: center
//! frequency, mode and passband edges. It is mutated only through control
//! messages; the DSP pipeline reads it at block boundaries.

use serde::{Deserialize, Serialize};

use crate::error::{WavegateError, WavegateResult};

/// Demodulation mode requested by a client.
///
/// The `Iq*` variants bypass demodulation and pass complex baseband through
/// at the indicated rate; plain `Iq` uses the narrow 12 kHz working rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Am,
    Sam,
    Usb,
    Lsb,
    Cwu,
    Cwl,
    Fm,
    Nfm,
    Iq,
    Iq48,
    Iq96,
    Iq192,
    Iq384,
}

impl Mode {
    /// Parses a mode string as used in URL query parameters and control
    /// messages (case-insensitive).
    pub fn parse(s: &str) -> WavegateResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "am" => Ok(Self::Am),
            "sam" => Ok(Self::Sam),
            "usb" => Ok(Self::Usb),
            "lsb" => Ok(Self::Lsb),
            "cwu" | "cw" => Ok(Self::Cwu),
            "cwl" => Ok(Self::Cwl),
            "fm" => Ok(Self::Fm),
            "nfm" => Ok(Self::Nfm),
            "iq" => Ok(Self::Iq),
            "iq48" => Ok(Self::Iq48),
            "iq96" => Ok(Self::Iq96),
            "iq192" => Ok(Self::Iq192),
            "iq384" => Ok(Self::Iq384),
            other => Err(WavegateError::InvalidMode(other.to_string())),
        }
    }

    /// Returns the mode as the lowercase string used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Am => "am",
            Self::Sam => "sam",
            Self::Usb => "usb",
            Self::Lsb => "lsb",
            Self::Cwu => "cwu",
            Self::Cwl => "cwl",
            Self::Fm => "fm",
            Self::Nfm => "nfm",
            Self::Iq => "iq",
            Self::Iq48 => "iq48",
            Self::Iq96 => "iq96",
            Self::Iq192 => "iq192",
            Self::Iq384 => "iq384",
        }
    }

    /// Whether this mode passes raw complex baseband through.
    #[must_use]
    pub const fn is_iq(&self) -> bool {
        matches!(
            self,
            Self::Iq | Self::Iq48 | Self::Iq96 | Self::Iq192 | Self::Iq384
        )
    }

    /// Whether this is a CW mode (product detector plus fixed audio offset).
    #[must_use]
    pub const fn is_cw(&self) -> bool {
        matches!(self, Self::Cwu | Self::Cwl)
    }

    /// Working sample rate the decimator targets for this mode (Hz).
    #[must_use]
    pub const fn working_rate(&self) -> u32 {
        match self {
            Self::Am | Self::Sam | Self::Usb | Self::Lsb | Self::Cwu | Self::Cwl | Self::Iq => {
                12_000
            }
            Self::Nfm | Self::Iq48 => 48_000,
            Self::Iq96 => 96_000,
            Self::Fm | Self::Iq192 => 192_000,
            Self::Iq384 => 384_000,
        }
    }

    /// Output channel count: IQ modes carry (I, Q) pairs, audio modes mono.
    #[must_use]
    pub const fn channels(&self) -> u8 {
        if self.is_iq() {
            2
        } else {
            1
        }
    }

    /// Default passband edges for a freshly tuned session (Hz).
    #[must_use]
    pub const fn default_passband(&self) -> (i32, i32) {
        match self {
            Self::Am | Self::Sam => (-5_000, 5_000),
            Self::Usb => (50, 2_700),
            Self::Lsb => (-2_700, -50),
            Self::Cwu | Self::Cwl => (-250, 250),
            Self::Fm => (-96_000, 96_000),
            Self::Nfm => (-8_000, 8_000),
            Self::Iq => (-6_000, 6_000),
            Self::Iq48 => (-24_000, 24_000),
            Self::Iq96 => (-48_000, 48_000),
            Self::Iq192 => (-96_000, 96_000),
            Self::Iq384 => (-192_000, 192_000),
        }
    }
}

/// Complete per-session receiver tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    /// Dial frequency (Hz).
    pub center_hz: i64,
    /// Demodulation mode.
    pub mode: Mode,
    /// Lower passband edge relative to the dial frequency (Hz).
    pub passband_low_hz: i32,
    /// Upper passband edge relative to the dial frequency (Hz).
    pub passband_high_hz: i32,
}

impl Tuning {
    /// Creates a tuning with the mode's default passband.
    #[must_use]
    pub fn new(center_hz: i64, mode: Mode) -> Self {
        let (passband_low_hz, passband_high_hz) = mode.default_passband();
        Self {
            center_hz,
            mode,
            passband_low_hz,
            passband_high_hz,
        }
    }

    /// Validates the passband against the mode's constraints.
    ///
    /// Rules:
    /// - `low < high` for every mode
    /// - CW modes: both edges within ±500 Hz
    /// - LSB: both edges negative; USB: both edges non-negative
    /// - AM/SAM/FM/NFM: the band spans zero
    pub fn validate(&self) -> WavegateResult<()> {
        let (low, high) = (self.passband_low_hz, self.passband_high_hz);
        if low >= high {
            return Err(WavegateError::InvalidPassband(format!(
                "low ({low}) must be below high ({high})"
            )));
        }
        match self.mode {
            Mode::Cwu | Mode::Cwl => {
                if low.abs() >= 500 || high.abs() >= 500 {
                    return Err(WavegateError::InvalidPassband(format!(
                        "CW passband edges must stay within ±500 Hz, got {low}..{high}"
                    )));
                }
            }
            Mode::Lsb => {
                if low >= 0 || high >= 0 {
                    return Err(WavegateError::InvalidPassband(format!(
                        "LSB passband must be negative, got {low}..{high}"
                    )));
                }
            }
            Mode::Usb => {
                if low < 0 || high < 0 {
                    return Err(WavegateError::InvalidPassband(format!(
                        "USB passband must be non-negative, got {low}..{high}"
                    )));
                }
            }
            Mode::Am | Mode::Sam | Mode::Fm | Mode::Nfm => {
                if low >= 0 || high <= 0 {
                    return Err(WavegateError::InvalidPassband(format!(
                        "{} passband must span zero, got {low}..{high}",
                        self.mode.as_str()
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns a copy with a new mode and that mode's default passband.
    #[must_use]
    pub fn with_mode(&self, mode: Mode) -> Self {
        let (passband_low_hz, passband_high_hz) = mode.default_passband();
        Self {
            center_hz: self.center_hz,
            mode,
            passband_low_hz,
            passband_high_hz,
        }
    }

    /// Returns a copy with new passband edges (not yet validated).
    #[must_use]
    pub fn with_passband(&self, low: i32, high: i32) -> Self {
        Self {
            passband_low_hz: low,
            passband_high_hz: high,
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_strings() {
        assert_eq!(Mode::parse("USB").unwrap(), Mode::Usb);
        assert_eq!(Mode::parse("iq48").unwrap(), Mode::Iq48);
        assert_eq!(Mode::parse("cw").unwrap(), Mode::Cwu);
        assert!(Mode::parse("dsb").is_err());
    }

    #[test]
    fn default_passbands_are_valid() {
        for mode in [
            Mode::Am,
            Mode::Sam,
            Mode::Usb,
            Mode::Lsb,
            Mode::Cwu,
            Mode::Cwl,
            Mode::Fm,
            Mode::Nfm,
            Mode::Iq,
            Mode::Iq48,
            Mode::Iq96,
            Mode::Iq192,
            Mode::Iq384,
        ] {
            let tuning = Tuning::new(14_074_000, mode);
            assert!(tuning.validate().is_ok(), "default {mode:?} invalid");
        }
    }

    #[test]
    fn rejects_inverted_passband() {
        let t = Tuning::new(7_000_000, Mode::Usb).with_passband(2700, 50);
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_wide_cw_passband() {
        let t = Tuning::new(7_030_000, Mode::Cwu).with_passband(-600, 200);
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_positive_lsb_edge() {
        let t = Tuning::new(3_600_000, Mode::Lsb).with_passband(-2700, 50);
        assert!(t.validate().is_err());
    }

    #[test]
    fn rejects_am_passband_off_zero() {
        let t = Tuning::new(1_000_000, Mode::Am).with_passband(100, 5000);
        assert!(t.validate().is_err());
    }

    #[test]
    fn iq_modes_report_two_channels() {
        assert_eq!(Mode::Iq96.channels(), 2);
        assert_eq!(Mode::Usb.channels(), 1);
        assert_eq!(Mode::Iq384.working_rate(), 384_000);
    }
}
