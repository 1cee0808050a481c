//! DX spot line parsing and band classification.
//!
//! A spider announces spots as
//! `"DX de <spotter>: <freq_kHz> <dxcall> <comment...> <HHMM>Z"`.
//! Frequencies are kilohertz; anything outside 0..=30 MHz is dropped
//! (this receiver covers HF only).

use serde::Serialize;

use crate::dxcluster::cty;

/// Upper frequency bound for accepted spots (Hz).
const MAX_SPOT_HZ: u64 = 30_000_000;

/// One parsed DX spot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spot {
    pub freq_hz: u64,
    pub dx_call: String,
    pub spotter: String,
    pub comment: String,
    /// Time field as announced (e.g. "1234Z"); empty when absent.
    pub utc_time: String,
    /// Amateur band name ("20m"), empty when the frequency sits outside
    /// every band.
    pub band: String,
    pub country: String,
    pub continent: String,
    /// The unmodified input line.
    pub raw: String,
}

/// Amateur band edges in Hz (HF plus the LF/MF bands this receiver hears).
const BAND_TABLE: &[(u64, u64, &str)] = &[
    (135_700, 137_800, "2200m"),
    (472_000, 479_000, "630m"),
    (1_800_000, 2_000_000, "160m"),
    (3_500_000, 4_000_000, "80m"),
    (5_330_000, 5_410_000, "60m"),
    (7_000_000, 7_300_000, "40m"),
    (10_100_000, 10_150_000, "30m"),
    (14_000_000, 14_350_000, "20m"),
    (18_068_000, 18_168_000, "17m"),
    (21_000_000, 21_450_000, "15m"),
    (24_890_000, 24_990_000, "12m"),
    (28_000_000, 29_700_000, "10m"),
];

/// Maps a frequency to its amateur band name.
#[must_use]
pub fn band_for(freq_hz: u64) -> &'static str {
    for &(low, high, name) in BAND_TABLE {
        if (low..=high).contains(&freq_hz) {
            return name;
        }
    }
    ""
}

/// Parses one spider line into a [`Spot`].
///
/// Returns `None` for non-spot lines, unparseable spots, and frequencies
/// outside the accepted range.
#[must_use]
pub fn parse_spot(line: &str) -> Option<Spot> {
    let rest = line.strip_prefix("DX de ")?;
    let (spotter, rest) = rest.split_once(':')?;
    let spotter = spotter.trim();
    if spotter.is_empty() {
        return None;
    }

    let mut tokens = rest.split_whitespace();
    let freq_khz: f64 = tokens.next()?.parse().ok()?;
    let dx_call = tokens.next()?.to_string();

    let freq_hz = (freq_khz * 1000.0).round();
    if !(freq_hz > 0.0 && freq_hz <= MAX_SPOT_HZ as f64) {
        return None;
    }
    let freq_hz = freq_hz as u64;

    // Everything after the callsign is the comment; a trailing HHMMZ token
    // is the spot time, not part of the comment.
    let mut comment_tokens: Vec<&str> = tokens.collect();
    let utc_time = match comment_tokens.last() {
        Some(last) if is_time_token(last) => comment_tokens.pop().unwrap_or("").to_string(),
        _ => String::new(),
    };
    let comment = comment_tokens.join(" ");

    let (country, continent) = cty::lookup(&dx_call)
        .map(|entry| (entry.country.to_string(), entry.continent.to_string()))
        .unwrap_or_default();

    Some(Spot {
        freq_hz,
        dx_call,
        spotter: spotter.to_string(),
        comment,
        utc_time,
        band: band_for(freq_hz).to_string(),
        country,
        continent,
        raw: line.to_string(),
    })
}

/// True for "HHMM" followed by 'Z' (e.g. "0815Z").
fn is_time_token(token: &str) -> bool {
    token.len() == 5
        && token.ends_with('Z')
        && token[..4].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_spot_line() {
        let line = "DX de K1ABC:     14074.0  JA1XYZ       CQ FT8                    1234Z";
        let spot = parse_spot(line).unwrap();
        assert_eq!(spot.freq_hz, 14_074_000);
        assert_eq!(spot.dx_call, "JA1XYZ");
        assert_eq!(spot.spotter, "K1ABC");
        assert_eq!(spot.band, "20m");
        assert!(spot.comment.contains("CQ FT8"));
        assert_eq!(spot.utc_time, "1234Z");
        assert_eq!(spot.raw, line);
        assert_eq!(spot.country, "Japan");
        assert_eq!(spot.continent, "AS");
    }

    #[test]
    fn drops_out_of_range_frequency() {
        // 50 MHz announced in kHz units.
        let line = "DX de K1ABC:     50000.0  JA1XYZ       FT8 6m        1234Z";
        assert!(parse_spot(line).is_none());
    }

    #[test]
    fn drops_zero_frequency() {
        assert!(parse_spot("DX de K1ABC: 0.0 JA1XYZ test 1234Z").is_none());
    }

    #[test]
    fn ignores_non_spot_lines() {
        assert!(parse_spot("WWV de W0MU <18Z> : SFI=123").is_none());
        assert!(parse_spot("To ALL de SM7ABC: anyone around?").is_none());
    }

    #[test]
    fn missing_time_token_leaves_comment_intact() {
        let spot = parse_spot("DX de G3XYZ: 7030.5 OK1ABC loud cw").unwrap();
        assert_eq!(spot.comment, "loud cw");
        assert_eq!(spot.utc_time, "");
        assert_eq!(spot.band, "40m");
    }

    #[test]
    fn band_table_edges() {
        assert_eq!(band_for(14_000_000), "20m");
        assert_eq!(band_for(14_350_000), "20m");
        assert_eq!(band_for(14_350_001), "");
        assert_eq!(band_for(1_900_000), "160m");
        assert_eq!(band_for(472_500), "630m");
        assert_eq!(band_for(13_999_999), "");
    }

    #[test]
    fn time_token_shapes() {
        assert!(is_time_token("0000Z"));
        assert!(is_time_token("2359Z"));
        assert!(!is_time_token("123Z"));
        assert!(!is_time_token("12345"));
        assert!(!is_time_token("CQDXZ"));
    }
}
