//! Callsign-prefix to DXCC country/continent lookup.
//!
//! A built-in subset of the CTY table covering the prefixes that dominate
//! real cluster traffic. Lookup is longest-prefix-first, so "VE3" beats
//! "V" and "PY2" beats "P".

use std::collections::HashMap;
use std::sync::OnceLock;

/// One CTY entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CtyEntry {
    pub country: &'static str,
    pub continent: &'static str,
}

/// Prefix table. Longer or more specific prefixes must appear here in
/// full; the lookup tries the longest prefix of the callsign first.
static PREFIX_TABLE: &[(&str, &str, &str)] = &[
    ("K", "United States", "NA"),
    ("W", "United States", "NA"),
    ("N", "United States", "NA"),
    ("AA", "United States", "NA"),
    ("AB", "United States", "NA"),
    ("AC", "United States", "NA"),
    ("AD", "United States", "NA"),
    ("AE", "United States", "NA"),
    ("AF", "United States", "NA"),
    ("AG", "United States", "NA"),
    ("AI", "United States", "NA"),
    ("AJ", "United States", "NA"),
    ("AK", "United States", "NA"),
    ("AL", "Alaska", "NA"),
    ("KH6", "Hawaii", "OC"),
    ("KL7", "Alaska", "NA"),
    ("KP4", "Puerto Rico", "NA"),
    ("VE", "Canada", "NA"),
    ("VA", "Canada", "NA"),
    ("VO", "Canada", "NA"),
    ("VY", "Canada", "NA"),
    ("XE", "Mexico", "NA"),
    ("G", "England", "EU"),
    ("M", "England", "EU"),
    ("2E", "England", "EU"),
    ("GM", "Scotland", "EU"),
    ("GW", "Wales", "EU"),
    ("GI", "Northern Ireland", "EU"),
    ("GD", "Isle of Man", "EU"),
    ("EI", "Ireland", "EU"),
    ("F", "France", "EU"),
    ("DL", "Germany", "EU"),
    ("DJ", "Germany", "EU"),
    ("DK", "Germany", "EU"),
    ("DA", "Germany", "EU"),
    ("DB", "Germany", "EU"),
    ("DC", "Germany", "EU"),
    ("DD", "Germany", "EU"),
    ("DF", "Germany", "EU"),
    ("DG", "Germany", "EU"),
    ("DH", "Germany", "EU"),
    ("DM", "Germany", "EU"),
    ("DO", "Germany", "EU"),
    ("I", "Italy", "EU"),
    ("EA", "Spain", "EU"),
    ("EA8", "Canary Islands", "AF"),
    ("CT", "Portugal", "EU"),
    ("CT3", "Madeira Islands", "AF"),
    ("ON", "Belgium", "EU"),
    ("PA", "Netherlands", "EU"),
    ("PB", "Netherlands", "EU"),
    ("PD", "Netherlands", "EU"),
    ("PE", "Netherlands", "EU"),
    ("OZ", "Denmark", "EU"),
    ("LA", "Norway", "EU"),
    ("LB", "Norway", "EU"),
    ("SM", "Sweden", "EU"),
    ("SA", "Sweden", "EU"),
    ("OH", "Finland", "EU"),
    ("OH0", "Aland Islands", "EU"),
    ("ES", "Estonia", "EU"),
    ("YL", "Latvia", "EU"),
    ("LY", "Lithuania", "EU"),
    ("SP", "Poland", "EU"),
    ("SQ", "Poland", "EU"),
    ("OK", "Czech Republic", "EU"),
    ("OM", "Slovak Republic", "EU"),
    ("HA", "Hungary", "EU"),
    ("HG", "Hungary", "EU"),
    ("OE", "Austria", "EU"),
    ("HB", "Switzerland", "EU"),
    ("HB0", "Liechtenstein", "EU"),
    ("9A", "Croatia", "EU"),
    ("S5", "Slovenia", "EU"),
    ("YU", "Serbia", "EU"),
    ("YO", "Romania", "EU"),
    ("LZ", "Bulgaria", "EU"),
    ("SV", "Greece", "EU"),
    ("SV9", "Crete", "EU"),
    ("TA", "Turkey", "AS"),
    ("UA", "European Russia", "EU"),
    ("UA9", "Asiatic Russia", "AS"),
    ("UA0", "Asiatic Russia", "AS"),
    ("RA", "European Russia", "EU"),
    ("UR", "Ukraine", "EU"),
    ("US", "Ukraine", "EU"),
    ("UT", "Ukraine", "EU"),
    ("EU", "Belarus", "EU"),
    ("EV", "Belarus", "EU"),
    ("4X", "Israel", "AS"),
    ("4Z", "Israel", "AS"),
    ("JY", "Jordan", "AS"),
    ("A7", "Qatar", "AS"),
    ("A6", "United Arab Emirates", "AS"),
    ("HZ", "Saudi Arabia", "AS"),
    ("EP", "Iran", "AS"),
    ("VU", "India", "AS"),
    ("AP", "Pakistan", "AS"),
    ("4S", "Sri Lanka", "AS"),
    ("HS", "Thailand", "AS"),
    ("9V", "Singapore", "AS"),
    ("9M2", "West Malaysia", "AS"),
    ("YB", "Indonesia", "OC"),
    ("DU", "Philippines", "OC"),
    ("BV", "Taiwan", "AS"),
    ("BY", "China", "AS"),
    ("BA", "China", "AS"),
    ("BD", "China", "AS"),
    ("BG", "China", "AS"),
    ("BH", "China", "AS"),
    ("JA", "Japan", "AS"),
    ("JE", "Japan", "AS"),
    ("JF", "Japan", "AS"),
    ("JG", "Japan", "AS"),
    ("JH", "Japan", "AS"),
    ("JI", "Japan", "AS"),
    ("JJ", "Japan", "AS"),
    ("JK", "Japan", "AS"),
    ("JL", "Japan", "AS"),
    ("JM", "Japan", "AS"),
    ("JN", "Japan", "AS"),
    ("JO", "Japan", "AS"),
    ("JP", "Japan", "AS"),
    ("JQ", "Japan", "AS"),
    ("JR", "Japan", "AS"),
    ("JS", "Japan", "AS"),
    ("7J", "Japan", "AS"),
    ("HL", "South Korea", "AS"),
    ("DS", "South Korea", "AS"),
    ("VK", "Australia", "OC"),
    ("VK9", "Norfolk Island", "OC"),
    ("ZL", "New Zealand", "OC"),
    ("KH2", "Guam", "OC"),
    ("ZS", "South Africa", "AF"),
    ("5Z", "Kenya", "AF"),
    ("SU", "Egypt", "AF"),
    ("CN", "Morocco", "AF"),
    ("7X", "Algeria", "AF"),
    ("5N", "Nigeria", "AF"),
    ("9J", "Zambia", "AF"),
    ("Z2", "Zimbabwe", "AF"),
    ("PY", "Brazil", "SA"),
    ("PP", "Brazil", "SA"),
    ("PT", "Brazil", "SA"),
    ("PU", "Brazil", "SA"),
    ("LU", "Argentina", "SA"),
    ("CE", "Chile", "SA"),
    ("CX", "Uruguay", "SA"),
    ("HK", "Colombia", "SA"),
    ("YV", "Venezuela", "SA"),
    ("OA", "Peru", "SA"),
    ("HC", "Ecuador", "SA"),
    ("CO", "Cuba", "NA"),
    ("CM", "Cuba", "NA"),
    ("HI", "Dominican Republic", "NA"),
    ("TI", "Costa Rica", "NA"),
    ("ZF", "Cayman Islands", "NA"),
    ("VP9", "Bermuda", "NA"),
    ("8P", "Barbados", "NA"),
];

/// Maximum prefix length present in the table.
const MAX_PREFIX_LEN: usize = 3;

fn table() -> &'static HashMap<&'static str, CtyEntry> {
    static TABLE: OnceLock<HashMap<&'static str, CtyEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        PREFIX_TABLE
            .iter()
            .map(|&(prefix, country, continent)| {
                (
                    prefix,
                    CtyEntry {
                        country,
                        continent,
                    },
                )
            })
            .collect()
    })
}

/// Looks up a callsign, longest prefix first.
///
/// Portable suffixes ("/P", "/QRP", "/3") are ignored; a portable prefix
/// ("EA8/DL1ABC") resolves through the part before the slash.
#[must_use]
pub fn lookup(callsign: &str) -> Option<CtyEntry> {
    let call = callsign.trim().to_ascii_uppercase();
    let base = match call.split_once('/') {
        // "EA8/DL1ABC" style: the prefix part designates the entity.
        Some((head, tail)) if head.len() <= 4 && tail.len() > head.len() => head.to_string(),
        Some((head, _)) => head.to_string(),
        None => call,
    };
    let max = base.len().min(MAX_PREFIX_LEN);
    for len in (1..=max).rev() {
        if let Some(entry) = table().get(&base[..len]) {
            return Some(*entry);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longest_prefix_wins() {
        assert_eq!(lookup("UA9ABC").unwrap().country, "Asiatic Russia");
        assert_eq!(lookup("UA1ABC").unwrap().country, "European Russia");
        assert_eq!(lookup("EA8ZZ").unwrap().continent, "AF");
        assert_eq!(lookup("EA3ABC").unwrap().country, "Spain");
    }

    #[test]
    fn common_calls_resolve() {
        assert_eq!(lookup("JA1XYZ").unwrap().country, "Japan");
        assert_eq!(lookup("K1ABC").unwrap().country, "United States");
        assert_eq!(lookup("DL7AU").unwrap().country, "Germany");
        assert_eq!(lookup("VK3FOO").unwrap().continent, "OC");
    }

    #[test]
    fn portable_suffix_is_ignored() {
        assert_eq!(lookup("OK1ABC/P").unwrap().country, "Czech Republic");
    }

    #[test]
    fn portable_prefix_designates_entity() {
        assert_eq!(lookup("EA8/DL1ABC").unwrap().country, "Canary Islands");
    }

    #[test]
    fn unknown_prefix_returns_none() {
        assert!(lookup("1X9ZZ").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("ja1xyz").unwrap().continent, "AS");
    }
}
