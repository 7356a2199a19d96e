//! Preset label grammar, bit-exact per `SPEC_FULL.md` section 6.3.
//!
//! `^\s*(\d+)\s*watt(?:[^~]*~\s*([\d.]+)\s*TH)?` — the strict form (section
//! 10.6): a label missing the `~ N TH` suffix still matches on watts alone,
//! but a label that doesn't even match `watt` yields zeros. Strategy filters
//! zero-watt presets; the parser never errors.

use std::sync::OnceLock;

use regex::Regex;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(\d+)\s*watt(?:[^~]*~\s*([\d.]+)\s*TH)?").expect("static regex is valid")
    })
}

/// Parses a firmware-reported preset label into `(watts, hashrate_th)`.
/// Unrecognized labels return `(0, 0.0)` — the preset is kept but never
/// selected by strategy (section 6.3).
pub fn parse_label(label: &str) -> (u32, f64) {
    let Some(caps) = pattern().captures(label) else {
        return (0, 0.0);
    };
    let watts = caps
        .get(1)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(0);
    let hashrate_th = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .unwrap_or(0.0);
    (watts, hashrate_th)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_label() {
        assert_eq!(parse_label("990 watt ~ 95.5 TH"), (990, 95.5));
    }

    #[test]
    fn parses_watts_only_label() {
        assert_eq!(parse_label("690watt"), (690, 0.0));
    }

    #[test]
    fn leading_whitespace_is_tolerated() {
        assert_eq!(parse_label("  1200 watt mode ~ 110 TH"), (1200, 110.0));
    }

    #[test]
    fn unrecognized_label_is_zeroed() {
        assert_eq!(parse_label("turbo"), (0, 0.0));
    }

    #[test]
    fn garbage_between_watt_and_tilde_is_skipped() {
        assert_eq!(parse_label("500 watt (beta) ~ 40 TH"), (500, 40.0));
    }
}
