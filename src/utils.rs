//! Parsing and formatting helpers shared across the crate.
//!
//! Rates use decimal SI units (`k` = 10^3) because that is how link speeds
//! are quoted; file and part sizes use binary units (`k` = 1024) because
//! that is how the store counts them.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::constants::{GIB, KIB, MIB, TIB};

/// Parse a transfer rate such as `"500k"`, `"2.5m"`, or `"unlimited"`.
///
/// Returns bytes per second; `0` means unlimited. Suffixes `k`/`K`, `m`/`M`,
/// and `g`/`G` multiply by 10^3, 10^6, and 10^9.
///
/// # Errors
///
/// Returns an error for an empty string, a negative value, or a mantissa
/// that does not parse as a decimal number.
pub fn parse_rate(s: &str) -> Result<u64> {
    if s == "unlimited" {
        return Ok(0);
    }
    parse_scaled(s, 1_000, 1_000_000, 1_000_000_000).with_context(|| format!("invalid rate: {s:?}"))
}

/// Parse a file or part size such as `"16m"` (binary units: `m` = 1 MiB).
///
/// # Errors
///
/// Returns an error for an empty string, a negative value, or a mantissa
/// that does not parse as a decimal number.
pub fn parse_filesize(s: &str) -> Result<u64> {
    parse_scaled(s, KIB, MIB, GIB).with_context(|| format!("invalid size: {s:?}"))
}

fn parse_scaled(s: &str, kilo: u64, mega: u64, giga: u64) -> Result<u64> {
    let Some(last) = s.chars().last() else {
        bail!("empty string");
    };
    let (mantissa, factor) = match last {
        'k' | 'K' => (&s[..s.len() - 1], kilo),
        'm' | 'M' => (&s[..s.len() - 1], mega),
        'g' | 'G' => (&s[..s.len() - 1], giga),
        _ => (s, 1),
    };
    let value: f64 = mantissa.trim().parse()?;
    if !value.is_finite() || value < 0.0 {
        bail!("value must be a non-negative number");
    }
    Ok((value * factor as f64).round() as u64)
}

/// Format a byte count in decimal SI units: `"1.5 MB"`.
pub fn format_size(size: u64) -> String {
    let size_f = size as f64;
    if size < 1_000 {
        format!("{size} bytes")
    } else if size < 1_000_000 {
        format!("{:.1} kB", size_f / 1e3)
    } else if size < 1_000_000_000 {
        format!("{:.1} MB", size_f / 1e6)
    } else if size < 1_000_000_000_000 {
        format!("{:.1} GB", size_f / 1e9)
    } else {
        format!("{:.1} TB", size_f / 1e12)
    }
}

/// Format a byte count in binary units with the exact count appended:
/// `"1.5 MiB (1572864 bytes)"`. The store's own quotas are binary, so file
/// and part sizes are reported this way.
pub fn format_filesize(size: u64) -> String {
    let size_f = size as f64;
    if size < KIB {
        format!("{size} bytes")
    } else if size < MIB {
        format!("{:.1} kiB ({size} bytes)", size_f / KIB as f64)
    } else if size < GIB {
        format!("{:.1} MiB ({size} bytes)", size_f / MIB as f64)
    } else if size < TIB {
        format!("{:.1} GiB ({size} bytes)", size_f / GIB as f64)
    } else {
        format!("{:.1} TiB ({size} bytes)", size_f / TIB as f64)
    }
}

/// Format a rate the way [`parse_rate`] reads it: `"750"`, `"2.5m"`,
/// `"unlimited"`.
pub fn format_rate(rate: u64) -> String {
    if rate == 0 {
        return "unlimited".to_string();
    }
    let rate_f = rate as f64;
    if rate < 1_000 {
        format!("{rate}")
    } else if rate < 1_000_000 {
        format!("{:.1}k", rate_f / 1e3)
    } else if rate < 1_000_000_000 {
        format!("{:.1}m", rate_f / 1e6)
    } else {
        format!("{:.1}g", rate_f / 1e9)
    }
}

/// Format a size the way [`parse_filesize`] reads it: `"512"`, `"16.0m"`.
pub fn format_filesize_short(size: u64) -> String {
    let size_f = size as f64;
    if size < KIB {
        format!("{size}")
    } else if size < MIB {
        format!("{:.1}k", size_f / KIB as f64)
    } else if size < GIB {
        format!("{:.1}m", size_f / MIB as f64)
    } else {
        format!("{:.1}g", size_f / GIB as f64)
    }
}

/// Render the current limit for the progress line: `" (limit: 1.5 MB/s)"`,
/// or nothing when unlimited.
pub fn format_limit(rate: u64) -> String {
    if rate == 0 {
        String::new()
    } else {
        format!(" (limit: {}/s)", format_size(rate))
    }
}

/// Format an ETA: `"30s"`, `"1m 30s"`, `"1h 1m"`, `"1d 1h"`, or `"--"` when
/// no estimate is available yet.
pub fn format_eta(eta: Option<Duration>) -> String {
    let Some(eta) = eta else {
        return "--".to_string();
    };
    let secs = eta.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3_600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3_600)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_rate_plain_and_suffixed() {
        assert_eq!(parse_rate("unlimited").unwrap(), 0);
        assert_eq!(parse_rate("0").unwrap(), 0);
        assert_eq!(parse_rate("750").unwrap(), 750);
        assert_eq!(parse_rate("500k").unwrap(), 500_000);
        assert_eq!(parse_rate("2.5m").unwrap(), 2_500_000);
        assert_eq!(parse_rate("1G").unwrap(), 1_000_000_000);
    }

    #[test]
    fn parse_rate_rejects_garbage() {
        assert!(parse_rate("").is_err());
        assert!(parse_rate("fast").is_err());
        assert!(parse_rate("-5k").is_err());
        assert!(parse_rate("k").is_err());
    }

    #[test]
    fn parse_filesize_uses_binary_units() {
        assert_eq!(parse_filesize("1k").unwrap(), 1024);
        assert_eq!(parse_filesize("16m").unwrap(), 16 * MIB);
        assert_eq!(parse_filesize("5g").unwrap(), 5 * GIB);
        assert_eq!(parse_filesize("0.5k").unwrap(), 512);
    }

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(999), "999 bytes");
        assert_eq!(format_size(1_500), "1.5 kB");
        assert_eq!(format_size(2_500_000), "2.5 MB");
        assert_eq!(format_size(3_000_000_000), "3.0 GB");
    }

    #[test]
    fn format_filesize_appends_exact_bytes() {
        assert_eq!(format_filesize(512), "512 bytes");
        assert_eq!(format_filesize(8 * MIB), "8.0 MiB (8388608 bytes)");
    }

    #[test]
    fn format_eta_units() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(Duration::from_secs(30))), "30s");
        assert_eq!(format_eta(Some(Duration::from_secs(90))), "1m 30s");
        assert_eq!(format_eta(Some(Duration::from_secs(3_660))), "1h 1m");
        assert_eq!(format_eta(Some(Duration::from_secs(90_000))), "1d 1h");
    }

    #[test]
    fn format_limit_empty_when_unlimited() {
        assert_eq!(format_limit(0), "");
        assert_eq!(format_limit(1_500_000), " (limit: 1.5 MB/s)");
    }

    proptest! {
        // Formatting a rate and parsing it back stays within 5%.
        #[test]
        fn rate_roundtrip_within_5_percent(n in 0u64..100_000_000_000) {
            let parsed = parse_rate(&format_rate(n)).unwrap();
            prop_assert!(parsed.abs_diff(n) <= n / 20);
        }

        // Same inverse property for sizes in binary units.
        #[test]
        fn filesize_roundtrip_within_5_percent(n in 0u64..100_000_000_000) {
            let parsed = parse_filesize(&format_filesize_short(n)).unwrap();
            prop_assert!(parsed.abs_diff(n) <= n / 20);
        }
    }
}
